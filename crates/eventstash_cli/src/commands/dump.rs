//! Dump command implementation.

use super::{load_encryption, CliResult};
use eventstash_storage::framing::{decode_records, framed_size, RecordKind, Tail};
use eventstash_storage::DataEncryption;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset in the batch file.
    pub offset: usize,
    /// Record kind.
    pub kind: String,
    /// Stored payload size in bytes.
    pub size: usize,
    /// The event, as text if it is UTF-8, hex-encoded otherwise. Absent for
    /// encrypted records that could not be decrypted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Whether `payload` is hex-encoded.
    pub hex: bool,
}

/// Runs the dump command.
pub fn run(file: &Path, key_hex: Option<&str>, limit: Option<usize>, format: &str) -> CliResult<()> {
    if !file.is_file() {
        return Err(format!("Batch file not found: {:?}", file).into());
    }

    let encryption = load_encryption(key_hex)?;
    let data = fs::read(file)?;
    let (records, tail) = read_records(&data, encryption.as_deref(), limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
            match tail {
                Tail::Clean => {}
                Tail::Truncated { offset, bytes } => {
                    println!("-- torn record at offset {offset} ({bytes} bytes)");
                }
                Tail::Corrupted {
                    offset,
                    bytes,
                    reason,
                } => {
                    println!("-- corrupted at offset {offset}: {reason} ({bytes} bytes)");
                }
            }
        }
    }

    Ok(())
}

fn read_records(
    data: &[u8],
    encryption: Option<&dyn DataEncryption>,
    limit: Option<usize>,
) -> (Vec<RecordInfo>, Tail) {
    let decoded = decode_records(data);
    let max_records = limit.unwrap_or(usize::MAX);

    let mut offset = 0;
    let mut records = Vec::new();
    for record in decoded.records.into_iter().take(max_records) {
        let size = record.payload.len();
        let plaintext = match (record.kind, encryption) {
            (RecordKind::Event, _) => Some(record.payload),
            (RecordKind::EncryptedEvent, Some(encryption)) => encryption.decrypt(&record.payload).ok(),
            (RecordKind::EncryptedEvent, None) => None,
        };
        let (payload, hex) = match plaintext {
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(text) => (Some(text), false),
                Err(e) => (Some(hex::encode(e.into_bytes())), true),
            },
            None => (None, false),
        };
        records.push(RecordInfo {
            offset,
            kind: format!("{:?}", record.kind),
            size,
            payload,
            hex,
        });
        offset += framed_size(size);
    }

    (records, decoded.tail)
}

fn print_text_output(records: &[RecordInfo]) {
    for record in records {
        let payload = match (&record.payload, record.hex) {
            (Some(p), false) => format!("{p:?}"),
            (Some(p), true) => format!("0x{p}"),
            (None, _) => "<encrypted>".to_string(),
        };
        println!(
            "[{:>8}] {:<14} {:>6} bytes  {}",
            record.offset, record.kind, record.size, payload
        );
    }
    println!("-- {} record(s)", records.len());
}
