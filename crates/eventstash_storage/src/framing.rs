//! On-disk record framing.
//!
//! A batch file is a plain concatenation of records, with no file header.
//! Every record carries its own envelope so that a file cut short by a crash
//! can still be read up to the last complete record:
//!
//! ```text
//! | magic "ES" (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! `length` is little-endian and counts payload bytes only. The CRC
//! (IEEE, little-endian) covers magic through payload.
//!
//! ## Recovery Policy
//!
//! Decoding never fails. It returns the longest valid prefix plus a
//! [`Tail`] describing what, if anything, was left behind:
//!
//! - **Truncated header or payload** at the end of the file: an append that
//!   never completed. Reported as [`Tail::Truncated`].
//! - **Bad magic, unknown kind, CRC mismatch**: decoding stops at that record
//!   and the remainder is reported as [`Tail::Corrupted`]. There is no attempt
//!   to resynchronise past damaged bytes.

use crate::error::{StorageError, StorageResult};

/// Magic bytes opening every record.
pub const RECORD_MAGIC: [u8; 2] = *b"ES";

/// magic (2) + kind (1) + length (4)
pub const HEADER_SIZE: usize = 7;

/// Size of the trailing checksum.
pub const CRC_SIZE: usize = 4;

/// Largest payload a single record can carry.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// How a record's payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// The event bytes, as given by the producer.
    Event = 1,
    /// `nonce || ciphertext || tag` produced by a [`crate::DataEncryption`].
    EncryptedEvent = 2,
}

impl RecordKind {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Event),
            2 => Some(Self::EncryptedEvent),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// How the payload is stored.
    pub kind: RecordKind,
    /// Payload bytes (still encrypted for [`RecordKind::EncryptedEvent`]).
    pub payload: Vec<u8>,
}

/// What follows the last valid record of a decoded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tail {
    /// Every byte belonged to a valid record.
    Clean,
    /// The file ends in the middle of a record.
    Truncated {
        /// Offset of the incomplete record.
        offset: usize,
        /// Number of bytes discarded.
        bytes: usize,
    },
    /// A damaged record was found; it and everything after it was discarded.
    Corrupted {
        /// Offset of the damaged record.
        offset: usize,
        /// Number of bytes discarded.
        bytes: usize,
        /// What was wrong with the record.
        reason: String,
    },
}

impl Tail {
    /// Returns `true` if no bytes were discarded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    /// Number of discarded bytes.
    #[must_use]
    pub fn discarded_bytes(&self) -> usize {
        match self {
            Self::Clean => 0,
            Self::Truncated { bytes, .. } | Self::Corrupted { bytes, .. } => *bytes,
        }
    }
}

/// Result of decoding a whole batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecords {
    /// Valid records in file order.
    pub records: Vec<Record>,
    /// State of the bytes following the last valid record.
    pub tail: Tail,
}

/// Returns the number of bytes a record with `payload_len` bytes occupies on disk.
#[must_use]
pub const fn framed_size(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len + CRC_SIZE
}

/// Frames a payload into a single record.
///
/// # Errors
///
/// Returns an error if the payload exceeds [`MAX_PAYLOAD_SIZE`].
pub fn encode_record(kind: RecordKind, payload: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        StorageError::corrupted(format!(
            "record payload too large: {} bytes exceeds maximum of {MAX_PAYLOAD_SIZE} bytes",
            payload.len()
        ))
    })?;

    let mut data = Vec::with_capacity(framed_size(payload.len()));
    data.extend_from_slice(&RECORD_MAGIC);
    data.push(kind.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    let crc = crc32fast::hash(&data);
    data.extend_from_slice(&crc.to_le_bytes());

    Ok(data)
}

/// Splits a batch file back into records.
#[must_use]
pub fn decode_records(data: &[u8]) -> DecodedRecords {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;

        if remaining < HEADER_SIZE {
            return DecodedRecords {
                records,
                tail: Tail::Truncated {
                    offset,
                    bytes: remaining,
                },
            };
        }

        let header = &data[offset..offset + HEADER_SIZE];
        if header[..2] != RECORD_MAGIC {
            return corrupted(records, offset, remaining, "invalid record magic");
        }

        let Some(kind) = RecordKind::from_byte(header[2]) else {
            let reason = format!("unknown record kind {:#04x}", header[2]);
            return corrupted(records, offset, remaining, reason);
        };

        let payload_len =
            u32::from_le_bytes([header[3], header[4], header[5], header[6]]) as usize;
        let record_len = HEADER_SIZE
            .saturating_add(payload_len)
            .saturating_add(CRC_SIZE);

        if remaining < record_len {
            return DecodedRecords {
                records,
                tail: Tail::Truncated {
                    offset,
                    bytes: remaining,
                },
            };
        }

        let body_end = offset + HEADER_SIZE + payload_len;
        let crc_bytes = &data[body_end..body_end + CRC_SIZE];
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = crc32fast::hash(&data[offset..body_end]);
        if stored != computed {
            let reason = format!("checksum mismatch: expected {stored:08x}, got {computed:08x}");
            return corrupted(records, offset, remaining, reason);
        }

        records.push(Record {
            kind,
            payload: data[offset + HEADER_SIZE..body_end].to_vec(),
        });
        offset += record_len;
    }

    DecodedRecords {
        records,
        tail: Tail::Clean,
    }
}

fn corrupted(
    records: Vec<Record>,
    offset: usize,
    bytes: usize,
    reason: impl Into<String>,
) -> DecodedRecords {
    DecodedRecords {
        records,
        tail: Tail::Corrupted {
            offset,
            bytes,
            reason: reason.into(),
        },
    }
}
