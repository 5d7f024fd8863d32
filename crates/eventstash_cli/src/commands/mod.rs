//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod purge;
pub mod verify;

use eventstash_core::{StorageArea, VERSION};
use eventstash_storage::framing::{decode_records, RecordKind, Tail};
use eventstash_storage::{AesGcmEncryption, DataEncryption, EncryptionKey, FileId};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// No feature directory was found.
    #[error("no EventStash storage found at {}", .0.display())]
    NoStorage(PathBuf),

    /// The `--key-hex` value is not a usable key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Problems were found by `verify`.
    #[error("verification failed: {0} damaged file(s)")]
    VerificationFailed(usize),

    /// Unknown value for `--area`.
    #[error("unknown area {0:?} (expected authorized, unauthorized or all)")]
    UnknownArea(String),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// A feature directory under the storage root.
#[derive(Debug, Clone)]
pub struct FeatureDir {
    /// Feature name.
    pub name: String,
    /// Feature directory.
    pub path: PathBuf,
}

impl FeatureDir {
    /// Returns the directory of `area`.
    pub fn area_path(&self, area: StorageArea) -> PathBuf {
        self.path.join(area.dir_name())
    }
}

/// Finds the feature directories under `root`, or just `feature` if given.
pub fn feature_dirs(root: &Path, feature: Option<&str>) -> CliResult<Vec<FeatureDir>> {
    let is_feature = |path: &Path| StorageArea::ALL.iter().any(|a| path.join(a.dir_name()).is_dir());

    if let Some(name) = feature {
        let path = root.join(name);
        if !is_feature(&path) {
            return Err(CliError::NoStorage(path).into());
        }
        return Ok(vec![FeatureDir {
            name: name.to_string(),
            path,
        }]);
    }

    let mut features = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && is_feature(&path) {
            features.push(FeatureDir {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
            });
        }
    }
    if features.is_empty() {
        return Err(CliError::NoStorage(root.to_path_buf()).into());
    }
    features.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(features)
}

/// Lists the batch files of a directory, oldest first, with foreign entries
/// counted separately.
pub fn list_batch_files(dir: &Path) -> CliResult<(Vec<(FileId, PathBuf)>, usize)> {
    let mut files = Vec::new();
    let mut foreign = 0;
    if !dir.is_dir() {
        return Ok((files, foreign));
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        match entry.file_name().to_str().and_then(FileId::parse) {
            Some(id) if entry.file_type()?.is_file() => files.push((id, entry.path())),
            _ => foreign += 1,
        }
    }
    files.sort_by_key(|(id, _)| *id);
    Ok((files, foreign))
}

/// Parses a hex-encoded AES-256 key.
pub fn load_encryption(key_hex: Option<&str>) -> CliResult<Option<Arc<dyn DataEncryption>>> {
    let Some(key_hex) = key_hex else {
        return Ok(None);
    };
    let bytes = hex::decode(key_hex.trim()).map_err(|e| CliError::InvalidKey(e.to_string()))?;
    let key = EncryptionKey::from_bytes(&bytes).map_err(|e| CliError::InvalidKey(e.to_string()))?;
    Ok(Some(Arc::new(AesGcmEncryption::new(&key))))
}

/// What a scan found in one batch file.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FileScan {
    /// File size in bytes.
    pub size: u64,
    /// Valid records.
    pub records: usize,
    /// Valid records that are encrypted.
    pub encrypted_records: usize,
    /// Encrypted records that failed to decrypt (only checked with a key).
    pub undecryptable_records: usize,
    /// Bytes discarded after the last valid record.
    pub discarded_bytes: usize,
    /// `clean`, `truncated` or `corrupted`.
    pub tail: String,
    /// Why the tail was discarded, for corrupted files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FileScan {
    /// Returns `true` if a reader would drop data other than a torn tail.
    pub fn is_damaged(&self) -> bool {
        self.tail == "corrupted" || self.undecryptable_records > 0
    }
}

/// Decodes one batch file.
pub fn scan_file(path: &Path, encryption: Option<&dyn DataEncryption>) -> CliResult<FileScan> {
    let data = fs::read(path)?;
    let decoded = decode_records(&data);
    debug!(file = %path.display(), records = decoded.records.len(), "scanned batch file");

    let mut scan = FileScan {
        size: data.len() as u64,
        records: decoded.records.len(),
        discarded_bytes: decoded.tail.discarded_bytes(),
        ..FileScan::default()
    };
    for record in &decoded.records {
        if record.kind == RecordKind::EncryptedEvent {
            scan.encrypted_records += 1;
            if let Some(encryption) = encryption {
                if encryption.decrypt(&record.payload).is_err() {
                    scan.undecryptable_records += 1;
                }
            }
        }
    }
    scan.tail = match decoded.tail {
        Tail::Clean => "clean".to_string(),
        Tail::Truncated { .. } => "truncated".to_string(),
        Tail::Corrupted { reason, .. } => {
            scan.reason = Some(reason);
            "corrupted".to_string()
        }
    };
    Ok(scan)
}

/// Prints the version banner.
pub fn print_version() {
    println!("EventStash CLI v{}", env!("CARGO_PKG_VERSION"));
    println!("EventStash Core v{VERSION}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstash_storage::framing::encode_record;
    use tempfile::tempdir;

    #[test]
    fn scan_reports_truncated_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(FileId::new(1, 0).file_name());
        let mut data = encode_record(RecordKind::Event, b"one").unwrap();
        let second = encode_record(RecordKind::Event, b"two").unwrap();
        data.extend_from_slice(&second[..5]);
        fs::write(&path, &data).unwrap();

        let scan = scan_file(&path, None).unwrap();
        assert_eq!(scan.records, 1);
        assert_eq!(scan.tail, "truncated");
        assert_eq!(scan.discarded_bytes, 5);
        assert!(!scan.is_damaged());
    }

    #[test]
    fn scan_checks_decryption_with_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(FileId::new(1, 0).file_name());
        let writer_key = AesGcmEncryption::new(&EncryptionKey::generate());
        let payload = writer_key.encrypt(b"secret").unwrap();
        fs::write(&path, encode_record(RecordKind::EncryptedEvent, &payload).unwrap()).unwrap();

        let other = load_encryption(Some(&hex::encode([7u8; 32]))).unwrap().unwrap();
        let scan = scan_file(&path, Some(other.as_ref())).unwrap();
        assert_eq!(scan.encrypted_records, 1);
        assert_eq!(scan.undecryptable_records, 1);
        assert!(scan.is_damaged());
    }

    #[test]
    fn feature_dirs_require_storage_layout() {
        let root = tempdir().unwrap();
        assert!(feature_dirs(root.path(), None).is_err());

        fs::create_dir_all(root.path().join("logs").join("authorized")).unwrap();
        fs::create_dir_all(root.path().join("unrelated")).unwrap();

        let features = feature_dirs(root.path(), None).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].name, "logs");
        assert!(feature_dirs(root.path(), Some("unrelated")).is_err());
    }

    #[test]
    fn bad_keys_rejected() {
        assert!(load_encryption(Some("zz")).is_err());
        assert!(load_encryption(Some("abcd")).is_err());
        assert!(load_encryption(None).unwrap().is_none());
    }
}
