//! Crash simulation for batch files.
//!
//! A process killed in the middle of an append leaves a batch file whose
//! last record is cut short. These helpers produce that damage (and worse)
//! directly on disk so tests can check what a reader recovers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eventstash_testkit::prelude::*;
//!
//! let storage = TestStorage::new(Consent::Granted);
//! storage.write(b"complete");
//! storage.write(b"torn");
//! let storage = storage.reopen();
//!
//! let file = &storage.batch_files(StorageArea::Authorized)[0];
//! truncate_file_by(file, 3).unwrap();
//! ```

use eventstash_storage::FileId;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Lists the batch files in `dir`, oldest first. Other entries are skipped.
pub fn batch_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(FileId, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let id = entry.file_name().to_str().and_then(FileId::parse)?;
            Some((id, entry.path()))
        })
        .collect();
    files.sort_by_key(|(id, _)| *id);
    files.into_iter().map(|(_, path)| path).collect()
}

/// Cuts `bytes` off the end of a file, as an interrupted append would.
///
/// Returns the new length.
pub fn truncate_file_by(path: &Path, bytes: u64) -> io::Result<u64> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len().saturating_sub(bytes);
    file.set_len(len)?;
    Ok(len)
}

/// Appends arbitrary bytes after the last record.
pub fn append_garbage(path: &Path, garbage: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(garbage)
}

/// Inverts every bit of the byte at `offset`.
pub fn flip_byte(path: &Path, offset: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&[!byte[0]])
}

/// Writes a batch file with raw contents into `dir`, as if left behind by
/// an earlier process.
pub fn write_raw_batch(dir: &Path, id: FileId, contents: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(id.file_name());
    fs::write(&path, contents)?;
    Ok(path)
}
