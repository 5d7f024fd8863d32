//! Batch files and their names.

use crate::error::StorageResult;
use std::cmp::Ordering;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Width of the zero-padded millisecond part of a file name.
const MILLIS_WIDTH: usize = 13;

/// Identity of a batch file, encoded in its name.
///
/// The name is the creation time in milliseconds since the epoch,
/// zero-padded to 13 digits. When that name is already taken in the target
/// directory a `-<n>` suffix is appended (`1700000000000-1`,
/// `1700000000000-2`, ...). Ordering is by creation time, then suffix, which
/// is the FIFO order batches are delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    created_at_millis: u64,
    suffix: u32,
}

impl FileId {
    /// Creates an id from its parts.
    #[must_use]
    pub const fn new(created_at_millis: u64, suffix: u32) -> Self {
        Self {
            created_at_millis,
            suffix,
        }
    }

    /// Creation time in milliseconds since the epoch.
    #[must_use]
    pub const fn created_at_millis(self) -> u64 {
        self.created_at_millis
    }

    /// Collision suffix (0 when the plain timestamp name was free).
    #[must_use]
    pub const fn suffix(self) -> u32 {
        self.suffix
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.created_at_millis)
    }

    /// Age of the file relative to `now` (zero if `now` is earlier).
    #[must_use]
    pub fn age(self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at()).unwrap_or_default()
    }

    /// The id that follows this one at the same timestamp.
    #[must_use]
    pub const fn next_suffix(self) -> Self {
        Self::new(self.created_at_millis, self.suffix + 1)
    }

    /// File name for this id.
    #[must_use]
    pub fn file_name(self) -> String {
        if self.suffix == 0 {
            format!("{:0width$}", self.created_at_millis, width = MILLIS_WIDTH)
        } else {
            format!(
                "{:0width$}-{}",
                self.created_at_millis,
                self.suffix,
                width = MILLIS_WIDTH
            )
        }
    }

    /// Parses a file name produced by [`file_name`](Self::file_name).
    ///
    /// Returns `None` for anything else.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let (millis, suffix) = match name.split_once('-') {
            Some((millis, suffix)) => (millis, suffix.parse().ok()?),
            None => (name, 0),
        };
        if !millis.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let id = Self::new(millis.parse().ok()?, suffix);
        // rejects unpadded, zero-suffixed and otherwise non-canonical names
        (id.file_name() == name).then_some(id)
    }
}

impl Ord for FileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at_millis
            .cmp(&other.created_at_millis)
            .then(self.suffix.cmp(&other.suffix))
    }
}

impl PartialOrd for FileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// A batch file on disk.
///
/// Holds no open descriptor: every append opens the file in append mode,
/// writes one complete record with a single `write_all`, and closes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    id: FileId,
    path: PathBuf,
}

impl BatchFile {
    /// Refers to an existing file `id` inside `directory`.
    #[must_use]
    pub fn at(directory: &Path, id: FileId) -> Self {
        Self {
            id,
            path: directory.join(id.file_name()),
        }
    }

    /// Creates a new, empty file. Fails if the name is already taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists or cannot be created.
    pub fn create(directory: &Path, id: FileId) -> StorageResult<Self> {
        let file = Self::at(directory, id);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file.path)?;
        Ok(file)
    }

    /// Returns the file's id.
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Returns the path to the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the file is still present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file's metadata cannot be read.
    pub fn size(&self) -> StorageResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Appends one framed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, record: &[u8], sync: bool) -> StorageResult<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(record)?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Deletes the file. A file that is already gone counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than "not found".
    pub fn delete(&self) -> StorageResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
