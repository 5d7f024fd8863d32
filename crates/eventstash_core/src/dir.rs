//! Storage directory layout.
//!
//! One storage instance owns one feature directory:
//!
//! ```text
//! <root>/<feature>/
//! ├─ LOCK              # Advisory lock, held while the storage is open
//! ├─ unauthorized/     # Events written while consent is pending
//! └─ authorized/       # Events eligible for upload
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// One of the two storage areas of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    /// Holds events whose consent is not yet decided.
    Unauthorized,
    /// Holds events that may be uploaded.
    Authorized,
}

impl StorageArea {
    /// Both areas, unauthorized first.
    pub const ALL: [StorageArea; 2] = [StorageArea::Unauthorized, StorageArea::Authorized];

    /// Directory name of the area.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            StorageArea::Unauthorized => "unauthorized",
            StorageArea::Authorized => "authorized",
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// The locked directory of one feature.
///
/// Only one `StorageDirectories` can exist per feature directory at a time,
/// across processes. The lock is released on drop.
#[derive(Debug)]
pub struct StorageDirectories {
    path: PathBuf,
    _lock_file: File,
}

impl StorageDirectories {
    /// Creates `<root>/<feature>` with both areas and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryLocked` if another instance holds the lock, or an
    /// I/O error if the directories cannot be created.
    pub fn open(root: &Path, feature: &str) -> CoreResult<Self> {
        let path = root.join(feature);
        for area in StorageArea::ALL {
            fs::create_dir_all(path.join(area.dir_name()))?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked { path });
        }

        Ok(Self {
            path,
            _lock_file: lock_file,
        })
    }

    /// Returns the feature directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory of `area`.
    #[must_use]
    pub fn area_path(&self, area: StorageArea) -> PathBuf {
        self.path.join(area.dir_name())
    }
}
