//! Rotation and retention policy for batch files.

use crate::error::{StorageError, StorageResult};
use std::time::Duration;

/// Policy applied by a [`crate::FilesOrchestrator`] to its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesConfig {
    /// Maximum size of a single batch file before rotation.
    pub max_file_size: u64,

    /// Maximum total size of one directory; oldest files are purged beyond it.
    pub max_directory_size: u64,

    /// A file older than this is never appended to again.
    pub max_file_age_for_write: Duration,

    /// A file younger than this is never handed to a reader.
    pub min_file_age_for_read: Duration,

    /// Files older than this are purged instead of read.
    pub max_file_age_for_read: Duration,

    /// Maximum number of events in one file before rotation.
    pub max_objects_in_file: u64,

    /// Maximum framed size of one event; larger events are dropped.
    pub max_object_size: u64,

    /// Whether to `fsync` after every append.
    pub sync_on_write: bool,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size: 4 * 1024 * 1024,         // 4 MiB
            max_directory_size: 512 * 1024 * 1024, // 512 MiB
            max_file_age_for_write: Duration::from_millis(4_750),
            min_file_age_for_read: Duration::from_millis(5_250),
            max_file_age_for_read: Duration::from_secs(18 * 60 * 60),
            max_objects_in_file: 500,
            max_object_size: 512 * 1024, // 512 KiB
            sync_on_write: false,
        }
    }
}

impl FilesConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum file size.
    #[must_use]
    pub const fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the maximum directory size.
    #[must_use]
    pub const fn max_directory_size(mut self, size: u64) -> Self {
        self.max_directory_size = size;
        self
    }

    /// Sets the maximum age at which a file still accepts appends.
    #[must_use]
    pub const fn max_file_age_for_write(mut self, age: Duration) -> Self {
        self.max_file_age_for_write = age;
        self
    }

    /// Sets the settling age before a file becomes readable.
    #[must_use]
    pub const fn min_file_age_for_read(mut self, age: Duration) -> Self {
        self.min_file_age_for_read = age;
        self
    }

    /// Sets the retention ceiling.
    #[must_use]
    pub const fn max_file_age_for_read(mut self, age: Duration) -> Self {
        self.max_file_age_for_read = age;
        self
    }

    /// Sets the maximum number of events per file.
    #[must_use]
    pub const fn max_objects_in_file(mut self, count: u64) -> Self {
        self.max_objects_in_file = count;
        self
    }

    /// Sets the maximum framed event size.
    #[must_use]
    pub const fn max_object_size(mut self, size: u64) -> Self {
        self.max_object_size = size;
        self
    }

    /// Sets whether every append is followed by `fsync`.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Checks that the limits are consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if a size limit is zero, if one
    /// event could never fit in a file, or if a file could become readable
    /// while it is still writable.
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_file_size == 0 || self.max_object_size == 0 || self.max_objects_in_file == 0 {
            return Err(StorageError::invalid_config(
                "file size, object size and objects per file must be non-zero",
            ));
        }
        if self.max_object_size > self.max_file_size {
            return Err(StorageError::invalid_config(format!(
                "max_object_size ({}) exceeds max_file_size ({})",
                self.max_object_size, self.max_file_size
            )));
        }
        if self.max_directory_size < self.max_file_size {
            return Err(StorageError::invalid_config(format!(
                "max_directory_size ({}) is smaller than max_file_size ({})",
                self.max_directory_size, self.max_file_size
            )));
        }
        if self.min_file_age_for_read <= self.max_file_age_for_write {
            return Err(StorageError::invalid_config(format!(
                "min_file_age_for_read ({:?}) must be greater than max_file_age_for_write ({:?})",
                self.min_file_age_for_read, self.max_file_age_for_write
            )));
        }
        if self.max_file_age_for_read <= self.min_file_age_for_read {
            return Err(StorageError::invalid_config(
                "max_file_age_for_read must be greater than min_file_age_for_read",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FilesConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_objects_in_file, 500);
    }

    #[test]
    fn builder_pattern() {
        let config = FilesConfig::new()
            .max_file_size(1024)
            .max_object_size(256)
            .sync_on_write(true);

        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.max_object_size, 256);
        assert!(config.sync_on_write);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn object_larger_than_file_rejected() {
        let config = FilesConfig::new().max_file_size(100).max_object_size(200);
        assert!(matches!(
            config.validate(),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn readable_while_writable_rejected() {
        let config = FilesConfig::new()
            .max_file_age_for_write(Duration::from_secs(10))
            .min_file_age_for_read(Duration::from_secs(5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_sizes_rejected() {
        assert!(FilesConfig::new().max_objects_in_file(0).validate().is_err());
        assert!(FilesConfig::new().max_file_size(0).validate().is_err());
    }
}
