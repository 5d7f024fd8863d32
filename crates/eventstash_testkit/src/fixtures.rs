//! Test fixtures and storage helpers.
//!
//! Provides a storage living in a temporary directory, with a clock that
//! only moves when the test says so.

use crate::crash::batch_files;
use eventstash_core::{
    Consent, ConsentProvider, EventStorage, FilesConfig, ManualClock, StorageArea, StorageConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Feature name used by [`TestStorage`].
pub const TEST_FEATURE: &str = "test";

/// Start time of every [`TestStorage`] clock (2023-11-14T22:13:20Z).
pub const TEST_EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// An [`EventStorage`] in a temporary directory, with automatic cleanup.
pub struct TestStorage {
    /// The storage instance.
    pub storage: EventStorage,
    /// The consent provider the storage follows.
    pub consent: ConsentProvider,
    /// The storage's clock.
    pub clock: Arc<ManualClock>,
    files: FilesConfig,
    temp_dir: TempDir,
}

impl TestStorage {
    /// Creates a storage with default file policy.
    pub fn new(consent: Consent) -> Self {
        Self::with_files(consent, FilesConfig::default())
    }

    /// Creates a storage with the given file policy.
    pub fn with_files(consent: Consent, files: FilesConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let consent = ConsentProvider::new(consent);
        let clock = Arc::new(ManualClock::at_millis(TEST_EPOCH_MILLIS));
        let storage = open(temp_dir.path(), &consent, &clock, &files);
        Self {
            storage,
            consent,
            clock,
            files,
            temp_dir,
        }
    }

    /// Drops the storage and opens a new one over the same directory, as a
    /// process restart would.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self {
            storage,
            consent,
            clock,
            files,
            temp_dir,
        } = self;
        drop(storage);
        let storage = open(temp_dir.path(), &consent, &clock, &files);
        Self {
            storage,
            consent,
            clock,
            files,
            temp_dir,
        }
    }

    /// Returns the storage root.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the directory of `area`.
    pub fn area_dir(&self, area: StorageArea) -> PathBuf {
        self.root().join(TEST_FEATURE).join(area.dir_name())
    }

    /// Lists the batch files of `area`, oldest first.
    pub fn batch_files(&self, area: StorageArea) -> Vec<PathBuf> {
        batch_files(&self.area_dir(area))
    }

    /// Moves the clock far enough for every existing file to become readable.
    pub fn settle(&self) {
        self.clock
            .advance(self.files.min_file_age_for_read + Duration::from_millis(1));
    }

    /// Reads every available batch, marks each one read, and returns all
    /// events in delivery order.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut events = Vec::new();
        while let Some(batch) = self.storage.read_next_batch() {
            events.extend_from_slice(batch.events());
            self.storage.mark_batch_as_read(batch);
        }
        events
    }
}

impl std::ops::Deref for TestStorage {
    type Target = EventStorage;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

fn open(
    root: &Path,
    consent: &ConsentProvider,
    clock: &Arc<ManualClock>,
    files: &FilesConfig,
) -> EventStorage {
    EventStorage::open(
        StorageConfig::new(root, TEST_FEATURE)
            .files(files.clone())
            .consent(consent.clone())
            .clock(clock.clone()),
    )
    .expect("Failed to open test storage")
}

/// Runs a test with a temporary storage.
pub fn with_temp_storage<F, R>(consent: Consent, f: F) -> R
where
    F: FnOnce(&TestStorage) -> R,
{
    let storage = TestStorage::new(consent);
    f(&storage)
}

/// A small files policy that makes rotation easy to trigger.
pub fn small_files() -> FilesConfig {
    FilesConfig::new()
        .max_file_size(256)
        .max_object_size(128)
        .max_directory_size(64 * 1024)
        .max_objects_in_file(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_round_trip() {
        with_temp_storage(Consent::Granted, |storage| {
            storage.write(b"one");
            storage.write(b"two");
            storage.settle();
            assert_eq!(storage.drain(), vec![b"one".to_vec(), b"two".to_vec()]);
        });
    }

    #[test]
    fn reopen_keeps_authorized_data() {
        let storage = TestStorage::new(Consent::Granted);
        storage.write(b"survives");
        let storage = storage.reopen();

        storage.settle();
        assert_eq!(storage.drain(), vec![b"survives".to_vec()]);
    }

    #[test]
    fn small_files_policy_is_valid() {
        assert!(small_files().validate().is_ok());
    }
}
