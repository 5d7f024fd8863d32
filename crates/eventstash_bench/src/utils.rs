//! Benchmark utilities.

use eventstash_core::{Consent, ConsentProvider, EventStorage, FilesConfig, StorageConfig};
use rand::Rng;
use tempfile::TempDir;

/// Generate random event data of the specified size.
pub fn random_event(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a batch of random events with sizes in `min..=max`.
pub fn random_events(count: usize, min: usize, max: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| random_event(rng.gen_range(min..=max)))
        .collect()
}

/// Files policy with small files, so a run rotates often.
pub fn small_files() -> FilesConfig {
    FilesConfig::new()
        .max_file_size(64 * 1024)
        .max_objects_in_file(100)
        .max_object_size(16 * 1024)
}

/// Opens a storage holding `events`, already flushed so that every file is
/// readable.
pub fn populated_storage(events: &[Vec<u8>]) -> (EventStorage, TempDir) {
    let (storage, dir) = open_storage(Consent::Granted, small_files());
    for event in events {
        storage.write(event);
    }
    storage.flush_and_tear_down();
    (storage, dir)
}

/// Opens a storage in a fresh temporary directory.
///
/// The storage comes first so that it is dropped before its directory.
pub fn open_storage(consent: Consent, files: FilesConfig) -> (EventStorage, TempDir) {
    let dir = TempDir::new().unwrap();
    let storage = EventStorage::open(
        StorageConfig::new(dir.path(), "bench")
            .files(files)
            .consent(ConsentProvider::new(consent)),
    )
    .unwrap();
    (storage, dir)
}
