//! Operations spanning both storage areas.

use crate::dir::StorageArea;
use eventstash_storage::{SharedOrchestrator, StorageResult};
use tracing::debug;

/// Owns the orchestrators of both areas.
#[derive(Debug, Clone)]
pub struct DataOrchestrator {
    unauthorized: SharedOrchestrator,
    authorized: SharedOrchestrator,
}

impl DataOrchestrator {
    /// Creates a data orchestrator over both areas.
    pub fn new(unauthorized: SharedOrchestrator, authorized: SharedOrchestrator) -> Self {
        Self {
            unauthorized,
            authorized,
        }
    }

    /// Returns the orchestrator of `area`.
    #[must_use]
    pub fn area(&self, area: StorageArea) -> &SharedOrchestrator {
        match area {
            StorageArea::Unauthorized => &self.unauthorized,
            StorageArea::Authorized => &self.authorized,
        }
    }

    /// Deletes every file in both areas.
    ///
    /// Batches already handed to a reader stay claimed; marking them read
    /// afterwards is harmless.
    ///
    /// # Errors
    ///
    /// Returns the first error. Both areas are always attempted.
    pub fn delete_all_data(&self) -> StorageResult<usize> {
        let unauthorized = self.unauthorized.lock().delete_all();
        let authorized = self.authorized.lock().delete_all();
        let deleted = unauthorized? + authorized?;
        debug!(files = deleted, "deleted all data");
        Ok(deleted)
    }

    /// Seals the authorized writable file and makes every authorized file
    /// readable without waiting for it to settle.
    pub fn mark_all_files_as_readable(&self) {
        self.authorized.lock().mark_all_files_as_readable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstash_storage::{FileReader, FileWriter, FilesConfig, FilesOrchestrator, ManualClock, StorageStats};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn data_orchestrator(root: &std::path::Path) -> DataOrchestrator {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let stats = Arc::new(StorageStats::new());
        let area = |area: StorageArea| {
            FilesOrchestrator::new(
                root.join(area.dir_name()),
                area.dir_name(),
                FilesConfig::new(),
                clock.clone(),
                stats.clone(),
            )
            .into_shared()
        };
        DataOrchestrator::new(area(StorageArea::Unauthorized), area(StorageArea::Authorized))
    }

    #[test]
    fn delete_all_data_clears_both_areas() {
        let root = tempdir().unwrap();
        let data = data_orchestrator(root.path());
        for area in StorageArea::ALL {
            FileWriter::new(data.area(area).clone(), None).write(b"event");
        }

        assert_eq!(data.delete_all_data().unwrap(), 2);
        for area in StorageArea::ALL {
            assert!(data.area(area).lock().files().unwrap().is_empty());
        }
    }

    #[test]
    fn mark_all_files_as_readable_only_touches_authorized() {
        let root = tempdir().unwrap();
        let data = data_orchestrator(root.path());
        for area in StorageArea::ALL {
            FileWriter::new(data.area(area).clone(), None).write(b"event");
        }

        data.mark_all_files_as_readable();

        let authorized = FileReader::new(data.area(StorageArea::Authorized).clone(), None);
        let unauthorized = FileReader::new(data.area(StorageArea::Unauthorized).clone(), None);
        assert!(authorized.read_next_batch().is_some());
        assert!(unauthorized.read_next_batch().is_none());
    }
}
