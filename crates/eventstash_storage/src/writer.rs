//! Appending events to batch files.

use crate::crypto::DataEncryption;
use crate::error::{StorageError, StorageResult};
use crate::framing::{encode_record, RecordKind};
use crate::orchestrator::SharedOrchestrator;
use crate::stats::{DropReason, StorageStats};
use std::sync::Arc;
use tracing::warn;

/// Writes events into the files chosen by one orchestrator.
///
/// Every event becomes exactly one record, appended with a single write.
/// Failures drop that event only; the writer stays usable.
#[derive(Clone)]
pub struct FileWriter {
    orchestrator: SharedOrchestrator,
    encryption: Option<Arc<dyn DataEncryption>>,
    stats: Arc<StorageStats>,
}

impl FileWriter {
    /// Creates a writer for the orchestrator's directory.
    pub fn new(
        orchestrator: SharedOrchestrator,
        encryption: Option<Arc<dyn DataEncryption>>,
    ) -> Self {
        let stats = Arc::clone(orchestrator.lock().stats());
        Self {
            orchestrator,
            encryption,
            stats,
        }
    }

    /// Returns the orchestrator this writer appends through.
    #[must_use]
    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }

    /// Writes one event, dropping it with a diagnostic on failure.
    pub fn write(&self, event: &[u8]) {
        let Err(e) = self.try_write(event) else {
            return;
        };

        let reason = match e {
            StorageError::Encryption(_) => DropReason::Encryption,
            StorageError::ObjectTooLarge { .. } => DropReason::Oversized,
            _ => DropReason::Io,
        };
        self.stats.record_event_dropped(reason);

        let orchestrator = self.orchestrator.lock();
        warn!(
            area = %orchestrator.label(),
            bytes = event.len(),
            error = %e,
            "dropped event"
        );
    }

    /// Writes one event.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails, the framed event exceeds
    /// `max_object_size`, or the file cannot be created or appended to.
    pub fn try_write(&self, event: &[u8]) -> StorageResult<()> {
        let record = match &self.encryption {
            Some(encryption) => encode_record(RecordKind::EncryptedEvent, &encryption.encrypt(event)?)?,
            None => encode_record(RecordKind::Event, event)?,
        };
        let size = record.len() as u64;

        let mut orchestrator = self.orchestrator.lock();
        let max = orchestrator.config().max_object_size;
        if size > max {
            return Err(StorageError::ObjectTooLarge { size, max });
        }

        let file = orchestrator.writable_file(size)?;
        file.append(&record, orchestrator.config().sync_on_write)?;
        orchestrator.record_append(file.id());
        self.stats.record_event_written(size);
        Ok(())
    }
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("encrypted", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}
