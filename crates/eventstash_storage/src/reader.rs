//! Reading batches out of the files chosen by one orchestrator.

use crate::crypto::DataEncryption;
use crate::error::StorageResult;
use crate::file::FileId;
use crate::framing::{decode_records, RecordKind, Tail};
use crate::orchestrator::SharedOrchestrator;
use crate::stats::StorageStats;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One batch file's worth of events, claimed by a consumer.
///
/// While a `Batch` is outstanding its file is excluded from both writing and
/// further reads. It must be handed back through [`FileReader::mark_batch_as_read`],
/// [`FileReader::mark_batch_as_skippable`] or [`FileReader::release_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: FileId,
    events: Vec<Vec<u8>>,
    dropped_records: usize,
    malformed: bool,
}

impl Batch {
    /// Id of the underlying file.
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Events in write order.
    #[must_use]
    pub fn events(&self) -> &[Vec<u8>] {
        &self.events
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Records that could not be recovered (damaged tail, failed decryption).
    #[must_use]
    pub fn dropped_records(&self) -> usize {
        self.dropped_records
    }

    /// Returns `true` if nothing in the file could be recovered.
    ///
    /// A malformed batch should be handed to
    /// [`FileReader::mark_batch_as_skippable`].
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }
}

/// Reads complete batches through one orchestrator.
#[derive(Clone)]
pub struct FileReader {
    orchestrator: SharedOrchestrator,
    encryption: Option<Arc<dyn DataEncryption>>,
    stats: Arc<StorageStats>,
}

impl FileReader {
    /// Creates a reader for the orchestrator's directory.
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

    /// Claims and returns the oldest readable batch, or `None`.
    ///
    /// Filesystem errors are logged and reported as "no batch".
    pub fn read_next_batch(&self) -> Option<Batch> {
        match self.try_read_next_batch() {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.record_error();
                error!(area = %self.orchestrator.lock().label(), error = %e, "failed to read batch");
                None
            }
        }
    }

    /// Claims and returns the oldest readable batch.
    ///
    /// Empty files (created but never written) are deleted and skipped. A
    /// file that cannot be read or deleted is logged, counted, and passed
    /// over for this call so newer batches are still served; a later call
    /// tries it again.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned.
    pub fn try_read_next_batch(&self) -> StorageResult<Option<Batch>> {
        let mut orchestrator = self.orchestrator.lock();
        let mut failed = Vec::new();

        loop {
            let Some(file) = orchestrator.readable_file_skipping(&failed)? else {
                return Ok(None);
            };

            let data = match file.read_all() {
                Ok(data) => data,
                Err(e) => {
                    self.stats.record_error();
                    warn!(area = %orchestrator.label(), file = %file.id(), error = %e, "failed to read batch file");
                    failed.push(file.id());
                    continue;
                }
            };
            if data.is_empty() {
                if let Err(e) = orchestrator.delete_file(file.id()) {
                    self.stats.record_error();
                    warn!(area = %orchestrator.label(), file = %file.id(), error = %e, "failed to delete empty batch file");
                    failed.push(file.id());
                }
                continue;
            }

            let decoded = decode_records(&data);
            let mut dropped = usize::from(!decoded.tail.is_clean());
            match &decoded.tail {
                Tail::Clean => {}
                Tail::Truncated { offset, bytes } => {
                    debug!(area = %orchestrator.label(), file = %file.id(), offset, bytes, "dropped truncated record");
                }
                Tail::Corrupted {
                    offset,
                    bytes,
                    reason,
                } => {
                    warn!(area = %orchestrator.label(), file = %file.id(), offset, bytes, %reason, "dropped corrupted tail");
                }
            }

            let mut events = Vec::with_capacity(decoded.records.len());
            for record in decoded.records {
                match self.open_record(record.kind, record.payload) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        dropped += 1;
                        warn!(area = %orchestrator.label(), file = %file.id(), error = %e, "dropped unreadable record");
                    }
                }
            }

            if dropped > 0 {
                self.stats.record_records_dropped(dropped as u64);
            }

            orchestrator.claim(file.id());
            let malformed = events.is_empty();
            debug!(area = %orchestrator.label(), file = %file.id(), events = events.len(), malformed, "claimed batch");

            return Ok(Some(Batch {
                id: file.id(),
                events,
                dropped_records: dropped,
                malformed,
            }));
        }
    }

    /// Deletes a consumed batch.
    pub fn mark_batch_as_read(&self, batch: Batch) {
        if self.delete_batch(batch.id) {
            self.stats.record_batch_read();
        }
    }

    /// Deletes a batch the consumer could not use, without counting it as read.
    pub fn mark_batch_as_skippable(&self, batch: Batch) {
        if self.delete_batch(batch.id) {
            self.stats.record_batch_skipped();
            warn!(area = %self.orchestrator.lock().label(), file = %batch.id, "skipped batch");
        }
    }

    /// Returns a batch to the pool so a later read can pick it up again.
    pub fn release_batch(&self, batch: Batch) {
        self.orchestrator.lock().release(batch.id);
    }

    fn delete_batch(&self, id: FileId) -> bool {
        let mut orchestrator = self.orchestrator.lock();
        match orchestrator.delete_file(id) {
            Ok(()) => true,
            Err(e) => {
                // still claimed, so it is not served again
                self.stats.record_error();
                warn!(area = %orchestrator.label(), file = %id, error = %e, "failed to delete batch");
                false
            }
        }
    }

    fn open_record(&self, kind: RecordKind, payload: Vec<u8>) -> StorageResult<Vec<u8>> {
        match (kind, &self.encryption) {
            (RecordKind::Event, _) => Ok(payload),
            (RecordKind::EncryptedEvent, Some(encryption)) => encryption.decrypt(&payload),
            (RecordKind::EncryptedEvent, None) => Err(crate::StorageError::encryption(
                "encrypted record but no encryption configured",
            )),
        }
    }
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("encrypted", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}
