//! The storage of one telemetry feature.

use crate::config::StorageConfig;
use crate::consent::{Consent, ConsentProvider, SubscriptionId};
use crate::data_orchestrator::DataOrchestrator;
use crate::dir::{StorageArea, StorageDirectories};
use crate::error::CoreResult;
use crate::queue::TaskQueue;
use crate::writer::ConsentAwareWriter;
use eventstash_storage::{
    Batch, DropReason, FileReader, FileWriter, FilesOrchestrator, StatsSnapshot, StorageStats,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State owned by the storage's worker thread.
#[derive(Debug)]
struct StorageCore {
    writer: ConsentAwareWriter,
    reader: FileReader,
    data: DataOrchestrator,
    stats: Arc<StorageStats>,
    accepting_writes: bool,
}

impl StorageCore {
    fn write(&mut self, event: &[u8], authorized: bool) {
        if !self.accepting_writes {
            self.stats.record_event_dropped(DropReason::Rejected);
            return;
        }
        if authorized {
            self.writer.write_authorized(event);
        } else {
            self.writer.write(event);
        }
    }

    fn read_next_batch(&mut self) -> Option<Batch> {
        self.writer.retry_pending_migrations();
        self.reader.read_next_batch()
    }

    fn consent_changed(&mut self, from: Consent, to: Consent) {
        let report = self.writer.consent_changed(from, to);
        debug!(%from, %to, action = %report.action, files = report.files, "consent changed");
    }

    fn delete_all_data(&mut self) {
        if let Err(e) = self.data.delete_all_data() {
            self.stats.record_error();
            error!(error = %e, "failed to delete all data");
        }
    }

    fn flush(&mut self) {
        self.accepting_writes = false;
        self.data.mark_all_files_as_readable();
    }
}

/// Consent-aware, file-rotating storage for one telemetry feature.
///
/// Every operation runs on a dedicated worker thread, in the order it was
/// called. Producers never block and never see an error: failures are
/// logged through `tracing` and counted in [`EventStorage::stats`].
///
/// # Example
///
/// ```rust
/// use eventstash_core::{Consent, ConsentProvider, EventStorage, StorageConfig};
///
/// let root = tempfile::tempdir().unwrap();
/// let consent = ConsentProvider::new(Consent::Pending);
/// let storage = EventStorage::open(
///     StorageConfig::new(root.path(), "logs").consent(consent.clone()),
/// )
/// .unwrap();
///
/// storage.write(b"a");
/// storage.write(b"b");
/// consent.set(Consent::Granted);
///
/// storage.flush_and_tear_down();
/// let batch = storage.read_next_batch().unwrap();
/// assert_eq!(batch.events(), &[b"a".to_vec(), b"b".to_vec()]);
/// storage.mark_batch_as_read(batch);
/// ```
pub struct EventStorage {
    feature: String,
    queue: Arc<TaskQueue<StorageCore>>,
    consent: ConsentProvider,
    subscription: SubscriptionId,
    accepting_writes: AtomicBool,
    stats: Arc<StorageStats>,
    directories: StorageDirectories,
}

impl EventStorage {
    /// Opens the storage described by `config`.
    ///
    /// Takes the feature directory's lock, discards unauthorized data left
    /// by a previous process, and subscribes to consent changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the directories
    /// cannot be created, another instance holds the lock, or the worker
    /// thread cannot be started.
    pub fn open(config: StorageConfig) -> CoreResult<Self> {
        config.validate()?;

        let directories = StorageDirectories::open(&config.root, &config.feature_name)?;
        let stats = Arc::new(StorageStats::new());
        let area = |area: StorageArea| {
            FilesOrchestrator::new(
                directories.area_path(area),
                format!("{}/{}", config.feature_name, area),
                config.files.clone(),
                Arc::clone(&config.clock),
                Arc::clone(&stats),
            )
            .into_shared()
        };
        let unauthorized = area(StorageArea::Unauthorized);
        let authorized = area(StorageArea::Authorized);

        // Its consent was never resolved by the process that wrote it.
        match unauthorized.lock().delete_all() {
            Ok(0) => {}
            Ok(files) => debug!(feature = %config.feature_name, files, "discarded stale unauthorized data"),
            Err(e) => {
                stats.record_error();
                warn!(feature = %config.feature_name, error = %e, "failed to discard stale unauthorized data");
            }
        }

        let queue = Arc::new(TaskQueue::new(format!("eventstash-{}", config.feature_name)));
        let weak_queue = Arc::downgrade(&queue);
        let (subscription, initial) = config.consent.subscribe_with_current(move |from, to| {
            if let Some(queue) = weak_queue.upgrade() {
                queue.enqueue(move |core: &mut StorageCore| core.consent_changed(from, to));
            }
        });

        let core = StorageCore {
            writer: ConsentAwareWriter::new(
                initial,
                FileWriter::new(unauthorized.clone(), config.encryption.clone()),
                FileWriter::new(authorized.clone(), config.encryption.clone()),
            ),
            reader: FileReader::new(authorized.clone(), config.encryption.clone()),
            data: DataOrchestrator::new(unauthorized, authorized),
            stats: Arc::clone(&stats),
            accepting_writes: true,
        };
        if let Err(e) = queue.start(core) {
            config.consent.unsubscribe(subscription);
            return Err(e);
        }

        info!(
            feature = %config.feature_name,
            path = %directories.path().display(),
            consent = %initial,
            encrypted = config.encryption.is_some(),
            "storage opened"
        );

        Ok(Self {
            feature: config.feature_name,
            queue,
            consent: config.consent,
            subscription,
            accepting_writes: AtomicBool::new(true),
            stats,
            directories,
        })
    }

    /// Returns the feature name.
    #[must_use]
    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Returns the feature directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.directories.path()
    }

    /// Returns the consent provider this storage follows.
    #[must_use]
    pub fn consent(&self) -> &ConsentProvider {
        &self.consent
    }

    /// Stores one event according to the consent in force when it runs.
    ///
    /// Returns immediately. After [`flush_and_tear_down`](Self::flush_and_tear_down)
    /// events are rejected.
    pub fn write(&self, event: &[u8]) {
        self.submit_write(event, false);
    }

    /// Stores one event in the authorized area regardless of consent.
    pub fn write_authorized(&self, event: &[u8]) {
        self.submit_write(event, true);
    }

    /// Claims the oldest readable batch of authorized events.
    ///
    /// Runs after every operation enqueued before it and blocks until then.
    pub fn read_next_batch(&self) -> Option<Batch> {
        self.queue.sync(StorageCore::read_next_batch).flatten()
    }

    /// Deletes a batch that was uploaded.
    pub fn mark_batch_as_read(&self, batch: Batch) {
        self.queue
            .enqueue(move |core: &mut StorageCore| core.reader.mark_batch_as_read(batch));
    }

    /// Deletes a batch that can never be uploaded.
    pub fn mark_batch_as_skippable(&self, batch: Batch) {
        self.queue
            .enqueue(move |core: &mut StorageCore| core.reader.mark_batch_as_skippable(batch));
    }

    /// Returns a batch to the pool so a later read serves it again.
    pub fn release_batch(&self, batch: Batch) {
        self.queue
            .enqueue(move |core: &mut StorageCore| core.reader.release_batch(batch));
    }

    /// Applies a consent transition.
    ///
    /// Changes made through [`consent`](Self::consent) are applied
    /// automatically; this is for callers tracking consent elsewhere.
    pub fn consent_changed(&self, from: Consent, to: Consent) {
        self.queue
            .enqueue(move |core: &mut StorageCore| core.consent_changed(from, to));
    }

    /// Deletes every stored event in both areas.
    pub fn delete_all_data(&self) {
        self.queue.enqueue(StorageCore::delete_all_data);
    }

    /// Waits for every enqueued operation, makes all authorized files
    /// readable, and rejects writes from then on.
    ///
    /// Reads keep working so the remaining batches can still be drained.
    pub fn flush_and_tear_down(&self) {
        self.accepting_writes.store(false, Ordering::Release);
        if self.queue.sync(StorageCore::flush).is_none() {
            warn!(feature = %self.feature, "storage queue closed before flush");
        }
        debug!(feature = %self.feature, "storage flushed and torn down");
    }

    /// Returns a snapshot of the storage counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn submit_write(&self, event: &[u8], authorized: bool) {
        if !self.accepting_writes.load(Ordering::Acquire) {
            self.stats.record_event_dropped(DropReason::Rejected);
            return;
        }
        let event = event.to_vec();
        let accepted = self
            .queue
            .enqueue(move |core: &mut StorageCore| core.write(&event, authorized));
        if !accepted {
            self.stats.record_event_dropped(DropReason::Rejected);
        }
    }
}

impl Drop for EventStorage {
    fn drop(&mut self) {
        self.consent.unsubscribe(self.subscription);
        self.queue.drain_and_close();
    }
}

impl std::fmt::Debug for EventStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStorage")
            .field("feature", &self.feature)
            .field("path", &self.directories.path())
            .field("accepting_writes", &self.accepting_writes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
