//! Storage counters.
//!
//! Every dropped event and every discarded record is counted here in
//! addition to being logged, so that an embedding SDK can surface them
//! without parsing logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Why an event never reached disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The encryption capability failed.
    Encryption,
    /// A filesystem operation failed.
    Io,
    /// The framed event exceeded `max_object_size`.
    Oversized,
    /// The storage was torn down before the event was written.
    Rejected,
    /// Consent was denied when the event was written.
    Denied,
}

/// Storage statistics.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct StorageStats {
    events_written: AtomicU64,
    bytes_written: AtomicU64,
    dropped_encryption: AtomicU64,
    dropped_io: AtomicU64,
    dropped_oversized: AtomicU64,
    dropped_rejected: AtomicU64,
    dropped_denied: AtomicU64,
    files_created: AtomicU64,
    files_purged: AtomicU64,
    batches_read: AtomicU64,
    batches_skipped: AtomicU64,
    records_dropped_on_read: AtomicU64,
    migrations: AtomicU64,
    errors: AtomicU64,
}

impl StorageStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event appended to a batch file.
    pub fn record_event_written(&self, bytes: u64) {
        self.events_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records an event that was dropped.
    pub fn record_event_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Encryption => &self.dropped_encryption,
            DropReason::Io => &self.dropped_io,
            DropReason::Oversized => &self.dropped_oversized,
            DropReason::Rejected => &self.dropped_rejected,
            DropReason::Denied => &self.dropped_denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a new batch file.
    pub fn record_file_created(&self) {
        self.files_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Records files removed by retention or size limits.
    pub fn record_files_purged(&self, count: u64) {
        self.files_purged.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a batch consumed successfully.
    pub fn record_batch_read(&self) {
        self.batches_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a batch deleted as unusable.
    pub fn record_batch_skipped(&self) {
        self.batches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records records lost while reading (bad tail, failed decryption).
    pub fn record_records_dropped(&self, count: u64) {
        self.records_dropped_on_read.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an applied consent migration.
    pub fn record_migration(&self) {
        self.migrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an internal error that was absorbed.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_written: self.events_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            dropped_encryption: self.dropped_encryption.load(Ordering::Relaxed),
            dropped_io: self.dropped_io.load(Ordering::Relaxed),
            dropped_oversized: self.dropped_oversized.load(Ordering::Relaxed),
            dropped_rejected: self.dropped_rejected.load(Ordering::Relaxed),
            dropped_denied: self.dropped_denied.load(Ordering::Relaxed),
            files_created: self.files_created.load(Ordering::Relaxed),
            files_purged: self.files_purged.load(Ordering::Relaxed),
            batches_read: self.batches_read.load(Ordering::Relaxed),
            batches_skipped: self.batches_skipped.load(Ordering::Relaxed),
            records_dropped_on_read: self.records_dropped_on_read.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`StorageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events appended to batch files.
    pub events_written: u64,
    /// Framed bytes appended to batch files.
    pub bytes_written: u64,
    /// Events dropped because encryption failed.
    pub dropped_encryption: u64,
    /// Events dropped because of a filesystem error.
    pub dropped_io: u64,
    /// Events dropped for exceeding `max_object_size`.
    pub dropped_oversized: u64,
    /// Events rejected after teardown.
    pub dropped_rejected: u64,
    /// Events dropped because consent was denied.
    pub dropped_denied: u64,
    /// Batch files created.
    pub files_created: u64,
    /// Batch files purged by retention or size limits.
    pub files_purged: u64,
    /// Batches consumed successfully.
    pub batches_read: u64,
    /// Batches deleted as unusable.
    pub batches_skipped: u64,
    /// Records discarded while reading.
    pub records_dropped_on_read: u64,
    /// Consent migrations applied.
    pub migrations: u64,
    /// Internal errors absorbed.
    pub errors: u64,
}

impl StatsSnapshot {
    /// Total events dropped for any reason.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.dropped_encryption
            + self.dropped_io
            + self.dropped_oversized
            + self.dropped_rejected
            + self.dropped_denied
    }
}
