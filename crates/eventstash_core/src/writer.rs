//! Routing writes by consent.

use crate::consent::Consent;
use crate::dir::StorageArea;
use crate::migrator::{DataMigrator, MigrationReport};
use eventstash_storage::{DropReason, FileWriter, StorageStats};
use std::sync::Arc;
use tracing::debug;

/// Sends each event to the area its consent allows.
///
/// | consent | destination                      |
/// |---------|----------------------------------|
/// | granted | authorized area                  |
/// | pending | unauthorized area                |
/// | denied  | dropped, counted as `Denied`     |
///
/// Writes and consent changes must be applied in one order; the owner
/// serializes them (see [`crate::EventStorage`]).
#[derive(Debug)]
pub struct ConsentAwareWriter {
    consent: Consent,
    unauthorized: FileWriter,
    authorized: FileWriter,
    migrator: DataMigrator,
    stats: Arc<StorageStats>,
}

impl ConsentAwareWriter {
    /// Creates a writer starting from `consent`.
    pub fn new(consent: Consent, unauthorized: FileWriter, authorized: FileWriter) -> Self {
        let migrator = DataMigrator::new(
            unauthorized.orchestrator().clone(),
            authorized.orchestrator().clone(),
        );
        let stats = Arc::clone(authorized.orchestrator().lock().stats());
        Self {
            consent,
            unauthorized,
            authorized,
            migrator,
            stats,
        }
    }

    /// Returns the consent writes are currently routed by.
    #[must_use]
    pub fn consent(&self) -> Consent {
        self.consent
    }

    /// Returns the area a write would go to, or `None` if it would be dropped.
    #[must_use]
    pub fn destination(&self) -> Option<StorageArea> {
        match self.consent {
            Consent::Granted => Some(StorageArea::Authorized),
            Consent::Pending => Some(StorageArea::Unauthorized),
            Consent::Denied => None,
        }
    }

    /// Writes one event according to the current consent.
    pub fn write(&mut self, event: &[u8]) {
        self.retry_pending_migrations();
        match self.destination() {
            Some(StorageArea::Authorized) => self.authorized.write(event),
            Some(StorageArea::Unauthorized) => self.unauthorized.write(event),
            None => {
                self.stats.record_event_dropped(DropReason::Denied);
                debug!(bytes = event.len(), "dropped event, consent denied");
            }
        }
    }

    /// Writes one event to the authorized area regardless of consent.
    ///
    /// For producers that record their own consent decision with the data.
    pub fn write_authorized(&mut self, event: &[u8]) {
        self.retry_pending_migrations();
        self.authorized.write(event);
    }

    /// Applies the migration for `from -> to` and routes later writes by `to`.
    pub fn consent_changed(&mut self, from: Consent, to: Consent) -> MigrationReport {
        if from != self.consent {
            debug!(%from, tracked = %self.consent, "consent change from an unexpected state");
        }
        let report = self.migrator.migrate(from, to);
        self.consent = to;
        report
    }

    /// Retries migrations that failed earlier.
    pub fn retry_pending_migrations(&mut self) {
        if !self.migrator.pending().is_empty() {
            self.migrator.retry_pending(self.consent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstash_storage::{FileReader, FilesConfig, FilesOrchestrator, ManualClock, SharedOrchestrator};
    use std::path::Path;
    use tempfile::tempdir;

    struct Fixture {
        writer: ConsentAwareWriter,
        unauthorized: SharedOrchestrator,
        authorized: SharedOrchestrator,
        stats: Arc<StorageStats>,
    }

    fn fixture(root: &Path, consent: Consent) -> Fixture {
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
        let unauthorized = area(StorageArea::Unauthorized);
        let authorized = area(StorageArea::Authorized);
        let writer = ConsentAwareWriter::new(
            consent,
            FileWriter::new(unauthorized.clone(), None),
            FileWriter::new(authorized.clone(), None),
        );
        Fixture {
            writer,
            unauthorized,
            authorized,
            stats,
        }
    }

    fn events(area: &SharedOrchestrator) -> Vec<Vec<u8>> {
        area.lock().mark_all_files_as_readable();
        let reader = FileReader::new(area.clone(), None);
        let mut events = Vec::new();
        while let Some(batch) = reader.read_next_batch() {
            events.extend_from_slice(batch.events());
            reader.mark_batch_as_read(batch);
        }
        events
    }

    #[test]
    fn routes_by_consent() {
        let root = tempdir().unwrap();
        let mut fx = fixture(root.path(), Consent::Pending);

        fx.writer.write(b"pending");
        fx.writer.consent_changed(Consent::Pending, Consent::Denied);
        fx.writer.write(b"denied");

        assert!(events(&fx.unauthorized).is_empty());
        assert!(events(&fx.authorized).is_empty());
        assert_eq!(fx.stats.snapshot().dropped_denied, 1);
    }

    #[test]
    fn granted_after_pending_keeps_order() {
        let root = tempdir().unwrap();
        let mut fx = fixture(root.path(), Consent::Pending);

        fx.writer.write(b"a");
        fx.writer.write(b"b");
        fx.writer.consent_changed(Consent::Pending, Consent::Granted);
        fx.writer.write(b"c");

        assert!(events(&fx.unauthorized).is_empty());
        assert_eq!(
            events(&fx.authorized),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn write_authorized_ignores_consent() {
        let root = tempdir().unwrap();
        let mut fx = fixture(root.path(), Consent::Denied);

        fx.writer.write_authorized(b"crash report");
        assert_eq!(events(&fx.authorized), vec![b"crash report".to_vec()]);
    }

    #[test]
    fn destination_follows_consent() {
        let root = tempdir().unwrap();
        let mut fx = fixture(root.path(), Consent::Pending);
        assert_eq!(fx.writer.destination(), Some(StorageArea::Unauthorized));

        fx.writer.consent_changed(Consent::Pending, Consent::Granted);
        assert_eq!(fx.writer.consent(), Consent::Granted);
        assert_eq!(fx.writer.destination(), Some(StorageArea::Authorized));

        fx.writer.consent_changed(Consent::Granted, Consent::Denied);
        assert_eq!(fx.writer.destination(), None);
    }
}
