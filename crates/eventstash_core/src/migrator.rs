//! Moving and deleting files when consent changes.
//!
//! Every `(previous, next)` consent pair maps to exactly one
//! [`MigrationAction`]:
//!
//! | from    | to      | action                                  |
//! |---------|---------|-----------------------------------------|
//! | pending | granted | move unauthorized files to authorized   |
//! | pending | denied  | delete unauthorized files               |
//! | granted | denied  | delete authorized files not yet claimed |
//! | granted | pending | delete unauthorized leftovers           |
//! | denied  | pending | delete unauthorized leftovers           |
//! | denied  | granted | nothing                                 |
//! | x       | x       | nothing                                 |
//!
//! Denied writes are dropped before they reach disk, so there is never
//! denied data to migrate. Files are moved with a single rename each: a
//! file is always entirely in one area.

use crate::consent::Consent;
use eventstash_storage::{BatchFile, SharedOrchestrator, StorageResult, StorageStats};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a consent transition does to the stored files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationAction {
    /// Leave everything in place.
    None,
    /// Move every unauthorized file into the authorized area.
    MoveUnauthorizedToAuthorized,
    /// Delete every unauthorized file.
    DeleteUnauthorized,
    /// Delete every authorized file no reader has claimed.
    DeleteUnclaimedAuthorized,
}

impl MigrationAction {
    /// Returns the action for a transition.
    #[must_use]
    pub const fn for_transition(from: Consent, to: Consent) -> Self {
        use Consent::{Denied, Granted, Pending};
        match (from, to) {
            (Pending, Pending) | (Granted, Granted) | (Denied, Denied) => Self::None,
            (Pending, Granted) => Self::MoveUnauthorizedToAuthorized,
            (Pending, Denied) => Self::DeleteUnauthorized,
            (Granted, Denied) => Self::DeleteUnclaimedAuthorized,
            (Granted, Pending) | (Denied, Pending) => Self::DeleteUnauthorized,
            (Denied, Granted) => Self::None,
        }
    }
}

impl fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::MoveUnauthorizedToAuthorized => "move-unauthorized-to-authorized",
            Self::DeleteUnauthorized => "delete-unauthorized",
            Self::DeleteUnclaimedAuthorized => "delete-unclaimed-authorized",
        })
    }
}

/// Result of one [`DataMigrator::migrate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// The action applied for the transition.
    pub action: MigrationAction,
    /// Files moved or deleted by the action.
    pub files: usize,
    /// Whether the action failed and was queued for retry.
    pub deferred: bool,
}

/// Applies consent transitions to the two storage areas.
pub struct DataMigrator {
    unauthorized: SharedOrchestrator,
    authorized: SharedOrchestrator,
    /// Actions that failed and will be retried before the next migration.
    pending: Vec<MigrationAction>,
    stats: Arc<StorageStats>,
}

impl DataMigrator {
    /// Creates a migrator over both areas.
    pub fn new(unauthorized: SharedOrchestrator, authorized: SharedOrchestrator) -> Self {
        let stats = Arc::clone(authorized.lock().stats());
        Self {
            unauthorized,
            authorized,
            pending: Vec::new(),
            stats,
        }
    }

    /// Applies the action for `from -> to`.
    ///
    /// Failed actions from earlier transitions are retried first.
    pub fn migrate(&mut self, from: Consent, to: Consent) -> MigrationReport {
        self.retry_pending(to);

        let action = MigrationAction::for_transition(from, to);
        if action == MigrationAction::None {
            return MigrationReport {
                action,
                files: 0,
                deferred: false,
            };
        }

        debug!(%from, %to, %action, "migrating storage");
        let report = match self.apply(action) {
            Ok(files) => MigrationReport {
                action,
                files,
                deferred: false,
            },
            Err(e) => {
                self.defer(action);
                warn!(%from, %to, %action, error = %e, "migration failed, will retry");
                return MigrationReport {
                    action,
                    files: 0,
                    deferred: true,
                };
            }
        };
        self.stats.record_migration();
        report
    }

    /// Retries failed actions under the consent now in force.
    ///
    /// A move that could not complete is only retried while consent is
    /// still granted; otherwise the remaining files are deleted instead.
    pub fn retry_pending(&mut self, current: Consent) {
        for action in std::mem::take(&mut self.pending) {
            let action = match action {
                MigrationAction::MoveUnauthorizedToAuthorized if current != Consent::Granted => {
                    MigrationAction::DeleteUnauthorized
                }
                other => other,
            };
            match self.apply(action) {
                Ok(files) => {
                    self.stats.record_migration();
                    debug!(%action, files, "retried migration");
                }
                Err(e) => {
                    self.defer(action);
                    warn!(%action, error = %e, "migration retry failed");
                }
            }
        }
    }

    /// Returns the actions waiting for a retry.
    #[must_use]
    pub fn pending(&self) -> &[MigrationAction] {
        &self.pending
    }

    fn defer(&mut self, action: MigrationAction) {
        self.stats.record_error();
        if !self.pending.contains(&action) {
            self.pending.push(action);
        }
    }

    fn apply(&self, action: MigrationAction) -> StorageResult<usize> {
        match action {
            MigrationAction::None => Ok(0),
            MigrationAction::MoveUnauthorizedToAuthorized => self.move_unauthorized(),
            MigrationAction::DeleteUnauthorized => self.unauthorized.lock().delete_all(),
            MigrationAction::DeleteUnclaimedAuthorized => self.authorized.lock().delete_unclaimed(),
        }
    }

    /// Moves files oldest first; stops at the first failure, leaving the
    /// rest unauthorized.
    fn move_unauthorized(&self) -> StorageResult<usize> {
        let mut unauthorized = self.unauthorized.lock();
        let mut authorized = self.authorized.lock();

        let mut moved = 0;
        for id in unauthorized.files()? {
            let source = BatchFile::at(unauthorized.directory(), id);
            let target = authorized.adopt_file(source.path(), id)?;
            unauthorized.forget(id);
            debug!(file = %id, to = %target, "moved file to authorized");
            moved += 1;
        }
        Ok(moved)
    }
}

impl fmt::Debug for DataMigrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMigrator")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstash_storage::{FileId, FileWriter, FilesConfig, FilesOrchestrator, ManualClock};
    use proptest::prelude::*;
    use std::path::Path;
    use tempfile::tempdir;

    struct Areas {
        unauthorized: SharedOrchestrator,
        authorized: SharedOrchestrator,
    }

    fn areas(root: &Path) -> Areas {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let stats = Arc::new(StorageStats::new());
        let config = FilesConfig::new().max_file_size(64).max_object_size(64);
        let area = |name: &str| {
            FilesOrchestrator::new(root.join(name), name, config.clone(), clock.clone(), stats.clone())
                .into_shared()
        };
        Areas {
            unauthorized: area("unauthorized"),
            authorized: area("authorized"),
        }
    }

    fn write(area: &SharedOrchestrator, events: &[&[u8]]) {
        let writer = FileWriter::new(area.clone(), None);
        for event in events {
            writer.write(event);
        }
    }

    fn files(area: &SharedOrchestrator) -> Vec<FileId> {
        area.lock().files().unwrap()
    }

    #[test]
    fn every_transition_has_an_action() {
        for from in Consent::ALL {
            for to in Consent::ALL {
                let action = MigrationAction::for_transition(from, to);
                if from == to {
                    assert_eq!(action, MigrationAction::None);
                }
                if to == Consent::Granted && from == Consent::Pending {
                    assert_eq!(action, MigrationAction::MoveUnauthorizedToAuthorized);
                }
            }
        }
        assert_eq!(
            MigrationAction::for_transition(Consent::Granted, Consent::Denied),
            MigrationAction::DeleteUnclaimedAuthorized
        );
    }

    #[test]
    fn pending_to_granted_moves_files_keeping_order() {
        let root = tempdir().unwrap();
        let areas = areas(root.path());
        write(&areas.unauthorized, &[b"aaaaaaaaaaaaaaaaaaaaaaaa", b"bbbbbbbbbbbbbbbbbbbbbbbb", b"cccc"]);
        let before = files(&areas.unauthorized);
        assert!(before.len() > 1);

        let mut migrator = DataMigrator::new(areas.unauthorized.clone(), areas.authorized.clone());
        let report = migrator.migrate(Consent::Pending, Consent::Granted);

        assert_eq!(report.files, before.len());
        assert!(files(&areas.unauthorized).is_empty());
        assert_eq!(files(&areas.authorized), before);
    }

    #[test]
    fn pending_to_denied_deletes_unauthorized() {
        let root = tempdir().unwrap();
        let areas = areas(root.path());
        write(&areas.unauthorized, &[b"a"]);
        write(&areas.authorized, &[b"b"]);

        let mut migrator = DataMigrator::new(areas.unauthorized.clone(), areas.authorized.clone());
        migrator.migrate(Consent::Pending, Consent::Denied);

        assert!(files(&areas.unauthorized).is_empty());
        assert_eq!(files(&areas.authorized).len(), 1);
    }

    #[test]
    fn granted_to_denied_spares_claimed_batches() {
        let root = tempdir().unwrap();
        let areas = areas(root.path());
        write(&areas.authorized, &[b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"]);
        let all = files(&areas.authorized);
        assert_eq!(all.len(), 2);
        areas.authorized.lock().claim(all[0]);

        let mut migrator = DataMigrator::new(areas.unauthorized.clone(), areas.authorized.clone());
        let report = migrator.migrate(Consent::Granted, Consent::Denied);

        assert_eq!(report.files, 1);
        assert_eq!(files(&areas.authorized), vec![all[0]]);
    }

    #[test]
    fn failed_move_is_retried_and_never_exposed() {
        let root = tempdir().unwrap();
        let areas = areas(root.path());
        write(&areas.unauthorized, &[b"a"]);

        // authorized area cannot be created
        std::fs::write(root.path().join("authorized"), b"in the way").unwrap();

        let mut migrator = DataMigrator::new(areas.unauthorized.clone(), areas.authorized.clone());
        let report = migrator.migrate(Consent::Pending, Consent::Granted);
        assert!(report.deferred);
        assert_eq!(migrator.pending(), &[MigrationAction::MoveUnauthorizedToAuthorized]);
        assert_eq!(files(&areas.unauthorized).len(), 1);
        assert_eq!(migrator.stats.snapshot().migrations, 0);

        std::fs::remove_file(root.path().join("authorized")).unwrap();
        migrator.retry_pending(Consent::Granted);

        assert!(migrator.pending().is_empty());
        assert_eq!(migrator.stats.snapshot().migrations, 1);
        assert!(files(&areas.unauthorized).is_empty());
        assert_eq!(files(&areas.authorized).len(), 1);
    }

    #[test]
    fn failed_move_becomes_delete_once_consent_is_withdrawn() {
        let root = tempdir().unwrap();
        let areas = areas(root.path());
        write(&areas.unauthorized, &[b"a"]);
        std::fs::write(root.path().join("authorized"), b"in the way").unwrap();

        let mut migrator = DataMigrator::new(areas.unauthorized.clone(), areas.authorized.clone());
        migrator.migrate(Consent::Pending, Consent::Granted);
        std::fs::remove_file(root.path().join("authorized")).unwrap();
        migrator.migrate(Consent::Granted, Consent::Denied);

        assert!(migrator.pending().is_empty());
        assert!(files(&areas.unauthorized).is_empty());
        assert!(files(&areas.authorized).is_empty());
    }

    // the testkit strategies build on the integration-test copy of this crate
    fn consent() -> impl Strategy<Value = Consent> {
        prop::sample::select(Consent::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn migrating_twice_equals_migrating_once(
            from in consent(),
            to in consent(),
            unauthorized in 0usize..4,
            authorized in 0usize..4,
        ) {
            let root = tempdir().unwrap();
            let areas = areas(root.path());
            for _ in 0..unauthorized {
                write(&areas.unauthorized, &[&[1u8; 40]]);
            }
            for _ in 0..authorized {
                write(&areas.authorized, &[&[2u8; 40]]);
            }

            let mut migrator = DataMigrator::new(areas.unauthorized.clone(), areas.authorized.clone());
            migrator.migrate(from, to);
            let once = (files(&areas.unauthorized), files(&areas.authorized));
            migrator.migrate(from, to);
            let twice = (files(&areas.unauthorized), files(&areas.authorized));

            prop_assert_eq!(once, twice);
        }
    }
}
