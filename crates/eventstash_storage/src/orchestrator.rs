//! Selection of the writable and readable batch files of one directory.
//!
//! ## Rotation
//!
//! A writer keeps appending to the file this orchestrator created last,
//! until the next append would cross `max_file_size`, the file already holds
//! `max_objects_in_file` events, or it is older than
//! `max_file_age_for_write`. Whichever limit triggers first rotates to a new
//! file. Files left behind by an earlier process are never appended to: their
//! tail may hold a torn record.
//!
//! ## Reading
//!
//! Readers get the oldest file that is at least `min_file_age_for_read` old,
//! is not the current writable file, and is not claimed by an in-flight
//! batch. Files past `max_file_age_for_read` are purged instead of read.
//!
//! ## Naming
//!
//! A new file is named after the clock's current millisecond. If a file with
//! that id or a later one already exists (fast rotation, clock going
//! backwards), the new id becomes the latest id with its suffix incremented,
//! so ids stay unique and strictly increasing in creation order.
//!
//! Files moved in with [`FilesOrchestrator::adopt_file`] keep the id they
//! were created with. Reading order is therefore creation order across both
//! origins: events buffered while consent was pending are served before any
//! file created here after them, and after any file created here before them.

use crate::clock::{millis_since_epoch, Clock};
use crate::config::FilesConfig;
use crate::error::StorageResult;
use crate::file::{BatchFile, FileId};
use crate::stats::StorageStats;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// An orchestrator shared by the writer, reader and migration of one area.
pub type SharedOrchestrator = Arc<Mutex<FilesOrchestrator>>;

/// The file currently accepting appends.
#[derive(Debug, Clone, Copy)]
struct WritableFile {
    id: FileId,
    objects: u64,
}

/// Owns one storage directory and decides which file is written or read.
#[derive(Debug)]
pub struct FilesOrchestrator {
    directory: PathBuf,
    label: String,
    config: FilesConfig,
    clock: Arc<dyn Clock>,
    stats: Arc<StorageStats>,
    writable: Option<WritableFile>,
    /// Files handed to a reader and not yet released or deleted.
    claimed: HashSet<FileId>,
    /// Set by `mark_all_files_as_readable`; lifts the settling age.
    ignore_file_age_when_reading: bool,
}

impl FilesOrchestrator {
    /// Creates an orchestrator for `directory`.
    ///
    /// The directory is created lazily on first use. `label` names the
    /// directory in diagnostics.
    pub fn new(
        directory: impl Into<PathBuf>,
        label: impl Into<String>,
        config: FilesConfig,
        clock: Arc<dyn Clock>,
        stats: Arc<StorageStats>,
    ) -> Self {
        Self {
            directory: directory.into(),
            label: label.into(),
            config,
            clock,
            stats,
            writable: None,
            claimed: HashSet::new(),
            ignore_file_age_when_reading: false,
        }
    }

    /// Wraps the orchestrator for sharing.
    #[must_use]
    pub fn into_shared(self) -> SharedOrchestrator {
        Arc::new(Mutex::new(self))
    }

    /// Returns the managed directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the policy in force.
    #[must_use]
    pub fn config(&self) -> &FilesConfig {
        &self.config
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<StorageStats> {
        &self.stats
    }

    /// Returns the file that will receive a write of `write_size` bytes.
    ///
    /// Reuses the current writable file when it can take the write,
    /// otherwise creates a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned or the new file
    /// cannot be created.
    pub fn writable_file(&mut self, write_size: u64) -> StorageResult<BatchFile> {
        self.ensure_directory()?;
        self.enforce_directory_size()?;

        if let Some(current) = self.writable {
            if let Some(file) = self.reusable(current, write_size)? {
                return Ok(file);
            }
            debug!(area = %self.label, file = %current.id, "rotating batch file");
        }

        let id = self.next_file_id()?;
        let file = BatchFile::create(&self.directory, id)?;
        self.writable = Some(WritableFile { id, objects: 0 });
        self.stats.record_file_created();
        debug!(area = %self.label, file = %id, "created batch file");
        Ok(file)
    }

    /// Records a completed append to `id`.
    pub fn record_append(&mut self, id: FileId) {
        if let Some(writable) = self.writable.as_mut().filter(|w| w.id == id) {
            writable.objects += 1;
        }
    }

    /// Returns the oldest file ready for reading, if any.
    ///
    /// Claimed files are excluded. Files past the retention ceiling are
    /// deleted along the way.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned.
    pub fn readable_file(&mut self) -> StorageResult<Option<BatchFile>> {
        self.readable_file_skipping(&[])
    }

    /// Like [`readable_file`](Self::readable_file), but passes over the
    /// files in `skip` as if they were claimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned.
    pub fn readable_file_skipping(&mut self, skip: &[FileId]) -> StorageResult<Option<BatchFile>> {
        let now = self.clock.now();

        // A writable file past its write age is closed; the next write rotates.
        if let Some(writable) = self.writable {
            if writable.id.age(now) > self.config.max_file_age_for_write {
                self.writable = None;
            }
        }

        let mut purged = 0u64;
        let mut selected = None;
        for id in self.files()? {
            let age = id.age(now);
            if age > self.config.max_file_age_for_read && !self.claimed.contains(&id) {
                self.delete_unlisted(id);
                purged += 1;
                continue;
            }
            if self.claimed.contains(&id)
                || skip.contains(&id)
                || self.writable.is_some_and(|w| w.id == id)
            {
                continue;
            }
            if self.ignore_file_age_when_reading || age >= self.config.min_file_age_for_read {
                selected = Some(BatchFile::at(&self.directory, id));
                break;
            }
        }

        if purged > 0 {
            self.stats.record_files_purged(purged);
            debug!(area = %self.label, purged, "purged files past retention");
        }
        Ok(selected)
    }

    /// Excludes `id` from reading and writing until released or deleted.
    pub fn claim(&mut self, id: FileId) {
        self.claimed.insert(id);
        if self.writable.is_some_and(|w| w.id == id) {
            self.writable = None;
        }
    }

    /// Returns a claimed file to the pool of readable files.
    pub fn release(&mut self, id: FileId) {
        self.claimed.remove(&id);
    }

    /// Returns whether `id` is claimed by a reader.
    #[must_use]
    pub fn is_claimed(&self, id: FileId) -> bool {
        self.claimed.contains(&id)
    }

    /// Deletes a file and forgets any claim on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete_file(&mut self, id: FileId) -> StorageResult<()> {
        BatchFile::at(&self.directory, id).delete()?;
        self.forget(id);
        Ok(())
    }

    /// Lists batch files in creation order. Foreign entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn files(&self) -> StorageResult<Vec<FileId>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(FileId::parse) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Deletes every file in the directory, foreign entries included.
    ///
    /// Claims are kept so that ids handed to readers are never reused.
    ///
    /// # Errors
    ///
    /// Returns the first error; the remaining files are still attempted.
    pub fn delete_all(&mut self) -> StorageResult<usize> {
        self.writable = None;

        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0;
        let mut first_error = None;
        for entry in entries {
            let result = entry.and_then(|entry| {
                if entry.file_type()?.is_file() {
                    fs::remove_file(entry.path()).map(|()| 1)
                } else {
                    Ok(0)
                }
            });
            match result {
                Ok(n) => deleted += n,
                Err(e) => {
                    warn!(area = %self.label, error = %e, "failed to delete file");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(deleted),
        }
    }

    /// Deletes every batch file not claimed by a reader.
    ///
    /// # Errors
    ///
    /// Returns the first error; the remaining files are still attempted.
    pub fn delete_unclaimed(&mut self) -> StorageResult<usize> {
        let mut deleted = 0;
        let mut first_error = None;
        for id in self.files()? {
            if self.claimed.contains(&id) {
                continue;
            }
            match self.delete_file(id) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(area = %self.label, file = %id, error = %e, "failed to delete file");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    /// Closes the writable file and lifts the settling age, so that every
    /// file becomes readable immediately.
    pub fn mark_all_files_as_readable(&mut self) {
        self.writable = None;
        self.ignore_file_age_when_reading = true;
    }

    /// Moves a batch file from another directory into this one.
    ///
    /// The file keeps its id unless that id is taken here, in which case the
    /// suffix is incremented until free. The move is a single `rename`, so
    /// the file is never visible in both directories.
    ///
    /// Since ids order reading, an adopted file is read in its creation order
    /// among the files already here, not after them. Its age also keeps
    /// counting from creation for the read retention limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the rename fails.
    pub fn adopt_file(&mut self, source: &Path, id: FileId) -> StorageResult<FileId> {
        self.ensure_directory()?;

        let mut target = id;
        while self.directory.join(target.file_name()).exists() || self.claimed.contains(&target) {
            target = target.next_suffix();
        }

        fs::rename(source, self.directory.join(target.file_name()))?;
        debug!(area = %self.label, file = %target, "adopted batch file");
        Ok(target)
    }

    /// Forgets bookkeeping for a file that left this directory.
    pub fn forget(&mut self, id: FileId) {
        self.claimed.remove(&id);
        if self.writable.is_some_and(|w| w.id == id) {
            self.writable = None;
        }
    }

    fn ensure_directory(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.directory)?;
        Ok(())
    }

    fn reusable(&self, current: WritableFile, write_size: u64) -> StorageResult<Option<BatchFile>> {
        let file = BatchFile::at(&self.directory, current.id);
        if !file.exists() || self.claimed.contains(&current.id) {
            return Ok(None);
        }
        if current.id.age(self.clock.now()) > self.config.max_file_age_for_write {
            return Ok(None);
        }
        if current.objects >= self.config.max_objects_in_file {
            return Ok(None);
        }
        if file.size()?.saturating_add(write_size) > self.config.max_file_size {
            return Ok(None);
        }
        Ok(Some(file))
    }

    fn next_file_id(&self) -> StorageResult<FileId> {
        let candidate = FileId::new(millis_since_epoch(self.clock.now()), 0);
        let latest = self
            .files()?
            .into_iter()
            .chain(self.claimed.iter().copied())
            .max();

        Ok(match latest {
            Some(latest) if latest >= candidate => {
                FileId::new(latest.created_at_millis(), latest.suffix() + 1)
            }
            _ => candidate,
        })
    }

    /// Purges the oldest unclaimed files while the directory is over its size cap.
    fn enforce_directory_size(&mut self) -> StorageResult<()> {
        let mut sized = Vec::new();
        let mut total = 0u64;
        for id in self.files()? {
            let size = BatchFile::at(&self.directory, id).size().unwrap_or(0);
            total += size;
            sized.push((id, size));
        }

        if total <= self.config.max_directory_size {
            return Ok(());
        }

        let mut purged = 0u64;
        for (id, size) in sized {
            if total <= self.config.max_directory_size {
                break;
            }
            if self.claimed.contains(&id) {
                continue;
            }
            self.delete_file(id)?;
            total -= size;
            purged += 1;
        }

        self.stats.record_files_purged(purged);
        warn!(area = %self.label, purged, "directory over size limit, purged oldest files");
        Ok(())
    }

    fn delete_unlisted(&mut self, id: FileId) {
        if let Err(e) = self.delete_file(id) {
            self.stats.record_error();
            warn!(area = %self.label, file = %id, error = %e, "failed to purge expired file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;
    use tempfile::tempdir;

    const START_MILLIS: u64 = 1_700_000_000_000;

    fn config() -> FilesConfig {
        FilesConfig::new()
            .max_file_size(100)
            .max_object_size(50)
            .max_directory_size(1_000)
            .max_objects_in_file(3)
            .max_file_age_for_write(Duration::from_secs(5))
            .min_file_age_for_read(Duration::from_secs(6))
            .max_file_age_for_read(Duration::from_secs(60))
    }

    fn orchestrator(dir: &Path, config: FilesConfig) -> (FilesOrchestrator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
        let orchestrator = FilesOrchestrator::new(
            dir.join("area"),
            "test",
            config,
            clock.clone(),
            Arc::new(StorageStats::new()),
        );
        (orchestrator, clock)
    }

    fn write(orchestrator: &mut FilesOrchestrator, bytes: &[u8]) -> FileId {
        let file = orchestrator.writable_file(bytes.len() as u64).unwrap();
        file.append(bytes, false).unwrap();
        orchestrator.record_append(file.id());
        file.id()
    }

    #[test]
    fn creates_directory_and_reuses_file() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());

        let first = write(&mut orchestrator, &[0; 10]);
        let second = write(&mut orchestrator, &[0; 10]);

        assert!(orchestrator.directory().is_dir());
        assert_eq!(first, second);
        assert_eq!(first, FileId::new(START_MILLIS, 0));
    }

    #[test]
    fn rotates_on_size() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());

        let first = write(&mut orchestrator, &[0; 60]);
        let second = write(&mut orchestrator, &[0; 50]);

        assert_ne!(first, second);
        assert_eq!(second, first.next_suffix());
        assert_eq!(orchestrator.files().unwrap(), vec![first, second]);
    }

    #[test]
    fn rotates_on_object_count() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());

        let ids: Vec<_> = (0..4).map(|_| write(&mut orchestrator, b"x")).collect();
        assert_eq!(ids[0], ids[2]);
        assert_ne!(ids[2], ids[3]);
    }

    #[test]
    fn rotates_on_age() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());

        let first = write(&mut orchestrator, b"x");
        clock.advance(Duration::from_millis(5_001));
        let second = write(&mut orchestrator, b"x");

        assert_ne!(first, second);
        assert_eq!(second.created_at_millis(), START_MILLIS + 5_001);
    }

    #[test]
    fn never_appends_to_files_from_a_previous_process() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());
        let first = write(&mut orchestrator, b"x");

        let mut restarted = FilesOrchestrator::new(
            orchestrator.directory(),
            "test",
            config(),
            clock.clone(),
            Arc::new(StorageStats::new()),
        );
        let second = write(&mut restarted, b"y");
        assert!(second > first);
    }

    #[test]
    fn ids_stay_monotonic_when_clock_goes_back() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());

        let first = write(&mut orchestrator, &[0; 90]);
        clock.set(std::time::UNIX_EPOCH + Duration::from_millis(START_MILLIS - 10_000));
        let second = write(&mut orchestrator, &[0; 90]);

        assert_eq!(second, first.next_suffix());
    }

    #[test]
    fn young_and_writable_files_are_not_readable() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());

        write(&mut orchestrator, b"x");
        assert!(orchestrator.readable_file().unwrap().is_none());

        clock.advance(Duration::from_secs(3));
        assert!(orchestrator.readable_file().unwrap().is_none());

        clock.advance(Duration::from_secs(3));
        let readable = orchestrator.readable_file().unwrap().unwrap();
        assert_eq!(readable.id().created_at_millis(), START_MILLIS);
    }

    #[test]
    fn oldest_unclaimed_file_is_read_first() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());

        let first = write(&mut orchestrator, &[0; 90]);
        let second = write(&mut orchestrator, &[0; 90]);
        clock.advance(Duration::from_secs(10));

        assert_eq!(orchestrator.readable_file().unwrap().unwrap().id(), first);
        orchestrator.claim(first);
        assert_eq!(orchestrator.readable_file().unwrap().unwrap().id(), second);
        orchestrator.claim(second);
        assert!(orchestrator.readable_file().unwrap().is_none());

        orchestrator.release(first);
        assert_eq!(orchestrator.readable_file().unwrap().unwrap().id(), first);
    }

    #[test]
    fn skipped_files_are_passed_over_without_a_claim() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());

        let first = write(&mut orchestrator, &[0; 90]);
        let second = write(&mut orchestrator, &[0; 90]);
        clock.advance(Duration::from_secs(10));

        let next = orchestrator.readable_file_skipping(&[first]).unwrap().unwrap();
        assert_eq!(next.id(), second);
        assert!(orchestrator.readable_file_skipping(&[first, second]).unwrap().is_none());
        assert!(!orchestrator.is_claimed(first));
        assert_eq!(orchestrator.readable_file().unwrap().unwrap().id(), first);
    }

    #[test]
    fn expired_files_are_purged() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());

        write(&mut orchestrator, b"x");
        clock.advance(Duration::from_secs(61));

        assert!(orchestrator.readable_file().unwrap().is_none());
        assert!(orchestrator.files().unwrap().is_empty());
        assert_eq!(orchestrator.stats().snapshot().files_purged, 1);
    }

    #[test]
    fn mark_all_files_as_readable_lifts_settling_age() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());

        let id = write(&mut orchestrator, b"x");
        orchestrator.mark_all_files_as_readable();

        assert_eq!(orchestrator.readable_file().unwrap().unwrap().id(), id);
        // the sealed file is not appended to any more
        let next = write(&mut orchestrator, b"y");
        assert_ne!(next, id);
    }

    #[test]
    fn claimed_file_is_not_reused_for_writing() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());

        let id = write(&mut orchestrator, b"x");
        orchestrator.claim(id);
        assert_ne!(write(&mut orchestrator, b"y"), id);
    }

    #[test]
    fn delete_all_keeps_claimed_ids_reserved() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());

        let id = write(&mut orchestrator, b"x");
        orchestrator.claim(id);
        fs::write(orchestrator.directory().join("stray.tmp"), b"?").unwrap();

        assert_eq!(orchestrator.delete_all().unwrap(), 2);
        assert!(orchestrator.files().unwrap().is_empty());

        let next = write(&mut orchestrator, b"y");
        assert!(next > id);
    }

    #[test]
    fn delete_unclaimed_spares_claimed_files() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());

        let first = write(&mut orchestrator, &[0; 90]);
        let second = write(&mut orchestrator, &[0; 90]);
        orchestrator.claim(first);

        assert_eq!(orchestrator.delete_unclaimed().unwrap(), 1);
        assert_eq!(orchestrator.files().unwrap(), vec![first]);
        assert!(!BatchFile::at(orchestrator.directory(), second).exists());
    }

    #[test]
    fn directory_size_cap_purges_oldest() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) =
            orchestrator(dir.path(), config().max_directory_size(200));

        let first = write(&mut orchestrator, &[0; 90]);
        write(&mut orchestrator, &[0; 90]);
        write(&mut orchestrator, &[0; 90]);
        write(&mut orchestrator, &[0; 10]);

        let files = orchestrator.files().unwrap();
        assert!(!files.contains(&first));
        assert!(orchestrator.stats().snapshot().files_purged >= 1);
    }

    #[test]
    fn adopt_file_resolves_collisions() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());
        let existing = write(&mut orchestrator, b"x");

        let source_dir = dir.path().join("other");
        fs::create_dir_all(&source_dir).unwrap();
        let source = BatchFile::create(&source_dir, existing).unwrap();
        source.append(b"moved", false).unwrap();

        let adopted = orchestrator.adopt_file(source.path(), existing).unwrap();
        assert_eq!(adopted, existing.next_suffix());
        assert!(!source.exists());
        assert_eq!(
            BatchFile::at(orchestrator.directory(), adopted).read_all().unwrap(),
            b"moved"
        );
    }

    #[test]
    fn adopted_file_is_read_in_creation_order() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, clock) = orchestrator(dir.path(), config());

        let source_dir = dir.path().join("other");
        fs::create_dir_all(&source_dir).unwrap();
        let older = FileId::new(START_MILLIS - 10_000, 0);
        BatchFile::create(&source_dir, older)
            .unwrap()
            .append(b"pending", false)
            .unwrap();

        let local = write(&mut orchestrator, b"granted");
        let adopted = orchestrator
            .adopt_file(&source_dir.join(older.file_name()), older)
            .unwrap();
        assert_eq!(adopted, older);

        clock.advance(Duration::from_secs(7));
        let first = orchestrator.readable_file().unwrap().unwrap();
        assert_eq!(first.id(), older);
        orchestrator.claim(first.id());
        let second = orchestrator.readable_file().unwrap().unwrap();
        assert_eq!(second.id(), local);
    }

    #[test]
    fn missing_directory_has_no_files() {
        let dir = tempdir().unwrap();
        let (mut orchestrator, _clock) = orchestrator(dir.path(), config());
        assert!(orchestrator.files().unwrap().is_empty());
        assert!(orchestrator.readable_file().unwrap().is_none());
        assert_eq!(orchestrator.delete_all().unwrap(), 0);
    }
}
