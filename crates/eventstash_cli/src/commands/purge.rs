//! Purge command implementation.

use super::{feature_dirs, CliError, CliResult};
use eventstash_core::{StorageArea, StorageDirectories};
use eventstash_storage::{FilesConfig, FilesOrchestrator, StorageStats, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the purge command.
///
/// Takes the feature's lock first, so a storage that is open in another
/// process is never purged underneath it.
pub fn run(path: &Path, feature: &str, area: &str, dry_run: bool) -> CliResult<()> {
    let areas = parse_areas(area)?;

    println!("Purging {feature} at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let purged = purge(path, feature, &areas, dry_run)?;
    for (area, count) in purged {
        if dry_run {
            println!("  {area}: {count} file(s) would be deleted");
        } else {
            println!("  {area}: {count} file(s) deleted");
        }
    }

    Ok(())
}

fn parse_areas(area: &str) -> CliResult<Vec<StorageArea>> {
    match area {
        "all" => Ok(StorageArea::ALL.to_vec()),
        "authorized" => Ok(vec![StorageArea::Authorized]),
        "unauthorized" => Ok(vec![StorageArea::Unauthorized]),
        other => Err(CliError::UnknownArea(other.to_string()).into()),
    }
}

/// Deletes (or counts, for a dry run) the files of each area.
pub fn purge(
    path: &Path,
    feature: &str,
    areas: &[StorageArea],
    dry_run: bool,
) -> CliResult<Vec<(StorageArea, usize)>> {
    // opening the directories would create a missing feature
    feature_dirs(path, Some(feature))?;
    let directories = StorageDirectories::open(path, feature)?;
    let stats = Arc::new(StorageStats::new());

    let mut purged = Vec::new();
    for &area in areas {
        let mut orchestrator = FilesOrchestrator::new(
            directories.area_path(area),
            format!("{feature}/{area}"),
            FilesConfig::default(),
            Arc::new(SystemClock),
            Arc::clone(&stats),
        );
        let count = if dry_run {
            orchestrator.files()?.len()
        } else {
            let deleted = orchestrator.delete_all()?;
            info!(feature, %area, deleted, "purged area");
            deleted
        };
        purged.push((area, count));
    }

    Ok(purged)
}
