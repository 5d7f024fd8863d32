//! Inspect command implementation.

use super::{feature_dirs, list_batch_files, scan_file, CliResult, FeatureDir};
use eventstash_core::StorageArea;
use serde::Serialize;
use std::path::Path;

/// Inspection result for one storage root.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage root.
    pub path: String,
    /// One entry per feature.
    pub features: Vec<FeatureStats>,
}

/// Statistics for one feature.
#[derive(Debug, Serialize)]
pub struct FeatureStats {
    /// Feature name.
    pub name: String,
    /// Whether a LOCK file is present (a storage may be open).
    pub lock_file: bool,
    /// One entry per area.
    pub areas: Vec<AreaStats>,
}

/// Statistics for one area of a feature.
#[derive(Debug, Serialize)]
pub struct AreaStats {
    /// Area directory name.
    pub area: String,
    /// Number of batch files.
    pub files: usize,
    /// Entries that are not batch files.
    pub foreign_entries: usize,
    /// Total size in bytes.
    pub total_size: u64,
    /// Valid records across all files.
    pub records: usize,
    /// Files whose tail was discarded.
    pub damaged_files: usize,
    /// Creation time of the oldest file, in milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_file_millis: Option<u64>,
    /// Creation time of the newest file, in milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_file_millis: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, feature: Option<&str>, format: &str) -> CliResult<()> {
    let result = inspect(path, feature)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects statistics without printing them.
pub fn inspect(path: &Path, feature: Option<&str>) -> CliResult<InspectResult> {
    let features = feature_dirs(path, feature)?
        .iter()
        .map(inspect_feature)
        .collect::<CliResult<Vec<_>>>()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        features,
    })
}

fn inspect_feature(feature: &FeatureDir) -> CliResult<FeatureStats> {
    let mut areas = Vec::new();
    for area in StorageArea::ALL {
        let (files, foreign_entries) = list_batch_files(&feature.area_path(area))?;
        let mut stats = AreaStats {
            area: area.dir_name().to_string(),
            files: files.len(),
            foreign_entries,
            total_size: 0,
            records: 0,
            damaged_files: 0,
            oldest_file_millis: files.first().map(|(id, _)| id.created_at_millis()),
            newest_file_millis: files.last().map(|(id, _)| id.created_at_millis()),
        };
        for (_, file) in &files {
            let scan = scan_file(file, None)?;
            stats.total_size += scan.size;
            stats.records += scan.records;
            if scan.tail != "clean" {
                stats.damaged_files += 1;
            }
        }
        areas.push(stats);
    }

    Ok(FeatureStats {
        name: feature.name.clone(),
        lock_file: feature.path.join("LOCK").exists(),
        areas,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("EventStash Storage Inspection");
    println!("=============================");
    println!();
    println!("Path: {}", result.path);

    for feature in &result.features {
        println!();
        println!(
            "Feature: {}{}",
            feature.name,
            if feature.lock_file { " (LOCK present)" } else { "" }
        );
        for area in &feature.areas {
            println!(
                "  {:<13} {} files, {}, {} records",
                format!("{}:", area.area),
                area.files,
                format_size(area.total_size),
                area.records
            );
            if area.damaged_files > 0 {
                println!("                {} file(s) with a discarded tail", area.damaged_files);
            }
            if area.foreign_entries > 0 {
                println!("                {} foreign entries", area.foreign_entries);
            }
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstash_storage::framing::{encode_record, RecordKind};
    use eventstash_storage::FileId;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn counts_files_and_records_per_area() {
        let root = tempdir().unwrap();
        let authorized = root.path().join("logs").join("authorized");
        fs::create_dir_all(&authorized).unwrap();
        fs::create_dir_all(root.path().join("logs").join("unauthorized")).unwrap();

        let mut data = encode_record(RecordKind::Event, b"a").unwrap();
        data.extend(encode_record(RecordKind::Event, b"b").unwrap());
        fs::write(authorized.join(FileId::new(10, 0).file_name()), &data).unwrap();
        fs::write(authorized.join(FileId::new(20, 0).file_name()), b"junk").unwrap();
        fs::write(authorized.join("notes.txt"), b"").unwrap();

        let result = inspect(root.path(), None).unwrap();
        assert_eq!(result.features.len(), 1);
        let areas = &result.features[0].areas;
        let auth = areas.iter().find(|a| a.area == "authorized").unwrap();
        assert_eq!(auth.files, 2);
        assert_eq!(auth.records, 2);
        assert_eq!(auth.damaged_files, 1);
        assert_eq!(auth.foreign_entries, 1);
        assert_eq!(auth.oldest_file_millis, Some(10));
        assert_eq!(auth.newest_file_millis, Some(20));

        let unauth = areas.iter().find(|a| a.area == "unauthorized").unwrap();
        assert_eq!(unauth.files, 0);
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(10), "10 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
