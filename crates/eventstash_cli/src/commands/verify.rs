//! Verify command implementation.
//!
//! A torn final record is what a crash mid-append leaves behind and is
//! reported as a warning. Anything else a reader would have to discard
//! fails the verification.

use super::{feature_dirs, list_batch_files, load_encryption, scan_file, CliError, CliResult};
use eventstash_core::StorageArea;
use eventstash_storage::DataEncryption;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of files checked.
    pub files_checked: usize,
    /// Number of valid records.
    pub valid_records: usize,
    /// Files ending in a torn record.
    pub warnings: Vec<String>,
    /// Files a reader would partly discard.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, feature: Option<&str>, key_hex: Option<&str>) -> CliResult<()> {
    println!("Verifying storage at {:?}", path);
    println!();

    let encryption = load_encryption(key_hex)?;
    let result = verify(path, feature, encryption.as_deref())?;

    println!("Checked {} files, {} valid records", result.files_checked, result.valid_records);
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Storage verification passed");
        Ok(())
    } else {
        println!("✗ Storage verification failed");
        Err(CliError::VerificationFailed(result.errors.len()).into())
    }
}

/// Checks every batch file without printing.
pub fn verify(
    path: &Path,
    feature: Option<&str>,
    encryption: Option<&dyn DataEncryption>,
) -> CliResult<VerifyResult> {
    let mut result = VerifyResult::default();

    for feature in feature_dirs(path, feature)? {
        for area in StorageArea::ALL {
            let (files, _) = list_batch_files(&feature.area_path(area))?;
            for (id, file) in files {
                let scan = scan_file(&file, encryption)?;
                let name = format!("{}/{}/{}", feature.name, area, id.file_name());

                result.files_checked += 1;
                result.valid_records += scan.records - scan.undecryptable_records;

                if scan.undecryptable_records > 0 {
                    result.errors.push(format!(
                        "{name}: {} record(s) failed to decrypt",
                        scan.undecryptable_records
                    ));
                }
                match scan.tail.as_str() {
                    "truncated" => result.warnings.push(format!(
                        "{name}: torn final record ({} bytes)",
                        scan.discarded_bytes
                    )),
                    "corrupted" => result.errors.push(format!(
                        "{name}: {} ({} bytes discarded)",
                        scan.reason.as_deref().unwrap_or("corrupted"),
                        scan.discarded_bytes
                    )),
                    _ => {}
                }
            }
        }
    }

    Ok(result)
}
