//! Storage configuration.

use crate::consent::ConsentProvider;
use crate::error::{CoreError, CoreResult};
use eventstash_storage::{Clock, DataEncryption, FilesConfig, SystemClock};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for opening an [`crate::EventStorage`].
#[derive(Clone)]
pub struct StorageConfig {
    /// Directory holding the storage of every feature.
    pub root: PathBuf,

    /// Subdirectory of `root` owned by this storage (e.g. `"logs"`).
    pub feature_name: String,

    /// Rotation and retention policy, applied to both areas.
    pub files: FilesConfig,

    /// Consent source; its current value is the initial consent.
    pub consent: ConsentProvider,

    /// Per-event encryption, if any.
    pub encryption: Option<Arc<dyn DataEncryption>>,

    /// Time source for file naming and ages.
    pub clock: Arc<dyn Clock>,
}

impl StorageConfig {
    /// Creates a configuration with default policy, pending consent, no
    /// encryption and the system clock.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, feature_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            feature_name: feature_name.into(),
            files: FilesConfig::default(),
            consent: ConsentProvider::default(),
            encryption: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the files policy.
    #[must_use]
    pub fn files(mut self, files: FilesConfig) -> Self {
        self.files = files;
        self
    }

    /// Sets the consent provider.
    #[must_use]
    pub fn consent(mut self, consent: ConsentProvider) -> Self {
        self.consent = consent;
        self
    }

    /// Enables per-event encryption.
    #[must_use]
    pub fn encryption(mut self, encryption: Arc<dyn DataEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the files policy is inconsistent or the feature
    /// name is not a single path component.
    pub fn validate(&self) -> CoreResult<()> {
        self.files.validate()?;

        let name = self.feature_name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(CoreError::invalid_config(format!(
                "feature name {name:?} must be a single directory name"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("root", &self.root)
            .field("feature_name", &self.feature_name)
            .field("files", &self.files)
            .field("consent", &self.consent)
            .field("encrypted", &self.encryption.is_some())
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::Consent;

    #[test]
    fn defaults() {
        let config = StorageConfig::new("/tmp/stash", "logs");
        assert_eq!(config.feature_name, "logs");
        assert_eq!(config.files, FilesConfig::default());
        assert_eq!(config.consent.current(), Consent::Pending);
        assert!(config.encryption.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_path_like_feature_names() {
        for name in ["", ".", "..", "a/b", "a\\b"] {
            let config = StorageConfig::new("/tmp/stash", name);
            assert!(
                matches!(config.validate(), Err(CoreError::InvalidConfig { .. })),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn rejects_invalid_files_policy() {
        let config =
            StorageConfig::new("/tmp/stash", "logs").files(FilesConfig::new().max_file_size(0));
        assert!(matches!(config.validate(), Err(CoreError::Storage(_))));
    }
}
