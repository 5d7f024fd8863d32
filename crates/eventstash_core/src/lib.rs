//! # EventStash Core
//!
//! Consent-aware staging of telemetry events on local storage.
//!
//! Events are written to one of two areas of a feature directory: while
//! consent is pending they go to `unauthorized/`, once granted to
//! `authorized/`, and when denied they are dropped. Only authorized files
//! are ever handed to an uploader. A consent change moves or deletes files
//! between the areas according to a fixed policy (see [`MigrationAction`]).
//!
//! This crate provides:
//! - [`EventStorage`] - the facade used by producers, uploaders and shutdown
//! - [`ConsentProvider`] - a shared consent value with change notifications
//! - [`ConsentAwareWriter`], [`DataMigrator`], [`DataOrchestrator`] - the
//!   parts the facade is built from
//! - [`TaskQueue`] - the single-worker executor serializing all operations

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod consent;
mod data_orchestrator;
mod dir;
mod error;
mod migrator;
mod queue;
mod storage;
mod writer;

pub use config::StorageConfig;
pub use consent::{Consent, ConsentProvider, SubscriptionId};
pub use data_orchestrator::DataOrchestrator;
pub use dir::{StorageArea, StorageDirectories};
pub use error::{CoreError, CoreResult};
pub use migrator::{DataMigrator, MigrationAction, MigrationReport};
pub use queue::TaskQueue;
pub use storage::EventStorage;
pub use writer::ConsentAwareWriter;

pub use eventstash_storage::{
    AesGcmEncryption, Batch, Clock, DataEncryption, DropReason, EncryptionKey, FileId, FilesConfig,
    ManualClock, StatsSnapshot, SystemClock,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
