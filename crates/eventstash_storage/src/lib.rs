//! # EventStash Storage
//!
//! Batch files and the policies that decide which one is written or read.
//!
//! This crate is the lowest layer of EventStash. It knows nothing about
//! consent: it manages one directory of batch files at a time.
//!
//! ## Components
//!
//! - [`FilesOrchestrator`] - picks the writable file (rotating by size, age
//!   and object count) and the next readable file (oldest settled, unclaimed)
//! - [`FileWriter`] - frames, optionally encrypts, and appends one event
//! - [`FileReader`] - claims a whole file as a [`Batch`] and splits it back
//!   into events, tolerating a torn tail
//! - [`framing`] - the self-describing record format
//! - [`DataEncryption`] / [`AesGcmEncryption`] - per-record encryption
//!
//! ## Example
//!
//! ```rust
//! use eventstash_storage::{FileReader, FileWriter, FilesConfig, FilesOrchestrator, StorageStats, SystemClock};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let orchestrator = FilesOrchestrator::new(
//!     dir.path(),
//!     "authorized",
//!     FilesConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(StorageStats::new()),
//! )
//! .into_shared();
//!
//! let writer = FileWriter::new(orchestrator.clone(), None);
//! writer.write(b"event");
//!
//! orchestrator.lock().mark_all_files_as_readable();
//! let reader = FileReader::new(orchestrator, None);
//! let batch = reader.read_next_batch().unwrap();
//! assert_eq!(batch.events(), &[b"event".to_vec()]);
//! reader.mark_batch_as_read(batch);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod crypto;
mod error;
mod file;
pub mod framing;
mod orchestrator;
mod reader;
mod stats;
mod writer;

pub use clock::{millis_since_epoch, Clock, ManualClock, SystemClock};
pub use config::FilesConfig;
pub use crypto::{AesGcmEncryption, DataEncryption, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::{BatchFile, FileId};
pub use orchestrator::{FilesOrchestrator, SharedOrchestrator};
pub use reader::{Batch, FileReader};
pub use stats::{DropReason, StatsSnapshot, StorageStats};
pub use writer::FileWriter;
