//! # EventStash Testkit
//!
//! Test utilities for EventStash.
//!
//! This crate provides:
//! - [`TestStorage`], a storage in a temporary directory driven by a manual
//!   clock and its own consent provider
//! - Property-based test generators using proptest
//! - Crash helpers that damage batch files the way an interrupted write would
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eventstash_testkit::prelude::*;
//!
//! #[test]
//! fn granted_events_are_readable() {
//!     let storage = TestStorage::new(Consent::Granted);
//!     storage.write(b"event");
//!     storage.settle();
//!     assert_eq!(storage.drain(), vec![b"event".to_vec()]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use eventstash_core::{Consent, ConsentProvider, EventStorage, StorageArea, StorageConfig};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
