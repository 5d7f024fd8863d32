//! Benchmark support for EventStash.

pub mod utils;
