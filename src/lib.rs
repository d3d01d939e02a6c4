//! stratadb - an embeddable time-series storage engine
//!
//! stratadb ingests fixed-granularity measurements keyed by an ordered
//! tuple of string fields and serves point ranges for tagged patterns,
//! wildcards included. It provides:
//!
//! - High write throughput: points accumulate into memory-mapped cells
//!   with lock-free atomics
//! - Range reads over recent windows at memory-access speed
//! - Epoch-per-window storage with bounded caches of open epochs
//! - A field-tuple trie persisted as an append log with a snapshot fast
//!   path for read-only epochs
//! - Retention expiry of epochs past their window
//!
//! Deterministic choice worth knowing: the epoch caches evict in FIFO
//! insertion order and lookups do not refresh that order.

pub mod cache;
pub mod config;
pub mod database;

pub use stratadb_core as core;
pub use stratadb_storage as storage;

pub use config::DatabaseConfig;
pub use database::{Chunk, Database, DatabaseInfo, DatabaseOptions};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::DatabaseConfig;
    pub use crate::core::{
        Clock, DatabaseParams, ManualClock, Point, Result, Series, StrataError, SystemClock,
    };
    pub use crate::database::{Chunk, Database, DatabaseInfo, DatabaseOptions};
}
