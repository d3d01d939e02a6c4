//! stratadb storage - the on-disk time-series engine
//!
//! Building blocks, leaves first:
//! - Segmented memory-mapped stores that grow as equal-size files
//! - Blocks: record arrays with lock-free point accumulation on mapped memory
//! - The field-tuple index: trie + append log + per-branch snapshot
//! - Epochs pairing one index with one block under a fixed time window
//! - The durable metadata record with a coalescing flusher

pub mod block;
pub mod epoch;
pub mod index;
pub mod metadata;
pub mod segment;

pub use block::{Block, BlockConfig};
pub use epoch::{Epoch, EpochConfig};
pub use index::{Index, IndexConfig};
pub use metadata::{Metadata, METADATA_LEN};
pub use segment::{SegmentStore, StoreConfig};
