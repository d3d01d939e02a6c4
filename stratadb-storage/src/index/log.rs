use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stratadb_core::{Result, StrataError};

use crate::index::tree::{Node, NodeRecord, Tree, PLACEHOLDER};
use crate::index::{encode_framed, IndexConfig};
use crate::segment::{SegmentStore, StoreConfig};

struct LogInner {
    store: SegmentStore,
    /// Byte offset of the first free position in the store.
    offset: u64,
}

/// Append-only persistence of index insertions: one `{u32 LE len}{node}`
/// frame per allocated record id, in segment files `index_0`, `index_1`, …
/// A zero length terminates the valid region; the rest is zero-filled
/// preallocation.
///
/// A single mutex serializes appends so the store offset and the next
/// record id advance together.
pub struct IndexLog {
    inner: Mutex<LogInner>,
    next_record_id: AtomicU64,
}

impl IndexLog {
    /// Open the log and replay every entry into `tree`. After replay the
    /// next record id is the count of loaded entries.
    pub fn open(dir: &Path, config: &IndexConfig, tree: &Tree) -> Result<Self> {
        let store = SegmentStore::open(
            dir,
            "index",
            StoreConfig {
                segment_size: config.segment_size,
                read_only: config.read_only,
                lock_memory: config.lock_memory,
            },
        )?;

        let size = store.size();
        let mut offset = 0u64;
        let mut count = 0u64;
        loop {
            if offset + 4 > size {
                break;
            }
            let mut head = [0u8; 4];
            store.read_at(&mut head, offset)?;
            let len = u32::from_le_bytes(head) as u64;
            if len == 0 {
                break;
            }
            if offset + 4 + len > size {
                return Err(StrataError::Corrupt(format!(
                    "index log entry at {} reaches past the end of the log",
                    offset
                )));
            }
            let mut body = vec![0u8; len as usize];
            store.read_at(&mut body, offset + 4)?;
            let record: NodeRecord = bincode::deserialize(&body).map_err(|err| {
                StrataError::Corrupt(format!("index log entry at {}: {}", offset, err))
            })?;
            tree.insert(&record.fields, record.record_id)?;
            offset += 4 + len;
            count += 1;
        }

        Ok(Self {
            inner: Mutex::new(LogInner { store, offset }),
            next_record_id: AtomicU64::new(count),
        })
    }

    /// Assign a record id to a placeholder terminal, exactly once. The log
    /// entry is durable before the id becomes visible to any caller; two
    /// racing commits for the same node observe the same id.
    pub fn commit(&self, node: &Arc<Node>) -> Result<u64> {
        let mut inner = self.inner.lock();
        let existing = node.record_id();
        if existing != PLACEHOLDER {
            return Ok(existing);
        }

        let record_id = self.next_record_id.fetch_add(1, Ordering::SeqCst);
        let frame = encode_framed(&NodeRecord {
            fields: node.fields().to_vec(),
            record_id,
        })?;
        inner.store.ensure(inner.offset + frame.len() as u64 - 1)?;
        inner.store.write_at(&frame, inner.offset)?;
        inner.offset += frame.len() as u64;

        node.set_record_id(record_id);
        Ok(record_id)
    }

    pub fn next_record_id(&self) -> u64 {
        self.next_record_id.load(Ordering::SeqCst)
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.lock().store.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.lock().store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tree::Lookup;
    use tempfile::TempDir;

    fn config() -> IndexConfig {
        IndexConfig {
            segment_size: 256,
            read_only: false,
            lock_memory: false,
        }
    }

    fn tuple(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_commit_assigns_dense_ids() {
        let dir = TempDir::new().unwrap();
        let tree = Tree::new();
        let log = IndexLog::open(dir.path(), &config(), &tree).unwrap();

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let node = tree.ensure(&tuple(&[name, "x"])).unwrap();
            assert_eq!(log.commit(&node).unwrap(), i as u64);
        }
        assert_eq!(log.next_record_id(), 3);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let tree = Tree::new();
        let log = IndexLog::open(dir.path(), &config(), &tree).unwrap();

        let node = tree.ensure(&tuple(&["a", "b"])).unwrap();
        let first = log.commit(&node).unwrap();
        let second = log.commit(&node).unwrap();
        assert_eq!(first, second);
        assert_eq!(log.next_record_id(), 1);
    }

    #[test]
    fn test_replay_restores_tree() {
        let dir = TempDir::new().unwrap();
        {
            let tree = Tree::new();
            let log = IndexLog::open(dir.path(), &config(), &tree).unwrap();
            for name in ["a", "b", "c", "d", "e"] {
                let node = tree.ensure(&tuple(&[name, "leaf"])).unwrap();
                log.commit(&node).unwrap();
            }
            log.close().unwrap();
        }

        let tree = Tree::new();
        let log = IndexLog::open(dir.path(), &config(), &tree).unwrap();
        assert_eq!(log.next_record_id(), 5);

        match tree.find_one(&tuple(&["c", "leaf"])).unwrap() {
            Lookup::Ready(node) => assert_eq!(node.record_id(), 2),
            Lookup::Deferred(_) => panic!("unexpected deferred branch"),
        }

        // replayed log keeps appending after the last entry
        let node = tree.ensure(&tuple(&["f", "leaf"])).unwrap();
        assert_eq!(log.commit(&node).unwrap(), 5);
    }
}
