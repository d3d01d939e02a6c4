use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use stratadb_core::{Result, StrataError};

use crate::index::tree::{Branch, Node, Tree};
use crate::index::{decode_framed, encode_framed, IndexConfig};
use crate::segment::{SegmentStore, StoreConfig};

/// Offset-indexed compact form of the index, used by read-only epochs to
/// load branches lazily.
///
/// Two streams: `index_snap_data_*` holds each branch's descendants as
/// `{u32 LE len}{node}` frames; `index_snap_root_*` holds one
/// `{u32 LE len}{top-level node}{data_start: u32 LE}{data_end: u32 LE}`
/// entry per branch, pointing at its data window.
pub struct Snapshot {
    root_store: SegmentStore,
    data_store: SegmentStore,
}

impl Snapshot {
    pub fn exists(dir: &Path) -> bool {
        dir.join("index_snap_root_0").exists()
    }

    pub fn open(dir: &Path, config: &IndexConfig) -> Result<Self> {
        let store_config = StoreConfig {
            segment_size: config.segment_size,
            read_only: config.read_only,
            lock_memory: config.lock_memory,
        };
        Ok(Self {
            root_store: SegmentStore::open(dir, "index_snap_root", store_config.clone())?,
            data_store: SegmentStore::open(dir, "index_snap_data", store_config)?,
        })
    }

    /// Serialize the whole tree, one root entry and one data window per
    /// top-level branch, and terminate both streams with a zero length.
    pub fn write_tree(&self, tree: &Tree) -> Result<()> {
        let mut root_offset = 0u64;
        let mut data_offset = 0u64;

        for top in tree.top_level()? {
            let start = data_offset;
            let mut records = Vec::new();
            Node::descendants(&top, &mut records)?;
            for record in &records {
                let frame = encode_framed(record)?;
                self.append(&self.data_store, &frame, &mut data_offset)?;
            }
            let end = data_offset;

            let frame = encode_framed(&top.to_record())?;
            let mut entry = BytesMut::with_capacity(frame.len() + 8);
            entry.put_slice(&frame);
            entry.put_u32_le(start as u32);
            entry.put_u32_le(end as u32);
            self.append(&self.root_store, &entry, &mut root_offset)?;
        }

        // zero-length terminators mark the ends of both valid regions, so
        // rewriting a shorter snapshot over an older one stays readable
        self.append(&self.root_store, &[0u8; 4], &mut root_offset)?;
        self.append(&self.data_store, &[0u8; 4], &mut data_offset)?;

        self.root_store.sync()?;
        self.data_store.sync()
    }

    fn append(&self, store: &SegmentStore, data: &[u8], offset: &mut u64) -> Result<()> {
        store.ensure(*offset + data.len() as u64 - 1)?;
        store.write_at(data, *offset)?;
        *offset += data.len() as u64;
        Ok(())
    }

    /// Scan the root stream and install every top-level branch into `tree`
    /// as an unloaded node pointing at its data window.
    pub fn load_roots(&self, tree: &Tree) -> Result<()> {
        let size = self.root_store.size();
        let data_size = self.data_store.size();
        let mut offset = 0u64;
        loop {
            if offset + 4 > size {
                break;
            }
            let mut head = [0u8; 4];
            self.root_store.read_at(&mut head, offset)?;
            let len = u32::from_le_bytes(head) as u64;
            if len == 0 {
                break;
            }
            if offset + 4 + len + 8 > size {
                return Err(StrataError::Corrupt(format!(
                    "snapshot root entry at {} reaches past the end",
                    offset
                )));
            }

            let mut body = vec![0u8; len as usize + 8];
            self.root_store.read_at(&mut body, offset + 4)?;
            let record = bincode::deserialize::<crate::index::tree::NodeRecord>(
                &body[..len as usize],
            )
            .map_err(|err| {
                StrataError::Corrupt(format!("snapshot root entry at {}: {}", offset, err))
            })?;
            let start =
                u32::from_le_bytes(body[len as usize..len as usize + 4].try_into().unwrap()) as u64;
            let end = u32::from_le_bytes(body[len as usize + 4..].try_into().unwrap()) as u64;

            if record.fields.len() != 1 {
                return Err(StrataError::Corrupt(
                    "snapshot root entry is not a top-level node".to_string(),
                ));
            }
            if start > end || end > data_size {
                return Err(StrataError::Corrupt(format!(
                    "snapshot window [{}, {}) is inconsistent",
                    start, end
                )));
            }

            tree.install_top(Node::unloaded(record.fields, record.record_id, start, end))?;
            offset += 4 + len + 8;
        }
        Ok(())
    }

    /// Decode one branch window and swap the node's children from
    /// `Unloaded` to `Loaded`. Racing loaders are serialized by the node's
    /// write lock; the loser sees a loaded branch and returns.
    pub fn load_branch(&self, node: &Arc<Node>) -> Result<()> {
        let mut children = node.children.write();
        let (start, end) = match *children {
            Branch::Unloaded { start, end } => (start, end),
            Branch::Loaded(_) => return Ok(()),
        };

        let mut buf = vec![0u8; (end - start) as usize];
        self.data_store.read_at(&mut buf, start)?;

        let mut map = HashMap::new();
        let mut pos = 0usize;
        while let Some(record) = decode_framed(&buf, &mut pos)? {
            Node::insert_path(&mut map, &record.fields, node.fields().len(), record.record_id)?;
        }
        *children = Branch::Loaded(map);
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let root = self.root_store.close();
        let data = self.data_store.close();
        root.and(data)
    }
}
