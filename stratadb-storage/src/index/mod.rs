//! The epoch index: an in-memory field-tuple trie backed by an append-only
//! log, with an optional per-branch snapshot for lazy read-only loading.

pub mod log;
pub mod snapshot;
pub mod tree;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratadb_core::{validate_fields, validate_pattern, Result, StrataError};

use self::log::IndexLog;
use self::snapshot::Snapshot;
use self::tree::{Lookup, Node, NodeRecord, Tree, PLACEHOLDER};

/// Configuration shared by the index log and snapshot stores.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub segment_size: u64,
    pub read_only: bool,
    pub lock_memory: bool,
}

/// Encode one node record as a `{u32 LE len}{bincode body}` frame.
pub(crate) fn encode_framed(record: &NodeRecord) -> Result<Bytes> {
    let body = bincode::serialize(record)
        .map_err(|err| StrataError::Serialization(err.to_string()))?;
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decode the next frame from `buf` at `*pos`. Returns `None` at the
/// zero-length terminator or when no full header remains.
pub(crate) fn decode_framed(buf: &[u8], pos: &mut usize) -> Result<Option<NodeRecord>> {
    if *pos + 4 > buf.len() {
        return Ok(None);
    }
    let len = (&buf[*pos..]).get_u32_le() as usize;
    if len == 0 {
        return Ok(None);
    }
    if *pos + 4 + len > buf.len() {
        return Err(StrataError::Corrupt(format!(
            "frame length {} at {} reaches past the end",
            len, *pos
        )));
    }
    let record = bincode::deserialize(&buf[*pos + 4..*pos + 4 + len])
        .map_err(|err| StrataError::Corrupt(format!("frame at {}: {}", *pos, err)))?;
    *pos += 4 + len;
    Ok(Some(record))
}

/// One epoch's index. Read-write indexes replay the log on open and write a
/// snapshot best-effort on close; read-only indexes prefer the snapshot and
/// hydrate branches on demand.
pub struct Index {
    dir: PathBuf,
    config: IndexConfig,
    tree: Tree,
    log: Option<IndexLog>,
    snapshot: Option<Snapshot>,
}

impl Index {
    pub fn open(dir: &Path, config: IndexConfig) -> Result<Self> {
        let tree = Tree::new();
        let (log, snapshot) = if config.read_only && Snapshot::exists(dir) {
            let snapshot = Snapshot::open(dir, &config)?;
            snapshot.load_roots(&tree)?;
            (None, Some(snapshot))
        } else {
            let log = IndexLog::open(dir, &config, &tree)?;
            (Some(log), None)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            tree,
            log,
            snapshot,
        })
    }

    /// Walk or create the path for `fields` and return its terminal node
    /// with a real record id. A new tuple is durable in the log before the
    /// id is handed to any caller; concurrent calls for the same tuple
    /// observe the same id.
    pub fn ensure(&self, fields: &[String]) -> Result<Arc<Node>> {
        assert!(
            !self.config.read_only,
            "ensure called on a read-only index"
        );
        validate_fields(fields)?;

        let node = self.tree.ensure(fields)?;
        if node.record_id() == PLACEHOLDER {
            self.log
                .as_ref()
                .expect("read-write index always has a log")
                .commit(&node)?;
        }
        Ok(node)
    }

    /// All terminal nodes matching `pattern` ("`*`" fans out), sorted by
    /// field tuple. Missing paths yield an empty result.
    pub fn find(&self, pattern: &[String]) -> Result<Vec<Arc<Node>>> {
        validate_pattern(pattern)?;
        loop {
            match self.tree.find(pattern) {
                Lookup::Ready(mut nodes) => {
                    nodes.sort_by(|a, b| a.fields().cmp(b.fields()));
                    return Ok(nodes);
                }
                Lookup::Deferred(node) => self.load_branch(&node)?,
            }
        }
    }

    /// Exact lookup; rejects wildcards and empty strings.
    pub fn find_one(&self, fields: &[String]) -> Result<Arc<Node>> {
        validate_fields(fields)?;
        loop {
            match self.tree.find_one(fields)? {
                Lookup::Ready(node) => return Ok(node),
                Lookup::Deferred(node) => self.load_branch(&node)?,
            }
        }
    }

    fn load_branch(&self, node: &Arc<Node>) -> Result<()> {
        match &self.snapshot {
            Some(snapshot) => snapshot.load_branch(node),
            None => Err(StrataError::Corrupt(
                "unloaded index branch without a snapshot".to_string(),
            )),
        }
    }

    pub fn next_record_id(&self) -> u64 {
        self.log.as_ref().map(IndexLog::next_record_id).unwrap_or(0)
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(log) = &self.log {
            log.sync()?;
        }
        Ok(())
    }

    /// Close the index. A read-write index first writes its snapshot; a
    /// failure there is logged, not fatal.
    pub fn close(&self) -> Result<()> {
        if !self.config.read_only {
            if let Err(err) = self.write_snapshot() {
                tracing::warn!(
                    dir = %self.dir.display(),
                    error = %err,
                    "failed to write index snapshot"
                );
            }
        }

        let mut result = Ok(());
        if let Some(log) = &self.log {
            if let Err(err) = log.close() {
                result = Err(err);
            }
        }
        if let Some(snapshot) = &self.snapshot {
            if let Err(err) = snapshot.close() {
                result = Err(err);
            }
        }
        result
    }

    fn write_snapshot(&self) -> Result<()> {
        let snapshot = Snapshot::open(
            &self.dir,
            &IndexConfig {
                read_only: false,
                ..self.config.clone()
            },
        )?;
        let written = snapshot.write_tree(&self.tree);
        let closed = snapshot.close();
        written.and(closed)
    }
}
