use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stratadb_core::{Result, StrataError, WILDCARD};

/// Sentinel record id for interior-only nodes that carry no record yet.
pub const PLACEHOLDER: u64 = u64::MAX;

/// Serialized form of one trie node, as written to the index log and the
/// snapshot streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub fields: Vec<String>,
    pub record_id: u64,
}

/// Children of a node. `Unloaded` marks a snapshot branch whose entries
/// still live in the data stream window `[start, end)`.
pub(crate) enum Branch {
    Unloaded { start: u64, end: u64 },
    Loaded(HashMap<String, Arc<Node>>),
}

/// One trie node: the full field path from the root, the record id (or
/// `PLACEHOLDER`), and the children keyed by the next field value. The
/// children lock is shared for traversal, exclusive for mutation.
pub struct Node {
    fields: Vec<String>,
    record_id: AtomicU64,
    pub(crate) children: RwLock<Branch>,
}

impl Node {
    pub(crate) fn new(fields: Vec<String>, record_id: u64) -> Arc<Self> {
        Arc::new(Self {
            fields,
            record_id: AtomicU64::new(record_id),
            children: RwLock::new(Branch::Loaded(HashMap::new())),
        })
    }

    pub(crate) fn unloaded(fields: Vec<String>, record_id: u64, start: u64, end: u64) -> Arc<Self> {
        Arc::new(Self {
            fields,
            record_id: AtomicU64::new(record_id),
            children: RwLock::new(Branch::Unloaded { start, end }),
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn record_id(&self) -> u64 {
        self.record_id.load(Ordering::Acquire)
    }

    pub fn is_placeholder(&self) -> bool {
        self.record_id() == PLACEHOLDER
    }

    pub(crate) fn set_record_id(&self, record_id: u64) {
        self.record_id.store(record_id, Ordering::Release);
    }

    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            fields: self.fields.clone(),
            record_id: self.record_id(),
        }
    }

    /// Insert a full field path into `map`, which holds the children of the
    /// node at depth `depth - 1`. Intermediate nodes materialize as
    /// placeholders; an existing terminal keeps its id unless the record
    /// carries a real one.
    pub(crate) fn insert_path(
        map: &mut HashMap<String, Arc<Node>>,
        fields: &[String],
        depth: usize,
        record_id: u64,
    ) -> Result<()> {
        if depth >= fields.len() {
            return Err(StrataError::Corrupt(
                "index entry shorter than its branch path".to_string(),
            ));
        }
        let child = map
            .entry(fields[depth].clone())
            .or_insert_with(|| Node::new(fields[..=depth].to_vec(), PLACEHOLDER));
        if depth == fields.len() - 1 {
            if record_id != PLACEHOLDER {
                child.set_record_id(record_id);
            }
            return Ok(());
        }
        let child = Arc::clone(child);
        let mut children = child.children.write();
        match &mut *children {
            Branch::Loaded(inner) => Self::insert_path(inner, fields, depth + 1, record_id),
            Branch::Unloaded { .. } => Err(StrataError::Corrupt(
                "insert into an unloaded index branch".to_string(),
            )),
        }
    }

    /// Collect the serialized records of every descendant, depth-first with
    /// sorted children so the output is deterministic.
    pub(crate) fn descendants(node: &Arc<Node>, out: &mut Vec<NodeRecord>) -> Result<()> {
        let children = node.children.read();
        let map = match &*children {
            Branch::Loaded(map) => map,
            Branch::Unloaded { .. } => {
                return Err(StrataError::Corrupt(
                    "cannot serialize an unloaded index branch".to_string(),
                ))
            }
        };
        let mut names: Vec<&String> = map.keys().collect();
        names.sort();
        for name in names {
            let child = &map[name];
            out.push(child.to_record());
            Self::descendants(child, out)?;
        }
        Ok(())
    }
}

/// Result of a tree lookup: either the answer, or the unloaded snapshot
/// branch the caller must hydrate before retrying.
pub(crate) enum Lookup<T> {
    Ready(T),
    Deferred(Arc<Node>),
}

/// The in-memory trie keyed by ordered field tuples.
pub struct Tree {
    root: Arc<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Node::new(Vec::new(), PLACEHOLDER),
        }
    }

    /// Walk or create the path for `fields` and return the terminal node.
    /// The terminal starts as a placeholder; the index log assigns its id.
    pub fn ensure(&self, fields: &[String]) -> Result<Arc<Node>> {
        let mut node = Arc::clone(&self.root);
        for depth in 0..fields.len() {
            node = Self::child_or_create(&node, fields, depth)?;
        }
        Ok(node)
    }

    fn child_or_create(node: &Arc<Node>, fields: &[String], depth: usize) -> Result<Arc<Node>> {
        let name = &fields[depth];
        {
            let children = node.children.read();
            match &*children {
                Branch::Loaded(map) => {
                    if let Some(child) = map.get(name) {
                        return Ok(Arc::clone(child));
                    }
                }
                Branch::Unloaded { .. } => {
                    return Err(StrataError::Corrupt(
                        "ensure on an unloaded index branch".to_string(),
                    ))
                }
            }
        }

        let mut children = node.children.write();
        match &mut *children {
            Branch::Loaded(map) => {
                let child = map
                    .entry(name.clone())
                    .or_insert_with(|| Node::new(fields[..=depth].to_vec(), PLACEHOLDER));
                Ok(Arc::clone(child))
            }
            Branch::Unloaded { .. } => Err(StrataError::Corrupt(
                "ensure on an unloaded index branch".to_string(),
            )),
        }
    }

    /// Insert a replayed entry by path.
    pub fn insert(&self, fields: &[String], record_id: u64) -> Result<()> {
        let node = self.ensure(fields)?;
        if record_id != PLACEHOLDER {
            node.set_record_id(record_id);
        }
        Ok(())
    }

    /// All terminal nodes matching `pattern` under the `"*"` wildcard
    /// semantics. Missing paths yield an empty result.
    pub(crate) fn find(&self, pattern: &[String]) -> Lookup<Vec<Arc<Node>>> {
        let mut nodes = Vec::new();
        match Self::collect(&self.root, pattern, &mut nodes) {
            Some(deferred) => Lookup::Deferred(deferred),
            None => Lookup::Ready(nodes),
        }
    }

    fn collect(
        node: &Arc<Node>,
        pattern: &[String],
        out: &mut Vec<Arc<Node>>,
    ) -> Option<Arc<Node>> {
        if pattern.is_empty() {
            if !node.is_placeholder() {
                out.push(Arc::clone(node));
            }
            return None;
        }

        let children = node.children.read();
        let map = match &*children {
            Branch::Unloaded { .. } => return Some(Arc::clone(node)),
            Branch::Loaded(map) => map,
        };

        if pattern[0] == WILDCARD {
            for child in map.values() {
                if let Some(deferred) = Self::collect(child, &pattern[1..], out) {
                    return Some(deferred);
                }
            }
            None
        } else if let Some(child) = map.get(&pattern[0]) {
            Self::collect(child, &pattern[1..], out)
        } else {
            None
        }
    }

    /// Exact lookup of a terminal with a real record id.
    pub(crate) fn find_one(&self, fields: &[String]) -> Result<Lookup<Arc<Node>>> {
        let mut node = Arc::clone(&self.root);
        for name in fields {
            let next = {
                let children = node.children.read();
                match &*children {
                    Branch::Unloaded { .. } => return Ok(Lookup::Deferred(Arc::clone(&node))),
                    Branch::Loaded(map) => match map.get(name) {
                        Some(child) => Arc::clone(child),
                        None => return Err(StrataError::NotFound),
                    },
                }
            };
            node = next;
        }
        if node.is_placeholder() {
            return Err(StrataError::NotFound);
        }
        Ok(Lookup::Ready(node))
    }

    /// Top-level children in field order.
    pub(crate) fn top_level(&self) -> Result<Vec<Arc<Node>>> {
        let children = self.root.children.read();
        match &*children {
            Branch::Loaded(map) => {
                let mut nodes: Vec<Arc<Node>> = map.values().map(Arc::clone).collect();
                nodes.sort_by(|a, b| a.fields().cmp(b.fields()));
                Ok(nodes)
            }
            Branch::Unloaded { .. } => Err(StrataError::Corrupt(
                "tree root cannot be unloaded".to_string(),
            )),
        }
    }

    /// Install a top-level branch read from a snapshot root entry.
    pub(crate) fn install_top(&self, node: Arc<Node>) -> Result<()> {
        let mut children = self.root.children.write();
        match &mut *children {
            Branch::Loaded(map) => {
                map.insert(node.fields()[0].clone(), node);
                Ok(())
            }
            Branch::Unloaded { .. } => Err(StrataError::Corrupt(
                "tree root cannot be unloaded".to_string(),
            )),
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn found(tree: &Tree, pattern: &[String]) -> Vec<Vec<String>> {
        match tree.find(pattern) {
            Lookup::Ready(nodes) => {
                let mut fields: Vec<Vec<String>> =
                    nodes.iter().map(|n| n.fields().to_vec()).collect();
                fields.sort();
                fields
            }
            Lookup::Deferred(_) => panic!("unexpected deferred branch"),
        }
    }

    #[test]
    fn test_ensure_creates_placeholder_terminal() {
        let tree = Tree::new();
        let node = tree.ensure(&tuple(&["a", "b", "c"])).unwrap();
        assert!(node.is_placeholder());
        assert_eq!(node.fields(), tuple(&["a", "b", "c"]).as_slice());
    }

    #[test]
    fn test_ensure_returns_same_node() {
        let tree = Tree::new();
        let first = tree.ensure(&tuple(&["a", "b"])).unwrap();
        first.set_record_id(7);
        let second = tree.ensure(&tuple(&["a", "b"])).unwrap();
        assert_eq!(second.record_id(), 7);
    }

    #[test]
    fn test_find_wildcard_semantics() {
        let tree = Tree::new();
        for (i, t) in [
            tuple(&["a", "b", "c"]),
            tuple(&["a", "b", "d"]),
            tuple(&["a", "x", "c"]),
            tuple(&["b", "b", "c"]),
        ]
        .iter()
        .enumerate()
        {
            tree.insert(t, i as u64).unwrap();
        }

        assert_eq!(
            found(&tree, &tuple(&["a", "b", "*"])),
            vec![tuple(&["a", "b", "c"]), tuple(&["a", "b", "d"])]
        );
        assert_eq!(
            found(&tree, &tuple(&["*", "b", "c"])),
            vec![tuple(&["a", "b", "c"]), tuple(&["b", "b", "c"])]
        );
        assert_eq!(found(&tree, &tuple(&["*", "*", "*"])).len(), 4);
        // missing paths are empty, not errors
        assert!(found(&tree, &tuple(&["z", "*", "*"])).is_empty());
        // interior nodes do not match
        assert!(found(&tree, &tuple(&["a", "b"])).is_empty());
    }

    #[test]
    fn test_find_one() {
        let tree = Tree::new();
        tree.insert(&tuple(&["a", "b", "c"]), 3).unwrap();

        match tree.find_one(&tuple(&["a", "b", "c"])).unwrap() {
            Lookup::Ready(node) => assert_eq!(node.record_id(), 3),
            Lookup::Deferred(_) => panic!("unexpected deferred branch"),
        }
        // interior placeholder is not found
        assert!(matches!(
            tree.find_one(&tuple(&["a", "b"])),
            Err(StrataError::NotFound)
        ));
        assert!(matches!(
            tree.find_one(&tuple(&["a", "b", "z"])),
            Err(StrataError::NotFound)
        ));
    }

    #[test]
    fn test_unloaded_branch_defers() {
        let tree = Tree::new();
        tree.install_top(Node::unloaded(tuple(&["a"]), PLACEHOLDER, 0, 10))
            .unwrap();

        assert!(matches!(
            tree.find(&tuple(&["a", "b"])),
            Lookup::Deferred(_)
        ));
        assert!(matches!(
            tree.find_one(&tuple(&["a", "b"])),
            Ok(Lookup::Deferred(_))
        ));
        // a different top-level branch is unaffected
        assert!(matches!(
            tree.find_one(&tuple(&["z", "b"])),
            Err(StrataError::NotFound)
        ));
    }
}
