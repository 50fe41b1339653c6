//! Node Store.
//!
//! Nodes live in a copy-on-write table behind a `RwLock<Arc<_>>`. Readers
//! clone the `Arc` and drop the lock at once; a write swaps in a modified
//! table via `Arc::make_mut`, which only copies while some snapshot is
//! still alive. A query holding a snapshot therefore never sees a write that
//! committed after it started.
//!
//! Per-id write serialization comes from [`WriteLocks`]: the full
//! read-validate-write of one id runs under that id's stripe.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::index::{PostingIndex, Seq};
use crate::model::{Node, NodeState};
use crate::registry::{TypeMatch, TypeRegistry};
use crate::tx::WriteLocks;
use crate::{Error, Result};

// ============================================================================
// Records & table
// ============================================================================

/// Stored form of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub node: Node,
    /// First-insertion ordinal; kept across upserts.
    pub seq: Seq,
    /// Outstanding uncommitted mutation marker.
    pub pending: bool,
}

#[derive(Debug, Clone, Default)]
struct NodeTable {
    by_seq: BTreeMap<Seq, Arc<NodeRecord>>,
    by_id: HashMap<String, Seq>,
    by_type: PostingIndex,
    next_seq: Seq,
}

impl NodeTable {
    fn lookup(&self, id: &str) -> Option<&Arc<NodeRecord>> {
        self.by_id.get(id).and_then(|seq| self.by_seq.get(seq))
    }

    fn put(&mut self, record: NodeRecord) {
        if let Some(old) = self.by_seq.get(&record.seq) {
            if old.node.type_id != record.node.type_id {
                self.by_type.remove(&old.node.type_id, old.seq);
            }
        }
        self.by_type.insert(&record.node.type_id, record.seq);
        self.by_id.insert(record.node.id.clone(), record.seq);
        self.by_seq.insert(record.seq, Arc::new(record));
    }

    fn delete(&mut self, id: &str) -> Option<Arc<NodeRecord>> {
        let seq = self.by_id.remove(id)?;
        let record = self.by_seq.remove(&seq)?;
        self.by_type.remove(&record.node.type_id, seq);
        Some(record)
    }
}

// ============================================================================
// Write options
// ============================================================================

/// Options for [`NodeStore::upsert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Allow overwriting an `Ice` node (explicit unfreeze-on-write).
    pub unfreeze: bool,
    /// Leave the pending mutation marker set after the write.
    pub draft: bool,
    /// Compare-and-swap on the stored version.
    pub expected_version: Option<u64>,
}

impl UpsertOptions {
    pub fn unfreeze() -> Self {
        Self { unfreeze: true, ..Self::default() }
    }

    pub fn draft() -> Self {
        Self { draft: true, ..Self::default() }
    }

    pub fn expecting(version: u64) -> Self {
        Self { expected_version: Some(version), ..Self::default() }
    }
}

/// Outcome of a guarded per-id update.
pub(crate) enum Change {
    Put { node: Node, pending: bool },
    Remove,
    Keep,
}

// ============================================================================
// Scans
// ============================================================================

/// Predicate set for a node listing. Absent fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NodeScan {
    pub type_match: Option<TypeMatch>,
    pub state: Option<NodeState>,
    /// Lowercased substring needle over title/description.
    pub text: Option<String>,
    pub locale: Option<String>,
}

impl NodeScan {
    pub fn matches(&self, node: &Node) -> bool {
        self.type_match.as_ref().is_none_or(|t| t.matches(&node.type_id))
            && self.state.is_none_or(|s| s == node.state)
            && self.locale.as_deref().is_none_or(|l| node.locale.as_deref() == Some(l))
            && self.text.as_deref().is_none_or(|q| node.matches_text(q))
    }
}

/// Consistent read-only view of the store at one instant.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    table: Arc<NodeTable>,
}

impl NodeSnapshot {
    pub fn get(&self, id: &str) -> Result<Node> {
        self.table
            .lookup(id)
            .map(|r| r.node.clone())
            .ok_or_else(|| Error::NotFound(format!("node '{id}'")))
    }

    pub fn record(&self, id: &str) -> Option<&NodeRecord> {
        self.table.lookup(id).map(Arc::as_ref)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.by_seq.is_empty()
    }

    /// Lazy, insertion-ordered scan over this snapshot.
    pub fn scan(&self, scan: NodeScan) -> NodeIter {
        NodeIter { records: RecordCursor::new(self.table.clone(), scan) }
    }

    /// Records matching `scan`, without cloning node payloads.
    pub fn records(&self, scan: NodeScan) -> impl Iterator<Item = Arc<NodeRecord>> {
        RecordCursor::new(self.table.clone(), scan)
    }

    pub fn count(&self, scan: NodeScan) -> usize {
        self.records(scan).count()
    }
}

/// Cursor over an owned table snapshot. Each step is one ordered-map
/// lookup, so the iterator holds no borrow and no buffer.
struct RecordCursor {
    table: Arc<NodeTable>,
    scan: NodeScan,
    cursor: Option<Seq>,
}

impl RecordCursor {
    fn new(table: Arc<NodeTable>, scan: NodeScan) -> Self {
        Self { table, scan, cursor: None }
    }

    fn next_seq(&self) -> Option<Seq> {
        match &self.scan.type_match {
            Some(TypeMatch::Exact(t)) => self.table.by_type.next_after(t, self.cursor),
            _ => {
                let lower = self.cursor.map_or(Bound::Unbounded, Bound::Excluded);
                self.table.by_seq.range((lower, Bound::Unbounded)).next().map(|(s, _)| *s)
            }
        }
    }
}

impl Iterator for RecordCursor {
    type Item = Arc<NodeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let seq = self.next_seq()?;
            self.cursor = Some(seq);
            let Some(record) = self.table.by_seq.get(&seq) else {
                continue;
            };
            if self.scan.matches(&record.node) {
                return Some(record.clone());
            }
        }
    }
}

/// Lazy node sequence bound to one snapshot. Dropping it releases the
/// snapshot.
pub struct NodeIter {
    records: RecordCursor,
}

impl Iterator for NodeIter {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        self.records.next().map(|r| r.node.clone())
    }
}

// ============================================================================
// NodeStore
// ============================================================================

/// Entities keyed by identifier, with lifecycle write guards.
pub struct NodeStore {
    table: RwLock<Arc<NodeTable>>,
    locks: WriteLocks,
    registry: Arc<TypeRegistry>,
}

impl NodeStore {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            table: RwLock::new(Arc::new(NodeTable::default())),
            locks: WriteLocks::default(),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot { table: self.table.read().clone() }
    }

    pub fn len(&self) -> usize {
        self.table.read().by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.read().by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<Node> {
        self.current(id)
            .map(|r| r.node.clone())
            .ok_or_else(|| Error::NotFound(format!("node '{id}'")))
    }

    /// Lazy listing. `type_filter` is resolved through the type registry:
    /// a registered namespace matches by prefix, anything else exactly.
    pub fn list(
        &self,
        type_filter: Option<&str>,
        state: Option<NodeState>,
        text: Option<&str>,
    ) -> NodeIter {
        self.snapshot().scan(self.scan_for(type_filter, state, text, None))
    }

    pub fn scan_for(
        &self,
        type_filter: Option<&str>,
        state: Option<NodeState>,
        text: Option<&str>,
        locale: Option<&str>,
    ) -> NodeScan {
        NodeScan {
            type_match: type_filter.map(|t| self.registry.type_matcher(t)),
            state,
            text: text.filter(|q| !q.is_empty()).map(str::to_lowercase),
            locale: locale.map(str::to_string),
        }
    }

    /// Insert or replace a node.
    ///
    /// Fails with `InvalidArgument` for a missing id/typeId, a `Gas` state or
    /// a type-validator rejection, and with `Conflict` when overwriting `Ice`
    /// without `unfreeze`, freezing a node with a pending draft, or on a
    /// version mismatch.
    pub fn upsert(&self, node: Node, opts: UpsertOptions) -> Result<Node> {
        if node.id.is_empty() {
            return Err(Error::InvalidArgument("node id is required".into()));
        }
        if node.type_id.is_empty() {
            return Err(Error::InvalidArgument(format!("node '{}' is missing typeId", node.id)));
        }
        if node.state == NodeState::Gas {
            return Err(Error::InvalidArgument(format!(
                "node '{}' is gas; derived nodes are request-scoped and must be promoted",
                node.id
            )));
        }
        if opts.draft && node.state == NodeState::Ice {
            return Err(Error::InvalidArgument(format!(
                "node '{}': an ice write cannot be a draft",
                node.id
            )));
        }
        self.registry.validate(&node)?;

        let id = node.id.clone();
        self.update(&id, |existing| {
            if let Some(expected) = opts.expected_version {
                match existing {
                    Some(r) if r.node.version == expected => {}
                    Some(r) => {
                        return Err(Error::Conflict(format!(
                            "node '{id}' is at version {}, expected {expected}",
                            r.node.version
                        )))
                    }
                    None => {
                        return Err(Error::Conflict(format!(
                            "node '{id}' does not exist, expected version {expected}"
                        )))
                    }
                }
            }
            if let Some(r) = existing {
                if r.node.state == NodeState::Ice && !opts.unfreeze {
                    return Err(Error::Conflict(format!(
                        "node '{id}' is frozen; unfreeze it before writing"
                    )));
                }
                if r.node.state == NodeState::Water && r.pending && node.state == NodeState::Ice {
                    return Err(Error::Conflict(format!(
                        "node '{id}' has an uncommitted mutation and cannot be frozen"
                    )));
                }
            }
            Ok(Change::Put { node, pending: opts.draft })
        })
        .inspect_err(|e| warn!(node = %id, error = %e, "upsert rejected"))
    }

    /// Clear the pending mutation marker.
    pub fn commit(&self, id: &str) -> Result<Node> {
        self.update(id, |existing| {
            let r = existing.ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
            if !r.pending {
                return Ok(Change::Keep);
            }
            Ok(Change::Put { node: r.node.clone(), pending: false })
        })
    }

    /// Remove a node. `Ice` nodes must be unfrozen first. Edges pointing at
    /// the node are left alone; they are weak references.
    pub fn remove(&self, id: &str) -> Result<Node> {
        let _guard = self.locks.lock(id);
        let existing = self
            .current(id)
            .ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
        if existing.node.state == NodeState::Ice {
            return Err(Error::Conflict(format!("node '{id}' is frozen; unfreeze it before removal")));
        }
        Arc::make_mut(&mut *self.table.write()).delete(id);
        debug!(node = %id, "node removed");
        Ok(existing.node.clone())
    }

    fn current(&self, id: &str) -> Option<Arc<NodeRecord>> {
        self.table.read().lookup(id).cloned()
    }

    /// Run `f` against the current record of `id` under its write lock and
    /// apply the resulting change.
    pub(crate) fn update<F>(&self, id: &str, f: F) -> Result<Node>
    where
        F: FnOnce(Option<&NodeRecord>) -> Result<Change>,
    {
        let _guard = self.locks.lock(id);
        // Only the record Arc is kept: holding a table Arc here would force
        // make_mut below to copy the whole table.
        let existing = self.current(id);

        match f(existing.as_deref())? {
            Change::Keep => existing
                .map(|r| r.node.clone())
                .ok_or_else(|| Error::NotFound(format!("node '{id}'"))),
            Change::Remove => {
                let removed = existing.ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
                Arc::make_mut(&mut *self.table.write()).delete(id);
                Ok(removed.node.clone())
            }
            Change::Put { mut node, pending } => {
                let now = Utc::now();
                let mut table = self.table.write();
                let table = Arc::make_mut(&mut *table);
                let seq = match &existing {
                    Some(r) => {
                        node.created_at = r.node.created_at;
                        node.version = r.node.version + 1;
                        r.seq
                    }
                    None => {
                        node.created_at = now;
                        node.version = 1;
                        let seq = table.next_seq;
                        table.next_seq += 1;
                        seq
                    }
                };
                node.updated_at = now;
                table.put(NodeRecord { node: node.clone(), seq, pending });
                debug!(node = %id, version = node.version, state = %node.state, "node written");
                Ok(node)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> NodeStore {
        NodeStore::new(Arc::new(TypeRegistry::with_defaults()))
    }

    #[test]
    fn test_upsert_assigns_bookkeeping() {
        let store = store();
        let n = store.upsert(Node::new("a", "codex.concept", NodeState::Water), UpsertOptions::default()).unwrap();
        assert_eq!(n.version, 1);
        let m = store.upsert(Node::new("a", "codex.concept", NodeState::Water).with_title("A"), UpsertOptions::default()).unwrap();
        assert_eq!(m.version, 2);
        assert_eq!(m.created_at, n.created_at);
        assert!(m.updated_at >= n.updated_at);
    }

    #[test]
    fn test_list_keeps_first_insertion_order() {
        let store = store();
        for id in ["c", "a", "b"] {
            store.upsert(Node::new(id, "codex.concept", NodeState::Water), UpsertOptions::default()).unwrap();
        }
        // Re-upsert does not move a node.
        store.upsert(Node::new("c", "codex.concept", NodeState::Water), UpsertOptions::default()).unwrap();
        let ids: Vec<String> = store.list(None, None, None).map(|n| n.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_snapshot_ignores_later_writes() {
        let store = store();
        store.upsert(Node::new("a", "t", NodeState::Water), UpsertOptions::default()).unwrap();
        let snap = store.snapshot();
        let mut iter = store.list(None, None, None);
        store.upsert(Node::new("b", "t", NodeState::Water), UpsertOptions::default()).unwrap();
        store.remove("a").unwrap();

        assert_eq!(snap.len(), 1);
        assert!(snap.get("a").is_ok());
        assert_eq!(iter.next().map(|n| n.id), Some("a".to_string()));
        assert!(iter.next().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_type_change_moves_type_posting() {
        let store = store();
        store.upsert(Node::new("a", "codex.news.item", NodeState::Water), UpsertOptions::default()).unwrap();
        store.upsert(Node::new("a", "codex.news.digest", NodeState::Water), UpsertOptions::default()).unwrap();
        assert_eq!(store.list(Some("codex.news.item"), None, None).count(), 0);
        assert_eq!(store.list(Some("codex.news.digest"), None, None).count(), 1);
    }

    #[test]
    fn test_text_and_state_filters() {
        let store = store();
        store.upsert(Node::new("a", "t", NodeState::Water).with_title("Water States"), UpsertOptions::default()).unwrap();
        store.upsert(Node::new("b", "t", NodeState::Ice).with_description("the STATES of matter"), UpsertOptions::default()).unwrap();
        store.upsert(Node::new("c", "t", NodeState::Ice).with_title("Unity"), UpsertOptions::default()).unwrap();
        assert_eq!(store.list(None, None, Some("states")).count(), 2);
        assert_eq!(store.list(None, Some(NodeState::Ice), Some("STATES")).count(), 1);
        assert_eq!(store.list(None, None, Some("")).count(), 3);
    }

    #[test]
    fn test_expected_version() {
        let store = store();
        let n = store.upsert(Node::new("a", "t", NodeState::Water), UpsertOptions::default()).unwrap();
        assert!(matches!(
            store.upsert(Node::new("a", "t", NodeState::Water), UpsertOptions::expecting(n.version + 5)),
            Err(Error::Conflict(_))
        ));
        assert!(store.upsert(Node::new("a", "t", NodeState::Water), UpsertOptions::expecting(n.version)).is_ok());
        assert!(matches!(
            store.upsert(Node::new("zz", "t", NodeState::Water), UpsertOptions::expecting(1)),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_commit_clears_pending() {
        let store = store();
        store.upsert(Node::new("a", "t", NodeState::Water), UpsertOptions::draft()).unwrap();
        assert!(store.snapshot().record("a").unwrap().pending);
        store.commit("a").unwrap();
        assert!(!store.snapshot().record("a").unwrap().pending);
        assert!(matches!(store.commit("missing"), Err(Error::NotFound(_))));
    }
}
