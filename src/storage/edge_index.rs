//! Edge Index.
//!
//! Edges are keyed by insertion sequence with four posting sub-indexes:
//! `from_id`, `to_id`, `role` and `meta.relationshipType`. All four live in
//! one copy-on-write table, so an add or remove swaps them together and no
//! reader can observe an edge in one sub-index but not another.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::index::{PostingIndex, Seq};
use crate::model::{Edge, EdgeKey};
use crate::query::{EdgeFilter, EdgeSort};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub edge: Edge,
    pub seq: Seq,
}

#[derive(Debug, Clone, Default)]
struct EdgeTable {
    by_seq: BTreeMap<Seq, Arc<EdgeRecord>>,
    by_key: HashMap<EdgeKey, Seq>,
    by_from: PostingIndex,
    by_to: PostingIndex,
    by_role: PostingIndex,
    by_relationship_type: PostingIndex,
    next_seq: Seq,
}

impl EdgeTable {
    fn insert(&mut self, edge: Edge) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_from.insert(&edge.from_id, seq);
        self.by_to.insert(&edge.to_id, seq);
        self.by_role.insert(&edge.role, seq);
        if let Some(rt) = edge.relationship_type() {
            self.by_relationship_type.insert(rt, seq);
        }
        self.by_key.insert(edge.key(), seq);
        self.by_seq.insert(seq, Arc::new(EdgeRecord { edge, seq }));
        seq
    }

    fn delete(&mut self, key: &EdgeKey) -> Option<Arc<EdgeRecord>> {
        let seq = self.by_key.remove(key)?;
        let record = self.by_seq.remove(&seq)?;
        let edge = &record.edge;
        self.by_from.remove(&edge.from_id, seq);
        self.by_to.remove(&edge.to_id, seq);
        self.by_role.remove(&edge.role, seq);
        if let Some(rt) = edge.relationship_type() {
            self.by_relationship_type.remove(rt, seq);
        }
        Some(record)
    }

    fn list(&self, which: Posting) -> &PostingIndex {
        match which {
            Posting::From => &self.by_from,
            Posting::To => &self.by_to,
            Posting::Role => &self.by_role,
            Posting::RelationshipType => &self.by_relationship_type,
        }
    }
}

// ============================================================================
// Query planning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Posting {
    From,
    To,
    Role,
    RelationshipType,
}

/// Where candidate sequence numbers come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    All,
    Posting(Posting, String),
    /// Union of the `from` and `to` postings of one id.
    Touching(String),
}

/// Pick the most selective supplied sub-index; the rest of the filter is
/// verified per candidate.
fn plan(table: &EdgeTable, filter: &EdgeFilter) -> Source {
    let mut candidates: SmallVec<[(usize, Source); 5]> = SmallVec::new();
    let mut push = |which: Posting, key: &Option<String>| {
        if let Some(k) = key {
            candidates.push((table.list(which).count(k), Source::Posting(which, k.clone())));
        }
    };
    push(Posting::From, &filter.from_id);
    push(Posting::To, &filter.to_id);
    push(Posting::Role, &filter.role);
    push(Posting::RelationshipType, &filter.relationship_type);
    if let Some(id) = &filter.node_id {
        let n = table.by_from.count(id) + table.by_to.count(id);
        candidates.push((n, Source::Touching(id.clone())));
    }
    candidates
        .into_iter()
        .min_by_key(|(n, _)| *n)
        .map_or(Source::All, |(_, s)| s)
}

/// Insertion-ordered cursor over an owned table snapshot.
struct SeqCursor {
    table: Arc<EdgeTable>,
    source: Source,
    filter: EdgeFilter,
    cursor: Option<Seq>,
}

impl SeqCursor {
    fn next_candidate(&self) -> Option<Seq> {
        let after = self.cursor;
        match &self.source {
            Source::All => {
                let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
                self.table.by_seq.range((lower, Bound::Unbounded)).next().map(|(s, _)| *s)
            }
            Source::Posting(which, key) => self.table.list(*which).next_after(key, after),
            Source::Touching(id) => {
                let a = self.table.by_from.next_after(id, after);
                let b = self.table.by_to.next_after(id, after);
                match (a, b) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            }
        }
    }
}

impl Iterator for SeqCursor {
    type Item = Arc<EdgeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let seq = self.next_candidate()?;
            self.cursor = Some(seq);
            let Some(record) = self.table.by_seq.get(&seq) else {
                continue;
            };
            if self.filter.matches(&record.edge) {
                return Some(record.clone());
            }
        }
    }
}

enum Cursor {
    Insertion(SeqCursor),
    /// Weight-sorted order has to be known up front; only sequence numbers
    /// are materialized, records are fetched as the caller advances.
    Ordered { table: Arc<EdgeTable>, seqs: std::vec::IntoIter<Seq> },
}

/// Lazy edge sequence bound to one snapshot.
pub struct EdgeIter {
    cursor: Cursor,
}

impl EdgeIter {
    fn new(table: Arc<EdgeTable>, filter: EdgeFilter) -> Self {
        let source = plan(&table, &filter);
        debug!(?source, "edge scan planned");
        let sort = filter.sort;
        let insertion = SeqCursor { table: table.clone(), source, filter, cursor: None };
        let cursor = match sort {
            EdgeSort::Insertion => Cursor::Insertion(insertion),
            EdgeSort::WeightDesc => {
                let mut keyed: Vec<(f64, Seq)> = insertion.map(|r| (r.edge.weight, r.seq)).collect();
                // Weights are finite; -0.0 and 0.0 compare equal and fall to insertion order.
                keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1)));
                let seqs: Vec<Seq> = keyed.into_iter().map(|(_, s)| s).collect();
                Cursor::Ordered { table, seqs: seqs.into_iter() }
            }
        };
        Self { cursor }
    }

    fn next_record(&mut self) -> Option<Arc<EdgeRecord>> {
        match &mut self.cursor {
            Cursor::Insertion(c) => c.next(),
            Cursor::Ordered { table, seqs } => seqs.find_map(|s| table.by_seq.get(&s).cloned()),
        }
    }
}

impl Iterator for EdgeIter {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        self.next_record().map(|r| r.edge.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.cursor {
            Cursor::Insertion(_) => (0, None),
            Cursor::Ordered { seqs, .. } => seqs.size_hint(),
        }
    }
}

/// Consistent read-only view of the edge index.
#[derive(Debug, Clone)]
pub struct EdgeSnapshot {
    table: Arc<EdgeTable>,
}

impl EdgeSnapshot {
    pub fn len(&self) -> usize {
        self.table.by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.by_seq.is_empty()
    }

    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.table.by_key.contains_key(key)
    }

    pub fn scan(&self, filter: EdgeFilter) -> EdgeIter {
        EdgeIter::new(self.table.clone(), filter)
    }

    /// Number of edges matching `filter`, without cloning any edge.
    pub fn count(&self, filter: &EdgeFilter) -> usize {
        let source = plan(&self.table, filter);
        let mut filter = filter.clone();
        filter.sort = EdgeSort::Insertion;
        SeqCursor { table: self.table.clone(), source, filter, cursor: None }.count()
    }

    /// Edges with `id` at either end.
    pub fn degree(&self, id: &str) -> usize {
        self.table.by_from.count(id) + self.table.by_to.count(id)
    }

    /// One page plus the size of the whole filtered set.
    pub fn query(&self, filter: &EdgeFilter, skip: usize, take: usize) -> (Vec<Edge>, usize) {
        let total = self.count(filter);
        if skip >= total {
            return (Vec::new(), total);
        }
        let page = self.scan(filter.clone()).skip(skip).take(take).collect();
        (page, total)
    }
}

// ============================================================================
// EdgeIndex
// ============================================================================

/// Directed, typed relationships with synchronized sub-indexes.
pub struct EdgeIndex {
    table: RwLock<Arc<EdgeTable>>,
}

impl Default for EdgeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeIndex {
    pub fn new() -> Self {
        Self { table: RwLock::new(Arc::new(EdgeTable::default())) }
    }

    pub fn snapshot(&self) -> EdgeSnapshot {
        EdgeSnapshot { table: self.table.read().clone() }
    }

    pub fn len(&self) -> usize {
        self.table.read().by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn degree(&self, id: &str) -> usize {
        let table = self.table.read();
        table.by_from.count(id) + table.by_to.count(id)
    }

    pub fn get(&self, key: &EdgeKey) -> Result<Edge> {
        let table = self.table.read();
        table
            .by_key
            .get(key)
            .and_then(|seq| table.by_seq.get(seq))
            .map(|r| r.edge.clone())
            .ok_or_else(|| Error::NotFound(format!("edge {key}")))
    }

    /// Insert an edge into all sub-indexes at once. Duplicate
    /// (`from_id`, `to_id`, `role`) → `Conflict`.
    pub fn add(&self, edge: Edge) -> Result<Edge> {
        edge.validate()?;
        let key = edge.key();
        let mut guard = self.table.write();
        if guard.by_key.contains_key(&key) {
            warn!(edge = %key, "duplicate edge rejected");
            return Err(Error::Conflict(format!("edge {key} already exists")));
        }
        let seq = Arc::make_mut(&mut *guard).insert(edge.clone());
        debug!(edge = %key, seq, "edge added");
        Ok(edge)
    }

    /// Remove an edge from all sub-indexes at once.
    pub fn remove(&self, from_id: &str, to_id: &str, role: &str) -> Result<Edge> {
        let key = EdgeKey::new(from_id, to_id, role);
        let mut guard = self.table.write();
        if !guard.by_key.contains_key(&key) {
            return Err(Error::NotFound(format!("edge {key}")));
        }
        let removed = Arc::make_mut(&mut *guard)
            .delete(&key)
            .ok_or_else(|| Error::Internal(format!("edge {key} missing from sequence table")))?;
        debug!(edge = %key, "edge removed");
        Ok(removed.edge.clone())
    }

    /// Filtered page against a fresh snapshot.
    pub fn query(&self, filter: &EdgeFilter, skip: usize, take: usize) -> (Vec<Edge>, usize) {
        self.snapshot().query(filter, skip, take)
    }

    /// Lazy edges with `id` at either end.
    pub fn edges_touching(&self, id: &str) -> EdgeIter {
        self.snapshot().scan(EdgeFilter { node_id: Some(id.to_string()), ..EdgeFilter::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(from: &str, to: &str, role: &str) -> Edge {
        Edge::new(from, to, role)
    }

    #[test]
    fn test_duplicate_tuple_conflicts() {
        let idx = EdgeIndex::new();
        idx.add(e("a", "b", "is_a")).unwrap();
        assert!(matches!(idx.add(e("a", "b", "is_a").with_weight(2.0)), Err(Error::Conflict(_))));
        // Same endpoints, different role is a different edge.
        idx.add(e("a", "b", "contains")).unwrap();
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn test_remove_clears_every_sub_index() {
        let idx = EdgeIndex::new();
        idx.add(e("a", "b", "is_a").with_relationship_type("taxonomy")).unwrap();
        idx.remove("a", "b", "is_a").unwrap();
        let snap = idx.snapshot();
        for filter in [
            EdgeFilter { from_id: Some("a".into()), ..Default::default() },
            EdgeFilter { to_id: Some("b".into()), ..Default::default() },
            EdgeFilter { role: Some("is_a".into()), ..Default::default() },
            EdgeFilter { relationship_type: Some("taxonomy".into()), ..Default::default() },
        ] {
            assert_eq!(snap.count(&filter), 0);
        }
        assert!(matches!(idx.remove("a", "b", "is_a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_and_semantics_across_indexes() {
        let idx = EdgeIndex::new();
        idx.add(e("a", "b", "is_a")).unwrap();
        idx.add(e("a", "c", "contains")).unwrap();
        idx.add(e("d", "b", "is_a")).unwrap();
        let f = EdgeFilter { from_id: Some("a".into()), role: Some("is_a".into()), ..Default::default() };
        let (edges, total) = idx.query(&f, 0, 10);
        assert_eq!(total, 1);
        assert_eq!(edges[0].to_id, "b");
    }

    #[test]
    fn test_weight_desc_ties_break_by_insertion() {
        let idx = EdgeIndex::new();
        idx.add(e("a", "x1", "r").with_weight(0.5)).unwrap();
        idx.add(e("a", "x2", "r").with_weight(-1.0)).unwrap();
        idx.add(e("a", "x3", "r").with_weight(0.5)).unwrap();
        idx.add(e("a", "x4", "r").with_weight(2.0)).unwrap();
        let f = EdgeFilter { role: Some("r".into()), sort: EdgeSort::WeightDesc, ..Default::default() };
        let targets: Vec<String> = idx.snapshot().scan(f).map(|e| e.to_id).collect();
        assert_eq!(targets, vec!["x4", "x1", "x3", "x2"]);

        let signed = EdgeIndex::new();
        signed.add(e("a", "first", "r").with_weight(-0.0)).unwrap();
        signed.add(e("a", "second", "r").with_weight(0.0)).unwrap();
        let f = EdgeFilter { role: Some("r".into()), sort: EdgeSort::WeightDesc, ..Default::default() };
        let targets: Vec<String> = signed.snapshot().scan(f).map(|e| e.to_id).collect();
        assert_eq!(targets, vec!["first", "second"]);
    }

    #[test]
    fn test_touching_merges_both_directions() {
        let idx = EdgeIndex::new();
        idx.add(e("hub", "a", "r")).unwrap();
        idx.add(e("b", "hub", "r")).unwrap();
        idx.add(e("c", "d", "r")).unwrap();
        idx.add(e("hub", "hub", "self")).unwrap();
        let ids: Vec<(String, String)> = idx.edges_touching("hub").map(|e| (e.from_id, e.to_id)).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], ("hub".to_string(), "a".to_string()));
        assert_eq!(idx.degree("hub"), 4);
    }

    #[test]
    fn test_snapshot_is_isolated_from_adds() {
        let idx = EdgeIndex::new();
        idx.add(e("a", "b", "r")).unwrap();
        let snap = idx.snapshot();
        idx.add(e("a", "c", "r")).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(idx.len(), 2);
    }
}
