//! Query engine: filtered, paginated search over the
//! node store and edge index.
//!
//! Every search runs against a single snapshot: `total_count` and the page
//! come from the same view, so concurrent writes cannot shift a page.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lifecycle::RequestScope;
use crate::model::{Edge, Node, NodeState};
use crate::resolve::{Layered, RelationshipResolver, ResolvedEdge};
use crate::storage::{EdgeIndex, EdgeSnapshot, NodeStore};
use crate::{Error, Result};

/// Default upper bound for `take`.
pub const MAX_PAGE_SIZE: usize = 100;
/// `take` used when the caller does not supply one.
pub const DEFAULT_PAGE_SIZE: usize = 25;

// ============================================================================
// Filters
// ============================================================================

/// Node search predicates. Absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeFilter {
    /// Exact type id, or a registered namespace (prefix match).
    pub type_id: Option<String>,
    pub state: Option<NodeState>,
    /// Case-insensitive substring over title/description.
    #[serde(rename = "q")]
    pub text: Option<String>,
    pub locale: Option<String>,
}

impl NodeFilter {
    pub fn of_type(type_id: impl Into<String>) -> Self {
        Self { type_id: Some(type_id.into()), ..Self::default() }
    }

    pub fn in_state(state: NodeState) -> Self {
        Self { state: Some(state), ..Self::default() }
    }

    pub fn text(q: impl Into<String>) -> Self {
        Self { text: Some(q.into()), ..Self::default() }
    }
}

/// Edge ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeSort {
    /// Stable insertion order.
    #[default]
    Insertion,
    /// Descending weight, ties by insertion order.
    WeightDesc,
}

/// Edge search predicates, combined with AND. Absent fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EdgeFilter {
    pub from_id: Option<String>,
    pub to_id: Option<String>,
    pub role: Option<String>,
    pub relationship_type: Option<String>,
    /// Either endpoint.
    pub node_id: Option<String>,
    pub sort: EdgeSort,
}

impl EdgeFilter {
    pub fn outgoing(id: impl Into<String>) -> Self {
        Self { from_id: Some(id.into()), ..Self::default() }
    }

    pub fn incoming(id: impl Into<String>) -> Self {
        Self { to_id: Some(id.into()), ..Self::default() }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self { role: Some(role.into()), ..Self::default() }
    }

    pub fn relationship_type(rt: impl Into<String>) -> Self {
        Self { relationship_type: Some(rt.into()), ..Self::default() }
    }

    pub fn touching(id: impl Into<String>) -> Self {
        Self { node_id: Some(id.into()), ..Self::default() }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn by_weight(mut self) -> Self {
        self.sort = EdgeSort::WeightDesc;
        self
    }

    pub fn matches(&self, edge: &Edge) -> bool {
        self.from_id.as_deref().is_none_or(|v| v == edge.from_id)
            && self.to_id.as_deref().is_none_or(|v| v == edge.to_id)
            && self.role.as_deref().is_none_or(|v| v == edge.role)
            && self.relationship_type.as_deref().is_none_or(|v| edge.relationship_type() == Some(v))
            && self.node_id.as_deref().is_none_or(|v| edge.touches(v))
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Validated `skip`/`take`. `take` is clamped to the engine's maximum at
/// query time, never rejected for being too large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    skip: usize,
    take: usize,
}

impl Pagination {
    pub fn new(skip: i64, take: i64) -> Result<Self> {
        if skip < 0 {
            return Err(Error::InvalidArgument(format!("skip must be >= 0, got {skip}")));
        }
        if take < 1 {
            return Err(Error::InvalidArgument(format!("take must be >= 1, got {take}")));
        }
        Ok(Self {
            skip: usize::try_from(skip).unwrap_or(usize::MAX),
            take: usize::try_from(take).unwrap_or(usize::MAX),
        })
    }

    /// First `take` items.
    pub fn first(take: usize) -> Self {
        Self { skip: 0, take: take.max(1) }
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn take(&self) -> usize {
        self.take
    }

    pub fn clamped(self, max: usize) -> Self {
        Self { skip: self.skip, take: self.take.min(max.max(1)) }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { skip: 0, take: DEFAULT_PAGE_SIZE }
    }
}

/// One page of results plus the size of the whole filtered set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub skip: usize,
    pub take: usize,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.skip + self.items.len() < self.total_count
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            skip: self.skip,
            take: self.take,
        }
    }
}

/// Page-size limits, usually from `GraphConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub max_page_size: usize,
    pub default_page_size: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self { max_page_size: MAX_PAGE_SIZE, default_page_size: DEFAULT_PAGE_SIZE }
    }
}

// ============================================================================
// QueryEngine
// ============================================================================

/// Composes filters and pagination over an explicit store/index pair.
pub struct QueryEngine {
    nodes: Arc<NodeStore>,
    edges: Arc<EdgeIndex>,
    limits: PageLimits,
}

impl QueryEngine {
    pub fn new(nodes: Arc<NodeStore>, edges: Arc<EdgeIndex>, limits: PageLimits) -> Self {
        Self { nodes, edges, limits }
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    /// Build pagination from optional raw inputs, applying the default
    /// page size.
    pub fn pagination(&self, skip: Option<i64>, take: Option<i64>) -> Result<Pagination> {
        Pagination::new(skip.unwrap_or(0), take.unwrap_or(self.limits.default_page_size as i64))
    }

    pub fn search_nodes(&self, filter: &NodeFilter, page: Pagination) -> Result<Page<Node>> {
        let page = page.clamped(self.limits.max_page_size);
        let snapshot = self.nodes.snapshot();
        let scan = self.nodes.scan_for(
            filter.type_id.as_deref(),
            filter.state,
            filter.text.as_deref(),
            filter.locale.as_deref(),
        );
        let total_count = snapshot.count(scan.clone());
        let items = if page.skip >= total_count {
            Vec::new()
        } else {
            snapshot.scan(scan).skip(page.skip).take(page.take).collect()
        };
        debug!(?filter, skip = page.skip, take = page.take, total_count, "node search");
        Ok(Page { items, total_count, skip: page.skip, take: page.take })
    }

    pub fn search_edges(&self, filter: &EdgeFilter, page: Pagination) -> Result<Page<Edge>> {
        Ok(self.edge_page(&self.edges.snapshot(), filter, page))
    }

    fn edge_page(&self, snapshot: &EdgeSnapshot, filter: &EdgeFilter, page: Pagination) -> Page<Edge> {
        let page = page.clamped(self.limits.max_page_size);
        let (items, total_count) = snapshot.query(filter, page.skip, page.take);
        debug!(?filter, skip = page.skip, take = page.take, total_count, "edge search");
        Page { items, total_count, skip: page.skip, take: page.take }
    }

    /// Edge search with endpoints resolved against the node snapshot.
    /// Dangling endpoints come back as `Unresolved`; they never fail the page.
    pub fn search_edges_resolved(&self, filter: &EdgeFilter, page: Pagination) -> Result<Page<ResolvedEdge>> {
        let nodes = self.nodes.snapshot();
        let edges = self.edges.snapshot();
        let Page { items, total_count, skip, take } = self.edge_page(&edges, filter, page);
        let resolver = RelationshipResolver::new(nodes);
        Ok(Page { items: resolver.batch_resolve(items), total_count, skip, take })
    }

    /// Like [`search_edges_resolved`](Self::search_edges_resolved), but Gas
    /// nodes of the current request are visible as endpoints.
    pub fn search_edges_resolved_in(
        &self,
        filter: &EdgeFilter,
        page: Pagination,
        scope: &RequestScope,
    ) -> Result<Page<ResolvedEdge>> {
        let nodes = self.nodes.snapshot();
        let edges = self.edges.snapshot();
        let Page { items, total_count, skip, take } = self.edge_page(&edges, filter, page);
        let resolver = RelationshipResolver::new(Layered(scope, &nodes));
        Ok(Page { items: resolver.batch_resolve(items), total_count, skip, take })
    }
}
