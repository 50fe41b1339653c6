//! # codex-graph: In-memory Knowledge Graph Core
//!
//! Nodes ("concepts/entities"), directed typed edges, filtered paginated
//! queries, edge resolution, and a three-state content lifecycle
//! (Ice / Water / Gas).
//!
//! ## Design Principles
//!
//! 1. **Snapshots, not locks**: readers work against an immutable table
//!    snapshot and never block writers
//! 2. **Clean DTOs**: `Node`, `Edge`, `MetaValue` cross all boundaries
//! 3. **Explicit context**: one `Graph` owns its store, index and registry;
//!    there is no global state
//! 4. **Weak references**: edges may point at ids that do not (yet) exist
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codex_graph::{Caller, Edge, EdgeFilter, Graph, Node, NodeState, Pagination, UpsertOptions};
//!
//! # async fn example() -> codex_graph::Result<()> {
//! let graph = Graph::open_memory().await?;
//!
//! graph.upsert_node(
//!     Node::new("u-core-concept-kw-matter", "codex.concept.keyword", NodeState::Ice),
//!     UpsertOptions::default(),
//!     &Caller::anonymous(),
//! )?;
//! graph.add_edge(Edge::new("u-core-concept-kw-matter", "u-core-concept-entity", "is_a").with_weight(0.8))?;
//!
//! let page = graph.search_edges(&EdgeFilter::outgoing("u-core-concept-kw-matter"), Pagination::default())?;
//! assert_eq!(page.total_count, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! | Sink | Description |
//! |------|-------------|
//! | `NullPersistence` | Discards frozen nodes (`Graph::open_memory`) |
//! | `MemoryPersistence` | Keeps frozen nodes in a map, for embedding and tests |
//! | custom | Implement [`Persistence`] for a real durable store |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod index;
pub mod tx;
pub mod registry;
pub mod query;
pub mod resolve;
pub mod lifecycle;
pub mod export;
pub mod seed;
pub mod config;
#[cfg(feature = "http")]
pub mod server;

use std::sync::Arc;

use tracing::{error, info, warn};

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, NodeState, Content, ContentBody, Edge, EdgeKey,
    MetaValue, ValueKind, Meta,
};

// ============================================================================
// Re-exports: Storage & queries
// ============================================================================

pub use storage::{
    Persistence, NullPersistence, MemoryPersistence,
    NodeStore, EdgeIndex, UpsertOptions,
};
pub use registry::{TypeRegistry, TypeValidator};
pub use query::{QueryEngine, NodeFilter, EdgeFilter, EdgeSort, Pagination, Page};
pub use resolve::{RelationshipResolver, ResolvedEdge, Endpoint, NodeSource};
pub use lifecycle::{LifecycleManager, RequestScope, Caller, Capability};
pub use export::{Atoms, ImportReport};
pub use config::{GraphConfig, ConfigError};

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` owns the node store, the edge index
/// and the services built on them, plus the durable sink for frozen nodes.
pub struct Graph<P: Persistence = NullPersistence> {
    config: GraphConfig,
    nodes: Arc<NodeStore>,
    edges: Arc<EdgeIndex>,
    query: QueryEngine,
    lifecycle: LifecycleManager,
    persistence: P,
}

impl<P: Persistence> Graph<P> {
    /// Build a graph over empty tables. Does not seed.
    pub fn new(config: GraphConfig, registry: TypeRegistry, persistence: P) -> Result<Self> {
        config.validate()?;
        let nodes = Arc::new(NodeStore::new(Arc::new(registry)));
        let edges = Arc::new(EdgeIndex::new());
        let query = QueryEngine::new(nodes.clone(), edges.clone(), config.page_limits());
        let lifecycle = LifecycleManager::new(nodes.clone(), edges.clone(), config.lifecycle.max_cached_nodes);
        Ok(Self { config, nodes, edges, query, lifecycle, persistence })
    }

    /// Build a graph with the default type registry, seeding U-Core when
    /// `seed.ucore` is set.
    pub async fn open(config: GraphConfig, persistence: P) -> Result<Self> {
        let graph = Self::new(config, TypeRegistry::with_defaults(), persistence)?;
        if graph.config.seed.ucore {
            graph.seed_ucore()?;
        }
        info!(nodes = graph.nodes.len(), edges = graph.edges.len(), "graph opened");
        Ok(graph)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn edges(&self) -> &EdgeIndex {
        &self.edges
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.nodes.registry()
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    // --- nodes ---------------------------------------------------------

    pub fn get_node(&self, id: &str) -> Result<Node> {
        self.nodes.get(id)
    }

    /// Lazy listing bound to one snapshot.
    pub fn list_nodes(&self, filter: &NodeFilter) -> storage::NodeIter {
        let scan = self.nodes.scan_for(
            filter.type_id.as_deref(),
            filter.state,
            filter.text.as_deref(),
            filter.locale.as_deref(),
        );
        self.nodes.snapshot().scan(scan)
    }

    /// Insert or replace a node. `opts.unfreeze` needs
    /// [`Capability::Unfreeze`].
    pub fn upsert_node(&self, node: Node, opts: UpsertOptions, caller: &Caller) -> Result<Node> {
        if opts.unfreeze {
            caller.require(Capability::Unfreeze, "writing over ice")?;
        }
        self.nodes.upsert(node, opts)
    }

    pub fn commit_node(&self, id: &str) -> Result<Node> {
        self.nodes.commit(id)
    }

    /// Remove a node and retract any durable copy of it.
    ///
    /// The in-memory removal is what the caller observes. A failed retract
    /// only leaves a stale durable copy behind, so it is logged, not returned.
    pub async fn remove_node(&self, id: &str) -> Result<Node> {
        let removed = self.nodes.remove(id)?;
        if let Err(e) = self.persistence.retract(id).await {
            warn!(node = %id, error = %e, "durable retract failed; stale copy kept");
        }
        Ok(removed)
    }

    // --- edges ---------------------------------------------------------

    pub fn add_edge(&self, edge: Edge) -> Result<Edge> {
        self.edges.add(edge)
    }

    pub fn remove_edge(&self, from_id: &str, to_id: &str, role: &str) -> Result<Edge> {
        self.edges.remove(from_id, to_id, role)
    }

    pub fn edges_touching(&self, id: &str) -> storage::EdgeIter {
        self.edges.edges_touching(id)
    }

    // --- queries -------------------------------------------------------

    pub fn pagination(&self, skip: Option<i64>, take: Option<i64>) -> Result<Pagination> {
        self.query.pagination(skip, take)
    }

    pub fn search_nodes(&self, filter: &NodeFilter, page: Pagination) -> Result<Page<Node>> {
        self.query.search_nodes(filter, page)
    }

    pub fn search_edges(&self, filter: &EdgeFilter, page: Pagination) -> Result<Page<Edge>> {
        self.query.search_edges(filter, page)
    }

    pub fn search_edges_resolved(&self, filter: &EdgeFilter, page: Pagination) -> Result<Page<ResolvedEdge>> {
        self.query.search_edges_resolved(filter, page)
    }

    pub fn resolve(&self, edge: Edge) -> ResolvedEdge {
        RelationshipResolver::new(self.nodes.snapshot()).resolve(edge)
    }

    pub fn batch_resolve(&self, edges: Vec<Edge>) -> Vec<ResolvedEdge> {
        RelationshipResolver::new(self.nodes.snapshot()).batch_resolve(edges)
    }

    // --- lifecycle -----------------------------------------------------

    pub fn promote(&self, scope: &mut RequestScope, id: &str) -> Result<Node> {
        self.lifecycle.promote(scope, id)
    }

    /// Freeze a `Water` node and make it durable. If the sink fails the node
    /// goes back to `Water` and the call fails with `Internal`.
    pub async fn freeze(&self, id: &str) -> Result<Node> {
        let frozen = self.lifecycle.freeze(id)?;
        if let Err(e) = self.persistence.persist(&frozen).await {
            error!(node = %id, error = %e, "durable write failed; reverting freeze");
            if let Err(revert) = self.lifecycle.revert_freeze(&frozen) {
                warn!(node = %id, error = %revert, "freeze revert skipped");
            }
            return Err(Error::Internal(format!("persisting '{id}' failed: {e}")));
        }
        Ok(frozen)
    }

    pub fn unfreeze(&self, id: &str, caller: &Caller) -> Result<Node> {
        self.lifecycle.unfreeze(id, caller)
    }

    pub fn evict(&self, id: &str) -> Result<Node> {
        self.lifecycle.evict(id)
    }

    // --- bulk ----------------------------------------------------------

    pub fn export_atoms(&self) -> Atoms {
        export::export_atoms(&self.nodes, &self.edges)
    }

    pub fn import_atoms(&self, atoms: Atoms) -> ImportReport {
        export::import_atoms(&self.nodes, &self.edges, atoms)
    }

    /// Insert the U-Core ontology. Idempotent.
    pub fn seed_ucore(&self) -> Result<ImportReport> {
        let report = seed::apply(&self.nodes, &self.edges);
        if !report.is_clean() {
            return Err(Error::Internal(format!("u-core seed failed: {}", report.failures.join("; "))));
        }
        info!(nodes = report.nodes_upserted, edges = report.edges_added, "u-core seeded");
        Ok(report)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.persistence.shutdown().await
    }
}

/// In-memory graph for testing and embedding.
impl Graph<NullPersistence> {
    pub async fn open_memory() -> Result<Self> {
        Self::open(GraphConfig::default(), NullPersistence).await
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification, stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Conflict,
    Forbidden,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(_) | Error::Json(_) => ErrorKind::InvalidArgument,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Internal(_) | Error::Config(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show a client. Internal details are masked.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
