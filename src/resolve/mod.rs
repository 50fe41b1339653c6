//! Relationship resolution.
//!
//! Turns an [`Edge`] into a [`ResolvedEdge`] by looking up both endpoints.
//! Edges are weak references, so a missing endpoint is reported as
//! [`Endpoint::Unresolved`] instead of failing the whole result.

use hashbrown::HashMap;
use serde::Serialize;
use tracing::warn;

use crate::lifecycle::RequestScope;
use crate::model::{Edge, Node};
use crate::storage::{NodeSnapshot, NodeStore};
use crate::{Error, Result};

/// Anything that can look a node up by id.
pub trait NodeSource {
    fn lookup(&self, id: &str) -> Result<Node>;
}

impl NodeSource for NodeStore {
    fn lookup(&self, id: &str) -> Result<Node> {
        self.get(id)
    }
}

impl NodeSource for NodeSnapshot {
    fn lookup(&self, id: &str) -> Result<Node> {
        self.get(id)
    }
}

impl NodeSource for RequestScope {
    fn lookup(&self, id: &str) -> Result<Node> {
        self.get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("node '{id}' in request scope")))
    }
}

impl<S: NodeSource + ?Sized> NodeSource for &S {
    fn lookup(&self, id: &str) -> Result<Node> {
        (**self).lookup(id)
    }
}

/// Consults `.0` first and falls back to `.1` when it reports `NotFound`.
pub struct Layered<A, B>(pub A, pub B);

impl<A: NodeSource, B: NodeSource> NodeSource for Layered<A, B> {
    fn lookup(&self, id: &str) -> Result<Node> {
        match self.0.lookup(id) {
            Err(Error::NotFound(_)) => self.1.lookup(id),
            other => other,
        }
    }
}

/// One end of a resolved edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Endpoint {
    Resolved { node: Box<Node> },
    Unresolved { id: String, reason: String },
}

impl Endpoint {
    pub fn node(&self) -> Option<&Node> {
        match self {
            Endpoint::Resolved { node } => Some(node),
            Endpoint::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Endpoint::Resolved { .. })
    }
}

/// An edge with both endpoints looked up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEdge {
    #[serde(flatten)]
    pub edge: Edge,
    pub from_node: Endpoint,
    pub to_node: Endpoint,
}

pub struct RelationshipResolver<S> {
    source: S,
}

impl<S: NodeSource> RelationshipResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn resolve(&self, edge: Edge) -> ResolvedEdge {
        let from_node = self.endpoint(&edge.from_id);
        let to_node = if edge.to_id == edge.from_id {
            from_node.clone()
        } else {
            self.endpoint(&edge.to_id)
        };
        ResolvedEdge { edge, from_node, to_node }
    }

    /// Resolve a batch, looking each distinct id up at most once. Output
    /// order matches input order.
    pub fn batch_resolve(&self, edges: Vec<Edge>) -> Vec<ResolvedEdge> {
        let mut memo: HashMap<String, Endpoint> = HashMap::new();
        edges
            .into_iter()
            .map(|edge| {
                let from_node = self.memoized(&mut memo, &edge.from_id);
                let to_node = self.memoized(&mut memo, &edge.to_id);
                ResolvedEdge { edge, from_node, to_node }
            })
            .collect()
    }

    fn memoized(&self, memo: &mut HashMap<String, Endpoint>, id: &str) -> Endpoint {
        if let Some(hit) = memo.get(id) {
            return hit.clone();
        }
        let endpoint = self.endpoint(id);
        memo.insert(id.to_string(), endpoint.clone());
        endpoint
    }

    fn endpoint(&self, id: &str) -> Endpoint {
        match self.source.lookup(id) {
            Ok(node) => Endpoint::Resolved { node: Box::new(node) },
            Err(Error::NotFound(_)) => Endpoint::Unresolved { id: id.to_string(), reason: "not found".into() },
            Err(e) => {
                warn!(node = %id, error = %e, "endpoint lookup failed");
                Endpoint::Unresolved { id: id.to_string(), reason: e.public_message() }
            }
        }
    }
}
