//! # Storage
//!
//! In-memory node store and edge index, plus the seam to durable storage.
//!
//! | Piece | Module | Description |
//! |-------|--------|-------------|
//! | `NodeStore` | `node_store` | Entities by id, lifecycle write guards, snapshots |
//! | `EdgeIndex` | `edge_index` | Relationships with four synchronized sub-indexes |
//! | `Persistence` | here | Async sink for frozen (`Ice`) nodes |
//!
//! Nothing in the store or the index blocks on I/O. Durable persistence is
//! reached through [`Persistence`] after the in-memory write has committed.

pub mod node_store;
pub mod edge_index;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::Node;
use crate::{Error, Result};

pub use node_store::{NodeStore, NodeSnapshot, NodeScan, NodeIter, NodeRecord, UpsertOptions};
pub use edge_index::{EdgeIndex, EdgeSnapshot, EdgeIter, EdgeRecord};

// ============================================================================
// Persistence Trait
// ============================================================================

/// Durable storage for frozen nodes.
///
/// Called outside every store lock. Implementations may be slow; the
/// in-memory engine never waits on them while holding state.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// Make a freshly frozen node durable.
    async fn persist(&self, node: &Node) -> Result<()>;

    /// Forget the durable copy of a node that has been removed.
    async fn retract(&self, id: &str) -> Result<()>;

    /// Flush and release resources.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything. Used by `Graph::open_memory()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPersistence;

#[async_trait]
impl Persistence for NullPersistence {
    async fn persist(&self, _node: &Node) -> Result<()> { Ok(()) }
    async fn retract(&self, _id: &str) -> Result<()> { Ok(()) }
}

/// Keeps frozen nodes in a map. Handy for embedding and for tests that
/// need to observe what reached durable storage.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    frozen: RwLock<HashMap<String, Node>>,
    fail_next: AtomicBool,
    fail_next_retract: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.frozen.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.frozen.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `persist` call fail once.
    pub fn fail_next_persist(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_retract(&self) {
        self.fail_next_retract.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn persist(&self, node: &Node) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Internal(format!("durable write of '{}' failed", node.id)));
        }
        self.frozen.write().insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn retract(&self, id: &str) -> Result<()> {
        if self.fail_next_retract.swap(false, Ordering::SeqCst) {
            return Err(Error::Internal(format!("durable retract of '{id}' failed")));
        }
        self.frozen.write().remove(id);
        Ok(())
    }
}

#[async_trait]
impl<P: Persistence> Persistence for std::sync::Arc<P> {
    async fn persist(&self, node: &Node) -> Result<()> { (**self).persist(node).await }
    async fn retract(&self, id: &str) -> Result<()> { (**self).retract(id).await }
    async fn shutdown(&self) -> Result<()> { (**self).shutdown().await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeState;

    #[tokio::test]
    async fn test_memory_persistence_fail_once() {
        let p = MemoryPersistence::new();
        let node = Node::new("a", "t", NodeState::Ice);
        p.fail_next_persist();
        assert!(p.persist(&node).await.is_err());
        p.persist(&node).await.unwrap();
        assert_eq!(p.get("a").map(|n| n.id), Some("a".to_string()));
        p.retract("a").await.unwrap();
        assert!(p.is_empty());
    }
}
