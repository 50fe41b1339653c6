//! # Lifecycle
//!
//! Content states and their transitions:
//!
//! ```text
//!   Gas ──promote──▶ Water ──freeze──▶ Ice
//!  (request)        (cached)  ◀──unfreeze── (durable)
//!                     │
//!                   evict
//! ```
//!
//! `Gas` nodes never enter the shared store: they live in a
//! [`RequestScope`] and disappear with it unless promoted. `Water` nodes may
//! be evicted once nothing refers to them. `Ice` is immutable without the
//! `Unfreeze` capability.

use std::sync::Arc;

use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::model::{Node, NodeState};
use crate::storage::node_store::Change;
use crate::storage::{EdgeIndex, NodeStore};
use crate::{Error, Result};

// ============================================================================
// Callers
// ============================================================================

/// Privileges a caller may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Modify or thaw `Ice` content.
    Unfreeze,
}

impl std::str::FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unfreeze" => Ok(Capability::Unfreeze),
            other => Err(Error::InvalidArgument(format!("unknown capability '{other}'"))),
        }
    }
}

/// Who is asking, and with which capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    capabilities: SmallVec<[Capability; 2]>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn privileged() -> Self {
        Self::default().with(Capability::Unfreeze)
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Parse a comma-separated capability list. Unknown names are ignored.
    pub fn from_header(value: &str) -> Self {
        value
            .split(',')
            .filter_map(|s| s.parse::<Capability>().ok())
            .fold(Self::default(), Self::with)
    }

    pub(crate) fn require(&self, capability: Capability, action: &str) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!("{action} requires the {capability:?} capability")))
        }
    }
}

// ============================================================================
// RequestScope
// ============================================================================

/// Request-lifetime holder of derived (`Gas`) nodes. Dropping the scope
/// discards whatever was not promoted.
#[derive(Debug, Default)]
pub struct RequestScope {
    nodes: HashMap<String, Node>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a derived node. Its state is forced to `Gas`.
    pub fn derive(&mut self, mut node: Node) -> &Node {
        let now = Utc::now();
        node.state = NodeState::Gas;
        node.created_at = now;
        node.updated_at = now;
        node.version = 0;
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        &self.nodes[&id]
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    fn take(&mut self, id: &str) -> Option<Node> {
        self.nodes.remove(id)
    }
}

// ============================================================================
// LifecycleManager
// ============================================================================

/// Applies state transitions against the shared store.
pub struct LifecycleManager {
    nodes: Arc<NodeStore>,
    edges: Arc<EdgeIndex>,
    leases: Mutex<HashMap<String, usize>>,
    max_cached: Option<usize>,
}

impl LifecycleManager {
    pub fn new(nodes: Arc<NodeStore>, edges: Arc<EdgeIndex>, max_cached: Option<usize>) -> Self {
        Self { nodes, edges, leases: Mutex::new(HashMap::new()), max_cached }
    }

    /// Move a `Gas` node from `scope` into the store as `Water`.
    ///
    /// An existing `Water` node with the same id is refreshed; an `Ice` one
    /// is a `Conflict`. On failure the node stays in the scope.
    pub fn promote(&self, scope: &mut RequestScope, id: &str) -> Result<Node> {
        let gas = scope
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("gas node '{id}' in request scope")))?;
        self.nodes.registry().validate(&gas)?;

        let promoted = self.nodes.update(id, |existing| {
            if let Some(r) = existing {
                if r.node.state == NodeState::Ice {
                    return Err(Error::Conflict(format!("node '{id}' is frozen; cannot promote over it")));
                }
            }
            let mut node = gas;
            if !node.state.can_transition_to(NodeState::Water) {
                return Err(Error::InvalidArgument(format!("node '{id}' is {}; only gas can promote", node.state)));
            }
            node.state = NodeState::Water;
            Ok(Change::Put { node, pending: false })
        })?;
        scope.take(id);
        debug!(node = %id, "gas promoted to water");

        if let Some(limit) = self.max_cached {
            self.sweep_except(limit, Some(id));
        }
        Ok(promoted)
    }

    /// `Water` → `Ice`, in memory only. The caller makes the node durable
    /// and calls [`revert_freeze`](Self::revert_freeze) if that fails.
    pub fn freeze(&self, id: &str) -> Result<Node> {
        let frozen = self.nodes.update(id, |existing| {
            let r = existing.ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
            if !r.node.state.can_transition_to(NodeState::Ice) {
                return Err(Error::Conflict(format!("node '{id}' is {}; only water can freeze", r.node.state)));
            }
            if r.pending {
                return Err(Error::Conflict(format!(
                    "node '{id}' has an uncommitted mutation and cannot be frozen"
                )));
            }
            let mut node = r.node.clone();
            node.state = NodeState::Ice;
            Ok(Change::Put { node, pending: false })
        })?;
        info!(node = %id, version = frozen.version, "node frozen");
        Ok(frozen)
    }

    /// Undo a [`freeze`](Self::freeze) whose durable write failed, unless
    /// the node has been changed since.
    pub fn revert_freeze(&self, frozen: &Node) -> Result<Node> {
        self.nodes.update(&frozen.id, |existing| match existing {
            Some(r) if r.node.state == NodeState::Ice && r.node.version == frozen.version => {
                let mut node = r.node.clone();
                node.state = NodeState::Water;
                Ok(Change::Put { node, pending: false })
            }
            Some(_) => Ok(Change::Keep),
            None => Err(Error::NotFound(format!("node '{}'", frozen.id))),
        })
    }

    /// `Ice` → `Water`. Requires [`Capability::Unfreeze`].
    pub fn unfreeze(&self, id: &str, caller: &Caller) -> Result<Node> {
        caller.require(Capability::Unfreeze, "unfreeze")?;
        let thawed = self.nodes.update(id, |existing| {
            let r = existing.ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
            // The store never holds gas, so water is the only other state here.
            if !r.node.state.can_transition_to(NodeState::Water) {
                return Err(Error::Conflict(format!("node '{id}' is {}; only ice can unfreeze", r.node.state)));
            }
            let mut node = r.node.clone();
            node.state = NodeState::Water;
            Ok(Change::Put { node, pending: false })
        })?;
        info!(node = %id, version = thawed.version, "node unfrozen");
        Ok(thawed)
    }

    /// Drop a cached `Water` node. Fails with `Conflict` for `Ice`, a pending
    /// draft or any active referrer.
    pub fn evict(&self, id: &str) -> Result<Node> {
        let evicted = self.nodes.update(id, |existing| {
            let r = existing.ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
            if r.node.state != NodeState::Water {
                return Err(Error::Conflict(format!("node '{id}' is {}; only water is evictable", r.node.state)));
            }
            if r.pending {
                return Err(Error::Conflict(format!("node '{id}' has an uncommitted mutation")));
            }
            let refs = self.referrers(id);
            if refs > 0 {
                return Err(Error::Conflict(format!("node '{id}' has {refs} active referrers")));
            }
            Ok(Change::Remove)
        })?;
        debug!(node = %id, "water evicted");
        Ok(evicted)
    }

    /// Take a lease on `id`; leased nodes are never evicted.
    pub fn retain(&self, id: &str) {
        *self.leases.lock().entry_ref(id).or_insert(0) += 1;
    }

    /// Give back one lease taken with [`retain`](Self::retain).
    pub fn release(&self, id: &str) {
        let mut leases = self.leases.lock();
        if let Some(n) = leases.get_mut(id) {
            *n -= 1;
            if *n == 0 {
                leases.remove(id);
            }
        }
    }

    /// Edges at either end plus outstanding leases.
    pub fn referrers(&self, id: &str) -> usize {
        let leased = self.leases.lock().get(id).copied().unwrap_or(0);
        self.edges.degree(id) + leased
    }

    /// Number of `Water` nodes currently cached.
    pub fn cached(&self) -> usize {
        self.nodes
            .snapshot()
            .records(Default::default())
            .filter(|r| r.node.state == NodeState::Water)
            .count()
    }

    /// Evict unreferenced `Water` nodes, oldest first, until at most `limit`
    /// remain. Returns how many were evicted.
    pub fn sweep(&self, limit: usize) -> usize {
        self.sweep_except(limit, None)
    }

    fn sweep_except(&self, limit: usize, keep: Option<&str>) -> usize {
        let water: Vec<String> = self
            .nodes
            .snapshot()
            .records(Default::default())
            .filter(|r| r.node.state == NodeState::Water)
            .map(|r| r.node.id.clone())
            .collect();
        let mut remaining = water.len();
        let mut evicted = 0;
        for id in water {
            if remaining <= limit {
                break;
            }
            if keep == Some(id.as_str()) {
                continue;
            }
            if self.evict(&id).is_ok() {
                remaining -= 1;
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, remaining, limit, "water cache swept");
        }
        evicted
    }
}
