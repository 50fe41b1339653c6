//! End-to-end tests for the Ice / Water / Gas lifecycle, including the
//! durable sink on freeze.

use std::sync::Arc;

use codex_graph::{
    Caller, Edge, Error, Graph, GraphConfig, MemoryPersistence, Node, NodeState, RequestScope, UpsertOptions,
};
use pretty_assertions::assert_eq;

async fn durable_graph() -> (Graph<Arc<MemoryPersistence>>, Arc<MemoryPersistence>) {
    let sink = Arc::new(MemoryPersistence::new());
    let graph = Graph::open(GraphConfig::default(), sink.clone()).await.unwrap();
    (graph, sink)
}

fn water(id: &str) -> Node {
    Node::new(id, "codex.concept", NodeState::Water).with_title(id)
}

// ============================================================================
// 1. Gas → Water
// ============================================================================

#[tokio::test]
async fn test_gas_lives_in_scope_until_promoted() {
    let graph = Graph::open_memory().await.unwrap();
    let mut scope = RequestScope::new();
    scope.derive(water("derived"));

    assert!(matches!(graph.get_node("derived"), Err(Error::NotFound(_))));
    let promoted = graph.promote(&mut scope, "derived").unwrap();
    assert_eq!(promoted.state, NodeState::Water);
    assert_eq!(graph.get_node("derived").unwrap().state, NodeState::Water);
}

#[tokio::test]
async fn test_dropped_scope_leaves_no_trace() {
    let graph = Graph::open_memory().await.unwrap();
    {
        let mut scope = RequestScope::new();
        scope.derive(water("ephemeral"));
    }
    assert!(graph.nodes().is_empty());
}

#[tokio::test]
async fn test_gas_never_freezes_directly() {
    let graph = Graph::open_memory().await.unwrap();
    let mut scope = RequestScope::new();
    scope.derive(water("g"));
    // Not in the store, so there is nothing to freeze.
    assert!(matches!(graph.freeze("g").await, Err(Error::NotFound(_))));
}

// ============================================================================
// 2. Water → Ice
// ============================================================================

#[tokio::test]
async fn test_freeze_persists() {
    let (graph, sink) = durable_graph().await;
    graph.upsert_node(water("a"), UpsertOptions::default(), &Caller::anonymous()).unwrap();

    let ice = graph.freeze("a").await.unwrap();
    assert_eq!(ice.state, NodeState::Ice);
    assert_eq!(sink.get("a").map(|n| n.state), Some(NodeState::Ice));
    assert!(matches!(graph.freeze("a").await, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_failed_persist_reverts_to_water() {
    let (graph, sink) = durable_graph().await;
    graph.upsert_node(water("a"), UpsertOptions::default(), &Caller::anonymous()).unwrap();
    sink.fail_next_persist();

    let err = graph.freeze("a").await.unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
    assert_eq!(err.public_message(), "internal error");
    assert_eq!(graph.get_node("a").unwrap().state, NodeState::Water);
    assert!(sink.is_empty());

    // The retry goes through.
    assert_eq!(graph.freeze("a").await.unwrap().state, NodeState::Ice);
}

#[tokio::test]
async fn test_remove_survives_failed_retract() {
    let (graph, sink) = durable_graph().await;
    graph.upsert_node(water("a"), UpsertOptions::default(), &Caller::anonymous()).unwrap();
    graph.freeze("a").await.unwrap();
    graph.unfreeze("a", &Caller::privileged()).unwrap();
    sink.fail_next_retract();

    assert_eq!(graph.remove_node("a").await.unwrap().id, "a");
    assert!(matches!(graph.get_node("a"), Err(Error::NotFound(_))));
    // The durable copy is stale but the removal stands.
    assert!(sink.get("a").is_some());
    assert!(matches!(graph.remove_node("a").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_pending_draft_blocks_freeze() {
    let graph = Graph::open_memory().await.unwrap();
    graph.upsert_node(water("a"), UpsertOptions::draft(), &Caller::anonymous()).unwrap();
    assert!(matches!(graph.freeze("a").await, Err(Error::Conflict(_))));

    let as_ice = Node::new("a", "codex.concept", NodeState::Ice);
    assert!(matches!(
        graph.upsert_node(as_ice, UpsertOptions::default(), &Caller::anonymous()),
        Err(Error::Conflict(_))
    ));
}

// ============================================================================
// 3. Ice → Water
// ============================================================================

#[tokio::test]
async fn test_unfreeze_requires_capability() {
    let graph = Graph::open_memory().await.unwrap();
    graph.upsert_node(water("a"), UpsertOptions::default(), &Caller::anonymous()).unwrap();
    graph.freeze("a").await.unwrap();

    assert!(matches!(graph.unfreeze("a", &Caller::anonymous()), Err(Error::Forbidden(_))));
    assert_eq!(graph.get_node("a").unwrap().state, NodeState::Ice);

    let thawed = graph.unfreeze("a", &Caller::privileged()).unwrap();
    assert_eq!(thawed.state, NodeState::Water);
    assert!(matches!(graph.unfreeze("a", &Caller::privileged()), Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_promote_over_ice_conflicts() {
    let graph = Graph::open_memory().await.unwrap();
    graph
        .upsert_node(Node::new("a", "codex.concept", NodeState::Ice), UpsertOptions::default(), &Caller::anonymous())
        .unwrap();
    let mut scope = RequestScope::new();
    scope.derive(water("a"));
    assert!(matches!(graph.promote(&mut scope, "a"), Err(Error::Conflict(_))));
    assert_eq!(graph.get_node("a").unwrap().state, NodeState::Ice);
}

// ============================================================================
// 4. Eviction
// ============================================================================

#[tokio::test]
async fn test_evict_respects_referrers() {
    let graph = Graph::open_memory().await.unwrap();
    for id in ["lonely", "linked"] {
        graph.upsert_node(water(id), UpsertOptions::default(), &Caller::anonymous()).unwrap();
    }
    graph.add_edge(Edge::new("other", "linked", "mentions")).unwrap();

    assert!(matches!(graph.evict("linked"), Err(Error::Conflict(_))));
    graph.evict("lonely").unwrap();
    assert!(matches!(graph.get_node("lonely"), Err(Error::NotFound(_))));

    graph.remove_edge("other", "linked", "mentions").unwrap();
    graph.evict("linked").unwrap();
}

#[tokio::test]
async fn test_ice_is_never_evicted() {
    let graph = Graph::open_memory().await.unwrap();
    graph
        .upsert_node(Node::new("a", "codex.concept", NodeState::Ice), UpsertOptions::default(), &Caller::anonymous())
        .unwrap();
    assert!(matches!(graph.evict("a"), Err(Error::Conflict(_))));
    assert_eq!(graph.lifecycle().sweep(0), 0);
    assert!(graph.nodes().contains("a"));
}

#[tokio::test]
async fn test_cache_cap_sweeps_on_promote() {
    let config = GraphConfig::from_toml_str("[lifecycle]\nmax_cached_nodes = 3").unwrap();
    let graph = Graph::open(config, codex_graph::NullPersistence).await.unwrap();
    let mut scope = RequestScope::new();
    for i in 0..5 {
        let id = format!("w{i}");
        scope.derive(water(&id));
        graph.promote(&mut scope, &id).unwrap();
    }
    assert_eq!(graph.lifecycle().cached(), 3);
    let ids: Vec<String> = graph.list_nodes(&Default::default()).map(|n| n.id).collect();
    assert_eq!(ids, vec!["w2", "w3", "w4"]);
}
