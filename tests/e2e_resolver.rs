//! End-to-end tests for edge resolution against the node store.

use codex_graph::{
    Caller, Edge, EdgeFilter, Endpoint, Graph, Node, NodeState, Pagination, RequestScope, UpsertOptions,
};
use pretty_assertions::assert_eq;

async fn graph_with(ids: &[&str]) -> Graph {
    let graph = Graph::open_memory().await.unwrap();
    for id in ids {
        graph
            .upsert_node(Node::new(*id, "codex.concept", NodeState::Ice).with_title(*id), UpsertOptions::default(), &Caller::anonymous())
            .unwrap();
    }
    graph
}

#[tokio::test]
async fn test_resolve_both_endpoints() {
    let graph = graph_with(&["a", "b"]).await;
    let resolved = graph.resolve(Edge::new("a", "b", "is_a"));
    assert_eq!(resolved.from_node.node().map(|n| n.id.as_str()), Some("a"));
    assert_eq!(resolved.to_node.node().map(|n| n.id.as_str()), Some("b"));
}

#[tokio::test]
async fn test_dangling_endpoint_is_unresolved() {
    let graph = graph_with(&["a"]).await;
    let resolved = graph.resolve(Edge::new("a", "missing", "is_a"));
    assert!(resolved.from_node.is_resolved());
    match resolved.to_node {
        Endpoint::Unresolved { id, reason } => {
            assert_eq!(id, "missing");
            assert!(!reason.is_empty());
        }
        other => panic!("expected unresolved, got {other:?}"),
    }
}

#[tokio::test]
async fn test_resolved_search_keeps_partial_results() {
    let graph = graph_with(&["hub", "x", "z"]).await;
    for to in ["x", "gone", "z"] {
        graph.add_edge(Edge::new("hub", to, "contains")).unwrap();
    }
    let page = graph.search_edges_resolved(&EdgeFilter::outgoing("hub"), Pagination::default()).unwrap();
    assert_eq!(page.total_count, 3);
    let flags: Vec<bool> = page.items.iter().map(|r| r.to_node.is_resolved()).collect();
    assert_eq!(flags, vec![true, false, true]);
    assert!(page.items.iter().all(|r| r.from_node.is_resolved()));
}

#[tokio::test]
async fn test_batch_preserves_order_and_shares_endpoints() {
    let graph = graph_with(&["a", "b", "c"]).await;
    let edges = vec![Edge::new("a", "b", "r"), Edge::new("b", "c", "r"), Edge::new("a", "c", "r")];
    let out = graph.batch_resolve(edges.clone());
    let back: Vec<Edge> = out.iter().map(|r| r.edge.clone()).collect();
    assert_eq!(back, edges);
    assert_eq!(out[0].to_node, out[1].from_node);
}

#[tokio::test]
async fn test_scope_nodes_resolve_before_promotion() {
    let graph = graph_with(&["a"]).await;
    graph.add_edge(Edge::new("a", "derived", "suggests")).unwrap();

    let mut scope = RequestScope::new();
    scope.derive(Node::new("derived", "codex.concept", NodeState::Water));

    let plain = graph.search_edges_resolved(&EdgeFilter::outgoing("a"), Pagination::default()).unwrap();
    assert!(!plain.items[0].to_node.is_resolved());

    let scoped = graph
        .query()
        .search_edges_resolved_in(&EdgeFilter::outgoing("a"), Pagination::default(), &scope)
        .unwrap();
    assert_eq!(scoped.items[0].to_node.node().map(|n| n.state), Some(NodeState::Gas));
}
