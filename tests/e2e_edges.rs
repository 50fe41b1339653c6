//! End-to-end tests for the edge index: tuple identity, AND filtering,
//! ordering and weak references.

use codex_graph::{Caller, Edge, EdgeFilter, Error, Graph, Node, NodeState, Pagination, UpsertOptions};
use pretty_assertions::assert_eq;

const MATTER: &str = "u-core-concept-kw-matter";

async fn scenario_a() -> Graph {
    let graph = Graph::open_memory().await.unwrap();
    graph
        .upsert_node(
            Node::new(MATTER, "codex.concept.keyword", NodeState::Ice),
            UpsertOptions::default(),
            &Caller::anonymous(),
        )
        .unwrap();
    graph
        .add_edge(Edge::new(MATTER, "u-core-axis-water_states", "concept_on_axis").with_weight(0.9))
        .unwrap();
    graph.add_edge(Edge::new(MATTER, "u-core-concept-entity", "is_a").with_weight(0.8)).unwrap();
    graph
}

// ============================================================================
// 1. Scenario A: two outgoing edges in insertion order
// ============================================================================

#[tokio::test]
async fn test_outgoing_edges_in_insertion_order() {
    let graph = scenario_a().await;
    let page = graph.search_edges(&EdgeFilter::outgoing(MATTER), Pagination::new(0, 100).unwrap()).unwrap();

    assert_eq!(page.total_count, 2);
    let roles: Vec<&str> = page.items.iter().map(|e| e.role.as_str()).collect();
    assert_eq!(roles, vec!["concept_on_axis", "is_a"]);
    assert_eq!(page.items[0].weight, 0.9);
}

#[tokio::test]
async fn test_edge_json_shape() {
    let graph = scenario_a().await;
    let page = graph.search_edges(&EdgeFilter::role("is_a"), Pagination::default()).unwrap();
    let json = serde_json::to_value(&page.items[0]).unwrap();
    assert_eq!(json["fromId"], MATTER);
    assert_eq!(json["toId"], "u-core-concept-entity");
    assert_eq!(json["role"], "is_a");
    assert_eq!(json["weight"], 0.8);
    assert!(json.get("meta").is_none());
}

// ============================================================================
// 2. Duplicate tuples
// ============================================================================

#[tokio::test]
async fn test_duplicate_tuple_is_conflict() {
    let graph = scenario_a().await;
    let dup = Edge::new(MATTER, "u-core-concept-entity", "is_a").with_weight(0.1);
    assert!(matches!(graph.add_edge(dup), Err(Error::Conflict(_))));

    // Index unchanged.
    let page = graph.search_edges(&EdgeFilter::outgoing(MATTER), Pagination::default()).unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.items[1].weight, 0.8);
}

#[tokio::test]
async fn test_invalid_edges_rejected() {
    let graph = Graph::open_memory().await.unwrap();
    assert!(matches!(graph.add_edge(Edge::new("", "b", "r")), Err(Error::InvalidArgument(_))));
    assert!(matches!(graph.add_edge(Edge::new("a", "b", "")), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        graph.add_edge(Edge::new("a", "b", "r").with_weight(f64::NAN)),
        Err(Error::InvalidArgument(_))
    ));
    assert!(graph.edges().is_empty());
}

// ============================================================================
// 3. Scenario C: fan-out
// ============================================================================

#[tokio::test]
async fn test_fan_out_from_axis() {
    let graph = Graph::open_memory().await.unwrap();
    let axis = "u-core-axis-unity";
    for i in 0..12 {
        graph.add_edge(Edge::new(axis, format!("target-{i:02}"), "contains")).unwrap();
    }
    let page = graph.search_edges(&EdgeFilter::outgoing(axis), Pagination::new(0, 100).unwrap()).unwrap();
    assert_eq!(page.total_count, 12);

    let mut targets: Vec<String> = page.items.into_iter().map(|e| e.to_id).collect();
    targets.dedup();
    assert_eq!(targets.len(), 12);
}

// ============================================================================
// 4. Filters & removal
// ============================================================================

#[tokio::test]
async fn test_filters_combine_with_and() {
    let graph = Graph::open_memory().await.unwrap();
    graph.add_edge(Edge::new("a", "b", "is_a").with_relationship_type("taxonomy")).unwrap();
    graph.add_edge(Edge::new("a", "c", "is_a")).unwrap();
    graph.add_edge(Edge::new("d", "b", "contains").with_relationship_type("taxonomy")).unwrap();

    let f = EdgeFilter { relationship_type: Some("taxonomy".into()), role: Some("is_a".into()), ..Default::default() };
    let page = graph.search_edges(&f, Pagination::default()).unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.items[0].to_id, "b");

    let incoming = graph.search_edges(&EdgeFilter::incoming("b"), Pagination::default()).unwrap();
    assert_eq!(incoming.total_count, 2);
}

#[tokio::test]
async fn test_remove_then_readd() {
    let graph = scenario_a().await;
    graph.remove_edge(MATTER, "u-core-concept-entity", "is_a").unwrap();
    assert!(matches!(
        graph.remove_edge(MATTER, "u-core-concept-entity", "is_a"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(graph.search_edges(&EdgeFilter::role("is_a"), Pagination::default()).unwrap().total_count, 0);

    // A re-added edge goes to the end of insertion order.
    graph.add_edge(Edge::new(MATTER, "u-core-concept-entity", "is_a")).unwrap();
    let page = graph.search_edges(&EdgeFilter::outgoing(MATTER), Pagination::default()).unwrap();
    assert_eq!(page.items.last().map(|e| e.role.as_str()), Some("is_a"));
}

#[tokio::test]
async fn test_weight_sort() {
    let graph = Graph::open_memory().await.unwrap();
    for (to, w) in [("x", 0.2), ("y", 0.9), ("z", 0.2), ("w", -0.5)] {
        graph.add_edge(Edge::new("a", to, "r").with_weight(w)).unwrap();
    }
    let page = graph.search_edges(&EdgeFilter::outgoing("a").by_weight(), Pagination::default()).unwrap();
    let order: Vec<String> = page.items.into_iter().map(|e| e.to_id).collect();
    assert_eq!(order, vec!["y", "x", "z", "w"]);
}

// ============================================================================
// 5. Weak references
// ============================================================================

#[tokio::test]
async fn test_edges_survive_node_removal() {
    let graph = Graph::open_memory().await.unwrap();
    graph
        .upsert_node(Node::new("a", "t", NodeState::Water), UpsertOptions::default(), &Caller::anonymous())
        .unwrap();
    graph.add_edge(Edge::new("a", "ghost", "r")).unwrap();
    graph.remove_node("a").await.unwrap();

    let touching: Vec<Edge> = graph.edges_touching("a").collect();
    assert_eq!(touching.len(), 1);
}
