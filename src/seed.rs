//! U-Core bootstrap ontology.
//!
//! One root node plus the canonical axis nodes, all `Ice`, with a
//! `contains` edge from the root to every axis.

use crate::export::{Atoms, ImportReport};
use crate::model::{Edge, MetaValue, Node, NodeState};
use crate::Error;

pub const UCORE_ROOT_ID: &str = "u-core-ontology-root";
pub const UCORE_ROOT_TYPE: &str = "codex.ucore.root";
pub const UCORE_AXIS_TYPE: &str = "codex.ucore.axis";

/// `(axis, title, keywords)`.
const AXES: &[(&str, &str, &[&str])] = &[
    ("unity", "Unity", &["oneness", "wholeness", "integration"]),
    ("resonance", "Resonance", &["harmony", "frequency", "alignment"]),
    ("water_states", "Water States", &["ice", "water", "gas", "matter"]),
    ("consciousness", "Consciousness", &["awareness", "mind", "perception"]),
    ("transformation", "Transformation", &["change", "growth", "evolution"]),
    ("joy", "Joy", &["delight", "celebration", "play"]),
    ("abundance", "Abundance", &["flow", "prosperity", "sharing"]),
    ("wisdom", "Wisdom", &["knowledge", "insight", "understanding"]),
];

pub fn axis_id(axis: &str) -> String {
    format!("u-core-axis-{axis}")
}

/// The seed as an atoms bundle.
pub fn ucore_atoms() -> Atoms {
    let mut nodes = vec![
        Node::new(UCORE_ROOT_ID, UCORE_ROOT_TYPE, NodeState::Ice)
            .with_title("U-Core Ontology")
            .with_description("Root of the canonical U-Core axes"),
    ];
    let mut edges = Vec::with_capacity(AXES.len());
    for (axis, title, keywords) in AXES {
        let id = axis_id(axis);
        let keywords: Vec<MetaValue> = keywords.iter().map(|k| MetaValue::from(*k)).collect();
        nodes.push(
            Node::new(&id, UCORE_AXIS_TYPE, NodeState::Ice)
                .with_title(*title)
                .with_meta("axis", *axis)
                .with_meta("keywords", keywords),
        );
        edges.push(Edge::new(UCORE_ROOT_ID, id, "contains").with_relationship_type("structure"));
    }
    Atoms { nodes, edges }
}

/// Insert the seed into `nodes`/`edges`. Nodes already present keep their
/// current contents, so re-seeding changes nothing.
pub(crate) fn apply(
    nodes: &crate::storage::NodeStore,
    edges: &crate::storage::EdgeIndex,
) -> ImportReport {
    let atoms = ucore_atoms();
    let mut report = ImportReport::default();
    for node in atoms.nodes {
        if nodes.contains(&node.id) {
            continue;
        }
        let id = node.id.clone();
        match nodes.upsert(node, Default::default()) {
            Ok(_) => report.nodes_upserted += 1,
            // Lost a race with a concurrent seed.
            Err(Error::Conflict(_)) => {}
            Err(e) => report.failures.push(format!("node '{id}': {e}")),
        }
    }
    for edge in atoms.edges {
        match edges.add(edge) {
            Ok(_) => report.edges_added += 1,
            Err(Error::Conflict(_)) => report.edges_skipped += 1,
            Err(e) => report.failures.push(e.to_string()),
        }
    }
    report
}
