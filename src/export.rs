//! Atoms bundle: bulk export and import of a whole graph.
//!
//! ```text
//! Graph → export_atoms() → { "nodes": [...], "edges": [...] }
//!   → file / HTTP body → import_atoms() → Graph
//! ```
//!
//! Export reads one snapshot of each table, so the bundle is internally
//! consistent. Import is best-effort: each failing item is recorded in the
//! report and the rest of the batch continues.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::{Edge, Node};
use crate::query::EdgeFilter;
use crate::storage::{EdgeIndex, NodeStore, UpsertOptions};
use crate::{Error, Result};

/// Serialized graph contents in listing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Atoms {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Atoms {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn write_json(&self, writer: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *writer, self)?;
        writeln!(writer)?;
        Ok(())
    }
}

/// Outcome of [`import_atoms`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub nodes_upserted: usize,
    pub edges_added: usize,
    /// Edges already present.
    pub edges_skipped: usize,
    pub failures: Vec<String>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn export_atoms(nodes: &NodeStore, edges: &EdgeIndex) -> Atoms {
    let nodes: Vec<Node> = nodes.snapshot().scan(Default::default()).collect();
    let edges: Vec<Edge> = edges.snapshot().scan(EdgeFilter::default()).collect();
    info!(nodes = nodes.len(), edges = edges.len(), "atoms exported");
    Atoms { nodes, edges }
}

pub fn import_atoms(nodes: &NodeStore, edges: &EdgeIndex, atoms: Atoms) -> ImportReport {
    let mut report = ImportReport::default();
    for node in atoms.nodes {
        let id = node.id.clone();
        match nodes.upsert(node, UpsertOptions::default()) {
            Ok(_) => report.nodes_upserted += 1,
            Err(e) => report.failures.push(format!("node '{id}': {}", e.public_message())),
        }
    }
    for edge in atoms.edges {
        let key = edge.key();
        match edges.add(edge) {
            Ok(_) => report.edges_added += 1,
            Err(Error::Conflict(_)) => report.edges_skipped += 1,
            Err(e) => report.failures.push(format!("edge {key}: {}", e.public_message())),
        }
    }
    if report.is_clean() {
        info!(nodes = report.nodes_upserted, edges = report.edges_added, skipped = report.edges_skipped, "atoms imported");
    } else {
        warn!(failures = report.failures.len(), "atoms imported with failures");
    }
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::NodeState;
    use crate::registry::TypeRegistry;

    #[test]
    fn test_parse_bundle_with_missing_sections() {
        let atoms = Atoms::from_json(r#"{"nodes":[{"id":"a","typeId":"t","state":"Ice"}]}"#).unwrap();
        assert_eq!(atoms.nodes.len(), 1);
        assert_eq!(atoms.nodes[0].state, NodeState::Ice);
        assert!(atoms.edges.is_empty());
        assert!(matches!(Atoms::from_json("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_import_records_failures_and_skips() {
        let store = NodeStore::new(Arc::new(TypeRegistry::with_defaults()));
        let index = EdgeIndex::new();
        let atoms = Atoms {
            nodes: vec![
                Node::new("a", "t", NodeState::Ice),
                Node::new("gas", "t", NodeState::Gas),
            ],
            edges: vec![Edge::new("a", "b", "r"), Edge::new("a", "b", "r"), Edge::new("", "b", "r")],
        };
        let report = import_atoms(&store, &index, atoms);
        assert_eq!(report.nodes_upserted, 1);
        assert_eq!(report.edges_added, 1);
        assert_eq!(report.edges_skipped, 1);
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn test_write_json_is_parseable() {
        let atoms = Atoms { nodes: vec![Node::new("a", "t", NodeState::Water)], edges: vec![] };
        let mut buf = Vec::new();
        atoms.write_json(&mut buf).unwrap();
        let back = Atoms::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back.nodes[0].id, "a");
    }
}
