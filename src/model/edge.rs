//! Edge (directed relationship) between two node identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Meta, MetaValue, RELATIONSHIP_TYPE_KEY};
use crate::{Error, Result};

/// Uniqueness key of an edge: (`from_id`, `to_id`, `role`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub from_id: String,
    pub to_id: String,
    pub role: String,
}

impl EdgeKey {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self { from_id: from_id.into(), to_id: to_id.into(), role: role.into() }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.from_id, self.role, self.to_id)
    }
}

/// A directed, typed, weighted relationship.
///
/// Endpoints are weak references: neither node has to exist.
/// `weight` is an opaque signed rank key, not a probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,
    pub role: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
}

impl Edge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            role: role.into(),
            weight: 0.0,
            meta: Meta::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key, value);
        self
    }

    pub fn with_relationship_type(self, relationship_type: impl Into<String>) -> Self {
        self.with_meta(RELATIONSHIP_TYPE_KEY, relationship_type.into())
    }

    /// Secondary classification from `meta.relationshipType`.
    pub fn relationship_type(&self) -> Option<&str> {
        self.meta.get_str(RELATIONSHIP_TYPE_KEY)
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.from_id, &self.to_id, &self.role)
    }

    /// The other end of the edge from the given node id.
    pub fn other_end(&self, id: &str) -> Option<&str> {
        if id == self.from_id { Some(&self.to_id) }
        else if id == self.to_id { Some(&self.from_id) }
        else { None }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.from_id == id || self.to_id == id
    }

    /// Reject edges the index cannot key or order.
    pub fn validate(&self) -> Result<()> {
        if self.from_id.is_empty() || self.to_id.is_empty() {
            return Err(Error::InvalidArgument(format!("edge {} has an empty endpoint id", self.key())));
        }
        if self.role.is_empty() {
            return Err(Error::InvalidArgument(format!("edge {} has an empty role", self.key())));
        }
        if !self.weight.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "edge {} weight must be finite, got {}",
                self.key(),
                self.weight
            )));
        }
        Ok(())
    }
}
