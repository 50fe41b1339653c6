//! Type-tag registry.
//!
//! Maps known `typeId` namespaces (e.g. `codex.concept`) to validators.
//! Unregistered type ids are never rejected: the registry only adds checks
//! for namespaces it knows about.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{Node, ValueKind};
use crate::{Error, Result};

/// Validation hook for one namespace.
pub trait TypeValidator: Send + Sync {
    fn validate(&self, node: &Node) -> Result<()>;
}

/// Checks the kind of one `meta` field, and optionally that it is present.
#[derive(Debug, Clone)]
pub struct MetaFieldValidator {
    pub field: String,
    pub kind: ValueKind,
    pub required: bool,
}

impl MetaFieldValidator {
    pub fn optional(field: impl Into<String>, kind: ValueKind) -> Self {
        Self { field: field.into(), kind, required: false }
    }

    pub fn required(field: impl Into<String>, kind: ValueKind) -> Self {
        Self { field: field.into(), kind, required: true }
    }
}

impl TypeValidator for MetaFieldValidator {
    fn validate(&self, node: &Node) -> Result<()> {
        match node.meta.get(&self.field) {
            None if self.required => Err(Error::InvalidArgument(format!(
                "{} node '{}' requires meta.{}",
                node.type_id, node.id, self.field
            ))),
            None => Ok(()),
            Some(v) if v.kind() == self.kind => Ok(()),
            Some(v) => Err(Error::InvalidArgument(format!(
                "{} node '{}': meta.{} must be a {}, got {}",
                node.type_id,
                node.id,
                self.field,
                self.kind,
                v.kind()
            ))),
        }
    }
}

/// Runs a sequence of validators.
pub struct AllOf(pub Vec<Box<dyn TypeValidator>>);

impl TypeValidator for AllOf {
    fn validate(&self, node: &Node) -> Result<()> {
        self.0.iter().try_for_each(|v| v.validate(node))
    }
}

/// `type_id` belongs to `namespace` when it equals it or continues it with
/// a `.` or `/` separator.
pub fn in_namespace(type_id: &str, namespace: &str) -> bool {
    match type_id.strip_prefix(namespace) {
        Some("") => true,
        Some(rest) => rest.starts_with('.') || rest.starts_with('/'),
        None => false,
    }
}

/// Open registry of namespace → validator.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<Vec<(String, Arc<dyn TypeValidator>)>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the namespaces the codex ontology uses.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            "codex.concept",
            AllOf(vec![
                Box::new(MetaFieldValidator::optional("keywords", ValueKind::List)),
                Box::new(MetaFieldValidator::optional("level", ValueKind::Number)),
                Box::new(MetaFieldValidator::optional("axes", ValueKind::List)),
            ]),
        );
        registry.register(
            "codex.ucore.axis",
            AllOf(vec![
                Box::new(MetaFieldValidator::required("axis", ValueKind::String)),
                Box::new(MetaFieldValidator::optional("keywords", ValueKind::List)),
            ]),
        );
        registry
    }

    /// Register (or replace) the validator for a namespace.
    pub fn register(&self, namespace: impl Into<String>, validator: impl TypeValidator + 'static) {
        let namespace = namespace.into();
        let validator: Arc<dyn TypeValidator> = Arc::new(validator);
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(ns, _)| *ns == namespace) {
            Some(slot) => slot.1 = validator,
            None => entries.push((namespace, validator)),
        }
    }

    pub fn is_registered(&self, namespace: &str) -> bool {
        self.entries.read().iter().any(|(ns, _)| ns == namespace)
    }

    /// Run every validator whose namespace contains the node's type id.
    pub fn validate(&self, node: &Node) -> Result<()> {
        let matching: Vec<Arc<dyn TypeValidator>> = self
            .entries
            .read()
            .iter()
            .filter(|(ns, _)| in_namespace(&node.type_id, ns))
            .map(|(_, v)| v.clone())
            .collect();
        matching.iter().try_for_each(|v| v.validate(node))
    }

    /// Build the matcher used by type filters: registered namespaces match
    /// by prefix, anything else by exact equality.
    pub fn type_matcher(&self, filter: &str) -> TypeMatch {
        if self.is_registered(filter) {
            TypeMatch::Namespace(filter.to_string())
        } else {
            TypeMatch::Exact(filter.to_string())
        }
    }
}

/// Resolved `typeId` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeMatch {
    Exact(String),
    Namespace(String),
}

impl TypeMatch {
    pub fn matches(&self, type_id: &str) -> bool {
        match self {
            TypeMatch::Exact(t) => t == type_id,
            TypeMatch::Namespace(ns) => in_namespace(type_id, ns),
        }
    }
}
