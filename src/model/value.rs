//! Typed value carried in node and edge `meta` bags.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Extension attribute value.
///
/// Covers what shows up in `meta` maps on the wire:
/// - Scalars: Null, Bool, Int, Float, String
/// - Containers: List, Map
///
/// Serialized untagged so a `meta` bag round-trips as plain JSON.
/// Variant order matters for deserialization: integers are tried before
/// floats so `3` stays an `Int`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

/// Shape of a [`MetaValue`], used by type validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    List,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Type checking
// ============================================================================

impl MetaValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            MetaValue::Null => ValueKind::Null,
            MetaValue::Bool(_) => ValueKind::Bool,
            MetaValue::Int(_) | MetaValue::Float(_) => ValueKind::Number,
            MetaValue::String(_) => ValueKind::String,
            MetaValue::List(_) => ValueKind::List,
            MetaValue::Map(_) => ValueKind::Map,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, MetaValue::Null) }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view; floats with no fractional part also qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            MetaValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Float(f) => Some(*f),
            MetaValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Strings of a list value, skipping non-string elements.
    pub fn str_items(&self) -> impl Iterator<Item = &str> {
        self.as_list()
            .unwrap_or_default()
            .iter()
            .filter_map(MetaValue::as_str)
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for MetaValue { fn from(v: bool) -> Self { MetaValue::Bool(v) } }
impl From<i32> for MetaValue { fn from(v: i32) -> Self { MetaValue::Int(v as i64) } }
impl From<i64> for MetaValue { fn from(v: i64) -> Self { MetaValue::Int(v) } }
impl From<f64> for MetaValue { fn from(v: f64) -> Self { MetaValue::Float(v) } }
impl From<String> for MetaValue { fn from(v: String) -> Self { MetaValue::String(v) } }
impl From<&str> for MetaValue { fn from(v: &str) -> Self { MetaValue::String(v.to_owned()) } }
impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(v: Vec<T>) -> Self { MetaValue::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(MetaValue::Null) }
}

impl From<serde_json::Value> for MetaValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => MetaValue::Null,
            J::Bool(b) => MetaValue::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Int(i),
                None => MetaValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => MetaValue::String(s),
            J::Array(a) => MetaValue::List(a.into_iter().map(Into::into).collect()),
            J::Object(o) => MetaValue::Map(o.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Null => write!(f, "null"),
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            MetaValue::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            MetaValue::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(MetaValue::from("hello"), MetaValue::String("hello".into()));
        assert_eq!(MetaValue::from(42), MetaValue::Int(42));
        assert_eq!(MetaValue::from(0.5), MetaValue::Float(0.5));
        assert_eq!(MetaValue::from(true), MetaValue::Bool(true));
        assert_eq!(MetaValue::from(None::<i64>), MetaValue::Null);
    }

    #[test]
    fn test_untagged_json_keeps_ints_and_nesting() {
        let v: MetaValue = serde_json::from_str(r#"{"level": 3, "score": -0.25, "keywords": ["matter", "form"]}"#).unwrap();
        let map = v.as_map().unwrap();
        assert_eq!(map["level"], MetaValue::Int(3));
        assert_eq!(map["score"].as_f64(), Some(-0.25));
        assert_eq!(map["keywords"].str_items().collect::<Vec<_>>(), vec!["matter", "form"]);
        assert_eq!(serde_json::to_string(&map["level"]).unwrap(), "3");
    }

    #[test]
    fn test_kind_groups_numbers() {
        assert_eq!(MetaValue::Int(1).kind(), ValueKind::Number);
        assert_eq!(MetaValue::Float(1.5).kind(), ValueKind::Number);
        assert_eq!(MetaValue::Float(2.0).as_i64(), Some(2));
        assert_eq!(MetaValue::Float(2.5).as_i64(), None);
    }

    #[test]
    fn test_from_json_value() {
        let j = serde_json::json!({"axes": [{"id": "u-core-axis-unity"}], "flag": false});
        let v = MetaValue::from(j);
        let axes = v.as_map().unwrap()["axes"].as_list().unwrap();
        assert_eq!(axes[0].as_map().unwrap()["id"].as_str(), Some("u-core-axis-unity"));
    }
}
