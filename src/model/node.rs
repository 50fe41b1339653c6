//! Node in the knowledge graph.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Meta, MetaValue};
use crate::Error;

/// Lifecycle state of a node.
///
/// - **Ice**: frozen, durable, immutable. The canonical persisted form.
/// - **Water**: materialized, mutable, cached. Evictable once unreferenced.
/// - **Gas**: derived on demand, lives only inside the request that made it.
///
/// Forward motion is `Gas → Water → Ice`; `Ice → Water` (unfreeze) is the
/// only way back and there is no edge between Gas and Ice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Ice,
    Water,
    Gas,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Ice => "ice",
            NodeState::Water => "water",
            NodeState::Gas => "gas",
        }
    }

    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (NodeState::Gas, NodeState::Water)
                | (NodeState::Water, NodeState::Ice)
                | (NodeState::Ice, NodeState::Water)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ice" => Ok(NodeState::Ice),
            "water" => Ok(NodeState::Water),
            "gas" => Ok(NodeState::Gas),
            other => Err(Error::InvalidArgument(format!(
                "unknown node state '{other}' (expected ice, water or gas)"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for NodeState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Content
// ============================================================================

/// Payload body: exactly one of inline structured value, inline bytes, or
/// an external reference.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBody {
    Inline(MetaValue),
    Bytes(Vec<u8>),
    External(String),
}

/// Payload descriptor attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub media_type: String,
    pub body: ContentBody,
}

impl Content {
    pub fn inline(media_type: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self { media_type: media_type.into(), body: ContentBody::Inline(value.into()) }
    }

    pub fn bytes(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { media_type: media_type.into(), body: ContentBody::Bytes(bytes) }
    }

    pub fn external(media_type: impl Into<String>, uri: impl Into<String>) -> Self {
        Self { media_type: media_type.into(), body: ContentBody::External(uri.into()) }
    }
}

/// Wire form: `{mediaType, inlineJson? | inlineBytes? | externalUri?}`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentWire {
    media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_json: Option<MetaValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_bytes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    external_uri: Option<String>,
}

impl Serialize for Content {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut wire = ContentWire {
            media_type: self.media_type.clone(),
            inline_json: None,
            inline_bytes: None,
            external_uri: None,
        };
        match &self.body {
            ContentBody::Inline(v) => wire.inline_json = Some(v.clone()),
            ContentBody::Bytes(b) => wire.inline_bytes = Some(BASE64.encode(b)),
            ContentBody::External(uri) => wire.external_uri = Some(uri.clone()),
        }
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Content {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let wire = ContentWire::deserialize(deserializer)?;
        let body = match (wire.inline_json, wire.inline_bytes, wire.external_uri) {
            (Some(v), None, None) => ContentBody::Inline(v),
            (None, Some(b), None) => ContentBody::Bytes(
                BASE64.decode(b.as_bytes()).map_err(D::Error::custom)?,
            ),
            (None, None, Some(uri)) => ContentBody::External(uri),
            _ => {
                return Err(D::Error::custom(
                    "content needs exactly one of inlineJson, inlineBytes, externalUri",
                ))
            }
        };
        Ok(Content { media_type: wire.media_type, body })
    }
}

// ============================================================================
// Node
// ============================================================================

/// A typed, identified entity.
///
/// `version`, `created_at` and `updated_at` are assigned by the store; values
/// supplied on input are overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub type_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub state: NodeState,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

impl Node {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>, state: NodeState) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            title: None,
            description: None,
            state,
            locale: None,
            content: None,
            meta: Meta::new(),
            created_at: epoch(),
            updated_at: epoch(),
            version: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key, value);
        self
    }

    /// Namespace part of `type_id`: everything before the last `.` or `/`.
    pub fn namespace(&self) -> Option<&str> {
        self.type_id.rfind(['.', '/']).map(|i| &self.type_id[..i])
    }

    /// Case-insensitive substring match over title and description.
    /// `needle` must already be lowercase.
    pub fn matches_text(&self, needle: &str) -> bool {
        let hit = |field: &Option<String>| {
            field.as_deref().is_some_and(|s| s.to_lowercase().contains(needle))
        };
        hit(&self.title) || hit(&self.description)
    }

    /// Equality ignoring store-assigned bookkeeping.
    pub fn same_payload(&self, other: &Node) -> bool {
        self.id == other.id
            && self.type_id == other.type_id
            && self.title == other.title
            && self.description == other.description
            && self.state == other.state
            && self.locale == other.locale
            && self.content == other.content
            && self.meta == other.meta
    }
}
