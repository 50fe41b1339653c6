//! # Knowledge Graph Model
//!
//! Plain DTOs shared by the store, the indexes, the query engine and the
//! HTTP surface.
//!
//! Design rule: this module is pure data. No I/O, no locks, no async.

pub mod node;
pub mod edge;
pub mod value;
pub mod meta;

pub use node::{Node, NodeState, Content, ContentBody};
pub use edge::{Edge, EdgeKey};
pub use value::{MetaValue, ValueKind};
pub use meta::{Meta, RELATIONSHIP_TYPE_KEY};
