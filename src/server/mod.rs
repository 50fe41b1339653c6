//! HTTP surface (feature `http`).
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/health` | `{success, nodes, edges}` |
//! | GET | `/nodes?typeId&state&q&locale&skip&take` | `{success, nodes, totalCount}` |
//! | GET | `/nodes/{id}` | `{success, node}` |
//! | PUT | `/nodes/{id}?unfreeze&draft` | `{success, node}` |
//! | DELETE | `/nodes/{id}` | `{success}` |
//! | POST | `/nodes/{id}/freeze`, `/nodes/{id}/unfreeze` | `{success, node}` |
//! | GET | `/edges?fromId&toId&role&relationshipType&nodeId&sort&resolve&skip&take` | `{success, edges, totalCount}` |
//! | POST | `/edges` | `{success, edge}` |
//! | DELETE | `/edges?fromId&toId&role` | `{success}` |
//! | GET / POST | `/atoms` | `{success, nodes, edges}` / `{success, report}` |
//!
//! Failures use `{success: false, error}`. Capabilities come from the
//! `x-codex-capabilities` header (comma-separated).

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::{
    Atoms, Caller, Edge, EdgeFilter, EdgeSort, Error, ErrorKind, Graph, Node, NodeFilter, NodeState,
    Pagination, Persistence, UpsertOptions,
};

pub const CAPABILITIES_HEADER: &str = "x-codex-capabilities";

type Shared<P> = State<Arc<Graph<P>>>;
type Params = Query<HashMap<String, String>>;
type ApiResult = std::result::Result<Json<Value>, ApiError>;

/// Build the router over a shared graph.
pub fn router<P: Persistence>(graph: Arc<Graph<P>>) -> Router {
    Router::new()
        .route("/health", get(health::<P>))
        .route("/nodes", get(list_nodes::<P>))
        .route("/nodes/:id", get(get_node::<P>).put(put_node::<P>).delete(delete_node::<P>))
        .route("/nodes/:id/freeze", post(freeze_node::<P>))
        .route("/nodes/:id/unfreeze", post(unfreeze_node::<P>))
        .route("/edges", get(list_edges::<P>).post(post_edge::<P>).delete(delete_edge::<P>))
        .route("/atoms", get(get_atoms::<P>).post(post_atoms::<P>))
        .with_state(graph)
}

// ============================================================================
// Errors
// ============================================================================

/// [`Error`] rendered as the failure envelope.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal => {
                error!(error = %self.0, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "success": false, "error": self.0.public_message() }))).into_response()
    }
}

// ============================================================================
// Parameter parsing
// ============================================================================

/// Query value, with empty strings treated as absent.
fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn owned(params: &HashMap<String, String>, key: &str) -> Option<String> {
    param(params, key).map(str::to_string)
}

fn int_param(params: &HashMap<String, String>, key: &str) -> crate::Result<Option<i64>> {
    param(params, key)
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| Error::InvalidArgument(format!("{key} must be an integer, got '{v}'")))
        })
        .transpose()
}

fn bool_param(params: &HashMap<String, String>, key: &str) -> crate::Result<bool> {
    match param(params, key) {
        None => Ok(false),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::InvalidArgument(format!("{key} must be a boolean, got '{v}'"))),
        },
    }
}

fn pagination<P: Persistence>(graph: &Graph<P>, params: &HashMap<String, String>) -> crate::Result<Pagination> {
    graph.pagination(int_param(params, "skip")?, int_param(params, "take")?)
}

fn caller(headers: &HeaderMap) -> Caller {
    headers
        .get(CAPABILITIES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Caller::from_header)
        .unwrap_or_default()
}

fn edge_filter(params: &HashMap<String, String>) -> crate::Result<EdgeFilter> {
    let sort = match param(params, "sort") {
        None => EdgeSort::Insertion,
        Some("weight") | Some("weightDesc") => EdgeSort::WeightDesc,
        Some("insertion") => EdgeSort::Insertion,
        Some(other) => return Err(Error::InvalidArgument(format!("unknown sort '{other}'"))),
    };
    Ok(EdgeFilter {
        from_id: owned(params, "fromId"),
        to_id: owned(params, "toId"),
        role: owned(params, "role"),
        relationship_type: owned(params, "relationshipType"),
        node_id: owned(params, "nodeId"),
        sort,
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn health<P: Persistence>(State(graph): Shared<P>) -> Json<Value> {
    Json(json!({ "success": true, "nodes": graph.nodes().len(), "edges": graph.edges().len() }))
}

async fn list_nodes<P: Persistence>(State(graph): Shared<P>, Query(params): Params) -> ApiResult {
    let filter = NodeFilter {
        type_id: owned(&params, "typeId"),
        state: param(&params, "state").map(str::parse::<NodeState>).transpose()?,
        text: owned(&params, "q"),
        locale: owned(&params, "locale"),
    };
    let page = graph.search_nodes(&filter, pagination(&graph, &params)?)?;
    Ok(Json(json!({ "success": true, "nodes": page.items, "totalCount": page.total_count })))
}

async fn get_node<P: Persistence>(State(graph): Shared<P>, Path(id): Path<String>) -> ApiResult {
    let node = graph.get_node(&id)?;
    Ok(Json(json!({ "success": true, "node": node })))
}

async fn put_node<P: Persistence>(
    State(graph): Shared<P>,
    Path(id): Path<String>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let mut raw: Value = serde_json::from_slice(&body).map_err(Error::from)?;
    if let Some(obj) = raw.as_object_mut() {
        obj.entry("id").or_insert_with(|| Value::String(id.clone()));
    }
    let node: Node = serde_json::from_value(raw).map_err(Error::from)?;
    if node.id != id {
        return Err(Error::InvalidArgument(format!("body id '{}' does not match path id '{id}'", node.id)).into());
    }
    let opts = UpsertOptions {
        unfreeze: bool_param(&params, "unfreeze")?,
        draft: bool_param(&params, "draft")?,
        expected_version: int_param(&params, "expectedVersion")?.map(|v| v.max(0) as u64),
    };
    let node = graph.upsert_node(node, opts, &caller(&headers))?;
    debug!(node = %node.id, version = node.version, "node upserted over http");
    Ok(Json(json!({ "success": true, "node": node })))
}

async fn delete_node<P: Persistence>(State(graph): Shared<P>, Path(id): Path<String>) -> ApiResult {
    graph.remove_node(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn freeze_node<P: Persistence>(State(graph): Shared<P>, Path(id): Path<String>) -> ApiResult {
    let node = graph.freeze(&id).await?;
    Ok(Json(json!({ "success": true, "node": node })))
}

async fn unfreeze_node<P: Persistence>(
    State(graph): Shared<P>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let node = graph.unfreeze(&id, &caller(&headers))?;
    Ok(Json(json!({ "success": true, "node": node })))
}

async fn list_edges<P: Persistence>(State(graph): Shared<P>, Query(params): Params) -> ApiResult {
    let filter = edge_filter(&params)?;
    let page = pagination(&graph, &params)?;
    if bool_param(&params, "resolve")? {
        let page = graph.search_edges_resolved(&filter, page)?;
        return Ok(Json(json!({ "success": true, "edges": page.items, "totalCount": page.total_count })));
    }
    let page = graph.search_edges(&filter, page)?;
    Ok(Json(json!({ "success": true, "edges": page.items, "totalCount": page.total_count })))
}

async fn post_edge<P: Persistence>(State(graph): Shared<P>, body: Bytes) -> ApiResult {
    let edge: Edge = serde_json::from_slice(&body).map_err(Error::from)?;
    let edge = graph.add_edge(edge)?;
    Ok(Json(json!({ "success": true, "edge": edge })))
}

async fn delete_edge<P: Persistence>(State(graph): Shared<P>, Query(params): Params) -> ApiResult {
    let required = |key: &str| {
        param(&params, key).ok_or_else(|| Error::InvalidArgument(format!("{key} is required")))
    };
    graph.remove_edge(required("fromId")?, required("toId")?, required("role")?)?;
    Ok(Json(json!({ "success": true })))
}

async fn get_atoms<P: Persistence>(State(graph): Shared<P>) -> ApiResult {
    let Atoms { nodes, edges } = graph.export_atoms();
    Ok(Json(json!({ "success": true, "nodes": nodes, "edges": edges })))
}

async fn post_atoms<P: Persistence>(State(graph): Shared<P>, body: Bytes) -> ApiResult {
    let atoms: Atoms = serde_json::from_slice(&body).map_err(Error::from)?;
    let report = graph.import_atoms(atoms);
    Ok(Json(json!({ "success": true, "report": report })))
}
