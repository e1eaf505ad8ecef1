use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;

use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use common::error::ApiError;
use common::schemas::{BlockNodeRequest, LocalUrlRequest, MessageResponse, RegisterNodeRequest};

use crate::core::node::Node;
use crate::core::placement::{PlacementDecision, PlacementStatus};
use crate::core::state::MetaState;

pub fn router(state: MetaState) -> Router {
    Router::new()
        .route("/metadata/register-node", post(register_node))
        .route("/metadata/get-registered-nodes", get(get_registered_nodes))
        .route("/metadata/get-dead-nodes", get(get_dead_nodes))
        .route("/metadata/clear-registered-nodes", post(clear_registered_nodes))
        .route("/metadata/get-localurl-for-node", post(get_local_url_for_node))
        .route("/metadata/next-node", get(next_node))
        .route("/metadata/pingsvr", get(ping))
        .route("/metadata/events", get(events))
        .route(
            "/metadata/block/register-block-location",
            post(register_block_location),
        )
        .route("/metadata/block/nodes-for-block", post(nodes_for_block))
        .route("/metadata/block/block-nodes/{hash}", get(block_nodes))
        .route(
            "/metadata/block/unregister-block/{hash}",
            delete(unregister_block),
        )
        .route(
            "/metadata/block/unregister-block-from-node",
            delete(unregister_block_from_node),
        )
        .route(
            "/metadata/block/clear-all-block-nodes-mapping",
            delete(clear_all_block_nodes),
        )
        .with_state(state)
}

// POST /metadata/register-node
/// First registration and every subsequent heartbeat land here.
#[tracing::instrument(name = "metanode.register_node", skip(ctx, req), fields(node_id = %req.id))]
pub async fn register_node(
    State(ctx): State<MetaState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let node = Node::new(req.id, req.local_url, req.block_count);
    let outcome = ctx.registry.register(node)?;
    Ok(Json(MessageResponse::new(outcome.to_string())))
}

#[tracing::instrument(name = "metanode.get_registered_nodes", skip(ctx))]
pub async fn get_registered_nodes(
    State(ctx): State<MetaState>,
) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(ctx.registry.live_nodes()?))
}

#[tracing::instrument(name = "metanode.get_dead_nodes", skip(ctx))]
pub async fn get_dead_nodes(
    State(ctx): State<MetaState>,
) -> Result<Json<BTreeMap<String, Node>>, ApiError> {
    Ok(Json(ctx.registry.dead_nodes()?))
}

#[tracing::instrument(name = "metanode.clear_registered_nodes", skip(ctx))]
pub async fn clear_registered_nodes(
    State(ctx): State<MetaState>,
) -> Result<Json<MessageResponse>, ApiError> {
    ctx.registry.clear_all()?;
    info!("cleared node registry");
    Ok(Json(MessageResponse::new("All registered nodes cleared")))
}

#[tracing::instrument(name = "metanode.get_local_url", skip(ctx, req), fields(node_id = %req.id))]
pub async fn get_local_url_for_node(
    State(ctx): State<MetaState>,
    Json(req): Json<LocalUrlRequest>,
) -> Result<String, ApiError> {
    ctx.registry
        .local_url_for(&req.id)?
        .ok_or(ApiError::UnknownNode)
}

#[tracing::instrument(name = "metanode.next_node", skip(ctx))]
pub async fn next_node(State(ctx): State<MetaState>) -> Result<Json<Node>, ApiError> {
    ctx.registry
        .next_node_round_robin()?
        .map(Json)
        .ok_or(ApiError::NoNodesAvailable)
}

pub async fn ping() -> &'static str {
    "pong"
}

/// Registry snapshots as server-sent events, one event per publish.
pub async fn events(
    State(ctx): State<MetaState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(ctx.notifier.subscribe()).filter_map(|msg| match msg {
        Ok(n) => Some(Ok(Event::default().event(n.topic).data(n.payload))),
        Err(e) => {
            warn!("event subscriber lagging: {}", e);
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn required(value: Option<String>, what: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(format!("{} is required", what))),
    }
}

#[tracing::instrument(name = "metanode.block.register_location", skip(ctx))]
pub async fn register_block_location(
    State(ctx): State<MetaState>,
    Json(req): Json<BlockNodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let hash = required(req.hash, "hash")?;
    let node = required(req.node_url, "node_url")?;
    ctx.directory.register_holder(&hash, &node)?;
    Ok(Json(MessageResponse::new(format!(
        "Block {} registered on {}",
        hash, node
    ))))
}

/// Always answers with a decision body; the status code mirrors the
/// decision so plain HTTP clients can branch on it.
#[tracing::instrument(name = "metanode.block.nodes_for_block", skip(ctx))]
pub async fn nodes_for_block(
    State(ctx): State<MetaState>,
    Json(req): Json<BlockNodeRequest>,
) -> Result<(StatusCode, Json<PlacementDecision>), ApiError> {
    let hash = req.hash.unwrap_or_default();
    let decision = ctx
        .directory
        .request_placement(hash.trim(), req.node_url.as_deref())?;

    let status = match decision.status {
        PlacementStatus::Success | PlacementStatus::AlreadyEnoughCopies => StatusCode::OK,
        PlacementStatus::NoNodesAvailable => StatusCode::SERVICE_UNAVAILABLE,
        PlacementStatus::InvalidInput => StatusCode::BAD_REQUEST,
    };
    Ok((status, Json(decision)))
}

// GET /metadata/block/block-nodes/{hash}
/// Unknown hashes answer with an empty list.
#[tracing::instrument(name = "metanode.block.block_nodes", skip(ctx))]
pub async fn block_nodes(
    Path(hash): Path<String>,
    State(ctx): State<MetaState>,
) -> Result<Json<BTreeSet<String>>, ApiError> {
    Ok(Json(ctx.directory.get_holders(&hash)?.unwrap_or_default()))
}

#[tracing::instrument(name = "metanode.block.unregister", skip(ctx))]
pub async fn unregister_block(
    Path(hash): Path<String>,
    State(ctx): State<MetaState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = if ctx.directory.unregister_all(&hash)? {
        format!("Block {} unregistered", hash)
    } else {
        format!("Block {} not found", hash)
    };
    Ok(Json(MessageResponse::new(message)))
}

#[tracing::instrument(name = "metanode.block.unregister_from_node", skip(ctx))]
pub async fn unregister_block_from_node(
    State(ctx): State<MetaState>,
    Json(req): Json<BlockNodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let hash = required(req.hash, "hash")?;
    let node = required(req.node_url, "node_url")?;
    let outcome = ctx.directory.unregister_holder(&hash, &node)?;
    Ok(Json(MessageResponse::new(outcome.to_string())))
}

#[tracing::instrument(name = "metanode.block.clear_all", skip(ctx))]
pub async fn clear_all_block_nodes(
    State(ctx): State<MetaState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let removed = ctx.directory.clear_all()?;
    Ok(Json(MessageResponse::new(format!(
        "Cleared {} block mappings",
        removed
    ))))
}
