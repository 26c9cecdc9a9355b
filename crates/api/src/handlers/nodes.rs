//! Handlers for test nodes. Reads are open to any user; changes need admin.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use stampede_core::status::NodeStatus;
use stampede_core::types::DbId;
use stampede_db::models::CreateNode;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `PUT /api/v1/nodes/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateNodeStatus {
    pub status: NodeStatus,
}

/// GET /api/v1/nodes
pub async fn list_nodes(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let nodes = state.scheduler.list_nodes().await?;
    Ok(Json(DataResponse { data: nodes }))
}

/// POST /api/v1/nodes
pub async fn create_node(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(input): Json<CreateNode>,
) -> AppResult<impl IntoResponse> {
    let node = state.scheduler.create_node(input).await?;
    tracing::info!(node_id = node.id, user_id = admin.user_id, "Node created via API");
    Ok((StatusCode::CREATED, Json(DataResponse { data: node })))
}

/// PUT /api/v1/nodes/{id}/status
pub async fn update_node_status(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(node_id): Path<DbId>,
    Json(input): Json<UpdateNodeStatus>,
) -> AppResult<impl IntoResponse> {
    let node = state.scheduler.set_node_status(node_id, input.status).await?;
    tracing::info!(node_id, user_id = admin.user_id, status = %input.status, "Node status updated via API");
    Ok(Json(DataResponse { data: node }))
}
