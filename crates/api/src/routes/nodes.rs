use axum::routing::{get, put};
use axum::Router;

use crate::handlers::nodes;
use crate::state::AppState;

/// Node routes, mounted at `/nodes`.
///
/// ```text
/// GET    /                -> list_nodes
/// POST   /                -> create_node (admin)
/// PUT    /{id}/status     -> update_node_status (admin)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(nodes::list_nodes).post(nodes::create_node))
        .route("/{id}/status", put(nodes::update_node_status))
}
