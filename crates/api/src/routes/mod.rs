pub mod health;
pub mod jobs;
pub mod nodes;
pub mod scripts;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                                   WebSocket (token via ?token= or auth message)
///
/// /jobs                                 submit, list
/// /jobs/{id}                            get, archive (DELETE)
/// /jobs/{id}/pause                      pause (POST)
/// /jobs/{id}/resume                     resume (POST)
/// /jobs/{id}/cancel                     cancel (POST)
///
/// /nodes                                list, register (admin)
/// /nodes/{id}/status                    change availability (PUT, admin)
///
/// /scripts/validate                     static script checks (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/jobs", jobs::router())
        .nest("/nodes", nodes::router())
        .nest("/scripts", scripts::router())
}
