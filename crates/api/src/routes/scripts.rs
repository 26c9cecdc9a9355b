use axum::routing::post;
use axum::Router;

use crate::handlers::scripts;
use crate::state::AppState;

/// Script routes, mounted at `/scripts`.
///
/// ```text
/// POST   /validate        -> validate_script
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/validate", post(scripts::validate_script))
}
