use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use stampede_sandbox::validate;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;

#[derive(Debug, Deserialize)]
pub struct ValidateScriptRequest {
    pub script_source: String,
}

/// POST /api/v1/scripts/validate
///
/// Static checks only; nothing is executed. An invalid script is a normal
/// 200 response with `is_valid: false`.
pub async fn validate_script(
    _auth: AuthUser,
    Json(input): Json<ValidateScriptRequest>,
) -> AppResult<impl IntoResponse> {
    let report = validate(&input.script_source);
    Ok(Json(DataResponse { data: report }))
}
