use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use stampede_core::error::CoreError;
use stampede_scheduler::SchedulerError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`SchedulerError`] and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent
/// `{ "error", "code" }` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        INTERNAL_MESSAGE.to_string(),
                    )
                }
            },

            // --- Scheduler errors ---
            AppError::Scheduler(err) => classify_scheduler_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    INTERNAL_MESSAGE.to_string(),
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let AppError::Scheduler(SchedulerError::ScriptRejected(report)) = &self {
            body["details"] = json!(report);
        }

        (status, axum::Json(body)).into_response()
    }
}

/// Map a scheduler error onto an HTTP status, error code and message.
fn classify_scheduler_error(err: &SchedulerError) -> (StatusCode, &'static str, String) {
    let message = err.to_string();
    match err {
        SchedulerError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
        SchedulerError::ScriptRejected(_) => {
            (StatusCode::BAD_REQUEST, "SCRIPT_REJECTED", message)
        }
        SchedulerError::QuotaExceeded { .. } => {
            (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED", message)
        }
        SchedulerError::NoCapacity(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "NO_CAPACITY", message)
        }
        SchedulerError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
        SchedulerError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, "INVALID_TRANSITION", message)
        }
        SchedulerError::AlreadyCancelled(_) => {
            (StatusCode::CONFLICT, "ALREADY_CANCELLED", message)
        }
        SchedulerError::AlreadyReleased(_) => {
            (StatusCode::CONFLICT, "ALREADY_RELEASED", message)
        }
        SchedulerError::NotAssigned(_) => (StatusCode::CONFLICT, "NOT_ASSIGNED", message),
        SchedulerError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        SchedulerError::StoreUnavailable(detail) => {
            tracing::error!(error = %detail, "Store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "The job store is temporarily unavailable".to_string(),
            )
        }
        SchedulerError::Internal(detail) => {
            tracing::error!(error = %detail, "Internal scheduler error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
    }
}
