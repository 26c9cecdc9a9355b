//! Handlers for load-test jobs.
//!
//! Every job-scoped endpoint is limited to the job's owner and admins.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use stampede_core::error::CoreError;
use stampede_core::job_spec::JobSpec;
use stampede_core::types::DbId;
use stampede_db::models::JobListQuery;
use stampede_scheduler::JobView;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Load a job and verify the caller may act on it.
async fn find_and_authorize(state: &AppState, auth: &AuthUser, job_id: DbId) -> AppResult<JobView> {
    let job = state.scheduler.status(job_id).await?;
    if !auth.identity().can_access_job(job.owner_id) {
        return Err(AppError::Core(CoreError::Forbidden(
            "You can only access your own jobs".into(),
        )));
    }
    Ok(job)
}

/// POST /api/v1/jobs
///
/// Submit a job. It is placed immediately when a node has room, otherwise
/// it is returned PENDING and retried in the background.
pub async fn submit_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<JobSpec>,
) -> AppResult<impl IntoResponse> {
    let job = state.scheduler.submit(auth.user_id, input).await?;

    tracing::info!(
        job_id = job.id,
        user_id = auth.user_id,
        status = %job.status,
        "Job submitted via API",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/jobs
///
/// The caller's jobs; admins see everyone's.
pub async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let owner = if auth.is_admin() { None } else { Some(auth.user_id) };
    let jobs = state.scheduler.list_jobs(owner, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state, &auth, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/pause
pub async fn pause_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, &auth, job_id).await?;
    let job = state.scheduler.pause(job_id).await?;
    tracing::info!(job_id, user_id = auth.user_id, "Job paused");
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/resume
pub async fn resume_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, &auth, job_id).await?;
    let job = state.scheduler.resume(job_id).await?;
    tracing::info!(job_id, user_id = auth.user_id, "Job resumed");
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancelling a finished job answers 409 `ALREADY_CANCELLED` and changes
/// nothing.
pub async fn cancel_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, &auth, job_id).await?;
    let job = state.scheduler.cancel(job_id).await?;
    tracing::info!(job_id, user_id = auth.user_id, "Job cancelled");
    Ok(Json(DataResponse { data: job }))
}

/// DELETE /api/v1/jobs/{id}
///
/// Archive a finished job. Archived jobs drop out of listings.
pub async fn archive_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<StatusCode> {
    find_and_authorize(&state, &auth, job_id).await?;
    state.scheduler.archive(job_id).await?;
    tracing::info!(job_id, user_id = auth.user_id, "Job archived");
    Ok(StatusCode::NO_CONTENT)
}
