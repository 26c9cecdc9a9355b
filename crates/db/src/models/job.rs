//! Load-test job entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use stampede_core::status::{JobStatus, StatusId};
use stampede_core::types::{DbId, Timestamp};

/// A row from the `load_test_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LoadTestJob {
    pub id: DbId,
    pub owner_id: DbId,
    pub target_url: String,
    pub method: String,
    /// Capacity units reserved on the assigned node while running.
    pub concurrency: i32,
    pub duration_secs: i32,
    pub ramp_up_secs: i32,
    pub script_source: String,
    pub assigned_node_id: Option<DbId>,
    pub status_id: StatusId,
    pub assign_attempts: i32,
    /// Set once the node reservation has been given back.
    pub capacity_released: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub archived_at: Option<Timestamp>,
}

impl LoadTestJob {
    /// Decoded status; unknown ids are treated as failed so they are never
    /// scheduled.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_id(self.status_id).unwrap_or(JobStatus::Failed)
    }

    /// Whether this job's concurrency is currently reserved on a node.
    pub fn holds_capacity(&self) -> bool {
        self.assigned_node_id.is_some() && !self.capacity_released
    }
}

/// Fields written together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl JobOutcome {
    /// Outcome of a failed job.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            result: None,
        }
    }

    /// Attach a result payload (script output, metrics).
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status label (e.g. `RUNNING`).
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 50;

impl JobListQuery {
    /// Effective `(limit, offset)` after defaults and clamping.
    pub fn page(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}
