//! Per-execution limits and the read-only target description.

use serde::Serialize;
use stampede_core::types::DbId;

/// The job's target as exposed to scripts through the `target` global.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub url: String,
    pub method: String,
    pub concurrency: i32,
    pub duration_secs: i32,
}

/// Limits for one execution attempt.
///
/// Built fresh by the scheduler for every run and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ScriptExecutionContext {
    pub job_id: DbId,
    pub owner_id: DbId,
    /// Hard wall-clock bound for the whole execution.
    pub max_execution_time_ms: u64,
    /// Outbound calls allowed before `RateLimitExceededError`.
    pub max_requests_per_execution: u32,
    /// Host names (or `*.domain` wildcards) the script may reach.
    pub allowed_domains: Vec<String>,
    pub target: TargetInfo,
}
