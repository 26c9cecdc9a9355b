//! Scheduler and sandbox tuning.
//!
//! Values are read from the environment by the API crate's `ServerConfig`;
//! the defaults here are the documented production defaults.

use std::time::Duration;

use stampede_sandbox::{HttpMode, SandboxLimits};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Placement attempts before a PENDING job is failed with
    /// `NoCapacityError`.
    pub max_assign_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Largest `concurrency` a single job may request.
    pub max_job_concurrency: i32,
    /// Non-terminal jobs a user may hold at once.
    pub max_active_jobs_per_user: i64,
    pub sandbox: SandboxSettings,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_assign_attempts: 8,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_millis(30_000),
            max_job_concurrency: 10_000,
            max_active_jobs_per_user: 5,
            sandbox: SandboxSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Upper bound on any execution; a job's own duration may lower it.
    pub max_execution_time_ms: u64,
    pub max_requests_per_execution: u32,
    /// Hosts every job may reach in addition to its target host.
    pub extra_allowed_domains: Vec<String>,
    pub http_mode: HttpMode,
    pub limits: SandboxLimits,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 300_000,
            max_requests_per_execution: 1_000,
            extra_allowed_domains: Vec::new(),
            http_mode: HttpMode::Live,
            limits: SandboxLimits::default(),
        }
    }
}
