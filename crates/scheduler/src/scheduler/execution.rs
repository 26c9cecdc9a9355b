//! Supervision of one script execution per running job.

use std::sync::Arc;

use serde_json::json;
use stampede_core::job_spec::target_host;
use stampede_core::status::JobStatus;
use stampede_core::types::DbId;
use stampede_db::models::{JobOutcome, LoadTestJob};
use stampede_db::ReleaseOutcome;
use stampede_events::{BusEvent, EventBus};
use stampede_sandbox::events::{self, EventReceiver, EventSender};
use stampede_sandbox::{
    ExecutionControl, SandboxError, ScriptEngine, ScriptErrorKind, ScriptExecutionContext, ScriptResult,
    TargetInfo,
};

use super::Scheduler;

impl Scheduler {
    /// Limits for one run of `job`.
    ///
    /// The time budget is the job's duration, capped by the sandbox
    /// maximum. Scripts may reach the target's host plus the configured
    /// extra domains.
    pub(super) fn execution_context(&self, job: &LoadTestJob) -> ScriptExecutionContext {
        let sandbox = &self.config.sandbox;
        let duration_ms = u64::try_from(job.duration_secs).unwrap_or(0) * 1000;

        let mut allowed_domains: Vec<String> = target_host(&job.target_url).into_iter().collect();
        for domain in &sandbox.extra_allowed_domains {
            let domain = domain.trim().to_ascii_lowercase();
            if !domain.is_empty() && !allowed_domains.contains(&domain) {
                allowed_domains.push(domain);
            }
        }

        ScriptExecutionContext {
            job_id: job.id,
            owner_id: job.owner_id,
            max_execution_time_ms: duration_ms.min(sandbox.max_execution_time_ms),
            max_requests_per_execution: sandbox.max_requests_per_execution,
            allowed_domains,
            target: TargetInfo {
                url: job.target_url.clone(),
                method: job.method.clone(),
                concurrency: job.concurrency,
                duration_secs: job.duration_secs,
            },
        }
    }

    /// Spawn the supervisor for a freshly assigned job.
    pub(super) fn start_execution(self: &Arc<Self>, job: LoadTestJob) {
        let control = ExecutionControl::new();
        self.executions().insert(job.id, control.clone());

        let (tx, rx) = events::channel();
        self.tasks.spawn(relay(Arc::clone(&self.bus), job.id, rx));

        let this = Arc::clone(self);
        self.tasks.spawn(async move { this.supervise(job, control, tx).await });
    }

    async fn supervise(self: Arc<Self>, job: LoadTestJob, control: ExecutionControl, events: EventSender) {
        let job_id = job.id;

        // The job may have been paused or cancelled between assignment and
        // this task starting.
        match self.store.find_job(job_id).await {
            Ok(Some(current)) if current.status() == JobStatus::Running => {}
            Ok(Some(current)) if current.status() == JobStatus::Paused => control.pause(),
            Ok(_) => {
                tracing::debug!(job_id, "Job left RUNNING before its execution started");
                self.forget(job_id);
                return;
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Could not re-read job before execution");
            }
        }

        let engine = ScriptEngine::new(Arc::clone(&self.http), self.config.sandbox.limits);
        let context = self.execution_context(&job);
        tracing::info!(
            job_id,
            budget_ms = context.max_execution_time_ms,
            allowed_domains = ?context.allowed_domains,
            "Execution starting",
        );

        let outcome = engine
            .execute(&job.script_source, context, control, events)
            .await;
        self.finish(job_id, outcome).await;
    }

    /// Record the execution outcome and always give the reservation back.
    async fn finish(&self, job_id: DbId, outcome: Result<ScriptResult, SandboxError>) {
        self.forget(job_id);

        let (status, record) = match outcome {
            Ok(result) if result.success => (
                JobStatus::Completed,
                JobOutcome::default().with_result(json!({
                    "value": result.value,
                    "metrics": result.metrics,
                })),
            ),
            Ok(result) => {
                let (code, message) = match &result.error {
                    Some(error)
                        if self.shutdown.is_cancelled()
                            && error.kind == ScriptErrorKind::Cancelled =>
                    {
                        (
                            "InterruptedError".to_string(),
                            "execution was interrupted by shutdown".to_string(),
                        )
                    }
                    Some(error) => (error.kind.name().to_string(), error.message.clone()),
                    None => ("ScriptError".to_string(), "execution failed".to_string()),
                };
                (
                    JobStatus::Failed,
                    JobOutcome::failure(code, message)
                        .with_result(json!({ "metrics": result.metrics })),
                )
            }
            Err(e) => (
                JobStatus::Failed,
                JobOutcome::failure(e.kind_name(), e.to_string()),
            ),
        };

        match self.store.transition_job(job_id, status, record).await {
            Ok(Some(job)) => {
                tracing::info!(
                    job_id,
                    status = %job.status(),
                    error_code = job.error_code.as_deref().unwrap_or(""),
                    "Execution finished",
                );
                self.publish_job(&job);
            }
            Ok(None) => {
                tracing::debug!(job_id, "Job already finished; execution outcome discarded");
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to record execution outcome");
            }
        }

        match self.store.release_job(job_id).await {
            Ok(ReleaseOutcome::Released { node }) => self.publish_node(&node),
            Ok(ReleaseOutcome::AlreadyReleased | ReleaseOutcome::NotAssigned) => {}
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to release capacity after execution");
            }
        }
    }
}

/// Forward script events to the job's channel until the engine drops its
/// sender.
async fn relay(bus: Arc<EventBus>, job_id: DbId, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        bus.publish(BusEvent::job_update(
            job_id,
            json!({ "job_id": job_id, "event": event }),
        ));
    }
}
