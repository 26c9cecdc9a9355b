//! The capacity-aware scheduler.
//!
//! Owns the job lifecycle on top of the [`Store`]'s atomic operations:
//! submission (validation + quota), placement with bounded retries, one
//! supervised script execution per running job, pause/resume/cancel,
//! capacity release, archive and crash recovery. Every state change is
//! published on the [`EventBus`].

mod execution;
mod retry;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;
use stampede_core::job_spec::JobSpec;
use stampede_core::status::{JobStatus, NodeStatus};
use stampede_core::types::DbId;
use stampede_db::models::{CreateNode, JobListQuery, JobOutcome, LoadTestJob, TestNode};
use stampede_db::{AssignOutcome, ReleaseOutcome, Store};
use stampede_events::{channels, BusEvent, EventBus};
use stampede_sandbox::{validate, ExecutionControl, OutboundHttp};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::quota::QuotaService;
use crate::view::{JobView, NodeView, PlatformSnapshot};

/// Longest accepted node name.
const MAX_NODE_NAME_LEN: usize = 100;

/// What [`Scheduler::recover`] did at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// RUNNING/PAUSED jobs failed with `InterruptedError`.
    pub failed: usize,
    /// Reservations given back by jobs that were already terminal.
    pub released: usize,
    /// PENDING jobs handed back to placement.
    pub requeued: usize,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    quota: Arc<dyn QuotaService>,
    bus: Arc<EventBus>,
    http: Arc<dyn OutboundHttp>,
    config: SchedulerConfig,
    /// Control handles of executions running in this process.
    executions: Mutex<HashMap<DbId, ExecutionControl>>,
    /// Jobs with a placement retry waiting on its backoff.
    retries: Mutex<HashSet<DbId>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        quota: Arc<dyn QuotaService>,
        bus: Arc<EventBus>,
        http: Arc<dyn OutboundHttp>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            quota,
            bus,
            http,
            config,
            executions: Mutex::new(HashMap::new()),
            retries: Mutex::new(HashSet::new()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Submission and placement
    // -----------------------------------------------------------------------

    /// Validate, check quota, create the job PENDING and try to place it.
    ///
    /// A job that finds no capacity is returned PENDING and queued for
    /// retry; rejections create nothing.
    pub async fn submit(
        self: &Arc<Self>,
        owner_id: DbId,
        spec: JobSpec,
    ) -> Result<JobView, SchedulerError> {
        let spec = spec.normalized(self.config.max_job_concurrency)?;

        let report = validate(&spec.script_source);
        if !report.is_valid {
            return Err(SchedulerError::ScriptRejected(report));
        }

        if !self.quota.check_quota(owner_id).await? {
            tracing::info!(owner_id, "Submission refused by quota");
            return Err(SchedulerError::QuotaExceeded {
                owner_id,
                limit: self.quota.limit(),
            });
        }

        let job = self.store.create_job(owner_id, &spec).await?;
        tracing::info!(
            job_id = job.id,
            owner_id,
            concurrency = job.concurrency,
            "Job submitted",
        );
        self.publish_job(&job);

        match self.assign(job.id).await {
            Ok(view) => Ok(view),
            Err(SchedulerError::NoCapacity(_)) => self.status(job.id).await,
            Err(e) => Err(e),
        }
    }

    /// Place a PENDING job on the least-loaded ACTIVE node with room and
    /// start its execution.
    ///
    /// On `NoCapacity` the attempt is counted and a retry is scheduled with
    /// exponential backoff, or the job is failed once attempts run out.
    pub async fn assign(self: &Arc<Self>, job_id: DbId) -> Result<JobView, SchedulerError> {
        match self.store.assign_job(job_id).await? {
            AssignOutcome::Assigned { job, node } => {
                tracing::info!(
                    job_id,
                    node_id = node.id,
                    node_load = node.current_load,
                    "Job assigned",
                );
                self.publish_node(&node);
                self.publish_job(&job);
                self.start_execution(job.clone());
                Ok(job.into())
            }
            AssignOutcome::NoCapacity => {
                self.handle_no_capacity(job_id).await?;
                Err(SchedulerError::NoCapacity(job_id))
            }
            AssignOutcome::NotPending(None) => Err(SchedulerError::job_not_found(job_id)),
            AssignOutcome::NotPending(Some(from)) => Err(SchedulerError::InvalidTransition {
                job_id,
                from,
                action: "be assigned",
            }),
        }
    }

    async fn handle_no_capacity(self: &Arc<Self>, job_id: DbId) -> Result<(), SchedulerError> {
        let attempts = self.store.record_assign_attempt(job_id).await?;
        let attempts = u32::try_from(attempts).unwrap_or(0);

        if attempts >= self.config.max_assign_attempts {
            let outcome = JobOutcome::failure(
                "NoCapacityError",
                format!("no node had capacity after {attempts} attempts"),
            );
            if let Some(job) = self
                .store
                .transition_job(job_id, JobStatus::Failed, outcome)
                .await?
            {
                tracing::warn!(job_id, attempts, "Placement retries exhausted");
                self.publish_job(&job);
            }
            return Ok(());
        }

        tracing::debug!(job_id, attempts, "No capacity; retry scheduled");
        self.schedule_retry(job_id, attempts);
        Ok(())
    }

    /// Give a job's reservation back to its node.
    pub async fn release(&self, job_id: DbId) -> Result<NodeView, SchedulerError> {
        match self.store.release_job(job_id).await? {
            ReleaseOutcome::Released { node } => {
                tracing::info!(job_id, node_id = node.id, node_load = node.current_load, "Capacity released");
                self.publish_node(&node);
                Ok(node.into())
            }
            ReleaseOutcome::AlreadyReleased => Err(SchedulerError::AlreadyReleased(job_id)),
            ReleaseOutcome::NotAssigned => {
                self.find_job(job_id).await?;
                Err(SchedulerError::NotAssigned(job_id))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle control
    // -----------------------------------------------------------------------

    /// RUNNING -> PAUSED. The node reservation is kept.
    pub async fn pause(&self, job_id: DbId) -> Result<JobView, SchedulerError> {
        let job = self
            .change_status(job_id, JobStatus::Running, JobStatus::Paused, "pause")
            .await?;
        if let Some(control) = self.control(job_id) {
            control.pause();
        }
        tracing::info!(job_id, "Job paused");
        self.publish_job(&job);
        Ok(job.into())
    }

    /// PAUSED -> RUNNING.
    pub async fn resume(&self, job_id: DbId) -> Result<JobView, SchedulerError> {
        let job = self
            .change_status(job_id, JobStatus::Paused, JobStatus::Running, "resume")
            .await?;
        if let Some(control) = self.control(job_id) {
            control.resume();
        }
        tracing::info!(job_id, "Job resumed");
        self.publish_job(&job);
        Ok(job.into())
    }

    /// Any non-terminal state -> CANCELLED, releasing capacity at once.
    ///
    /// The execution, if any, is told to stop and winds down on its own.
    pub async fn cancel(&self, job_id: DbId) -> Result<JobView, SchedulerError> {
        let job = self.find_job(job_id).await?;
        if job.status().is_terminal() {
            return Err(SchedulerError::AlreadyCancelled(job_id));
        }

        let Some(job) = self
            .store
            .transition_job(job_id, JobStatus::Cancelled, JobOutcome::default())
            .await?
        else {
            return Err(SchedulerError::AlreadyCancelled(job_id));
        };

        if let Some(control) = self.forget(job_id) {
            control.stop();
        }
        match self.store.release_job(job_id).await? {
            ReleaseOutcome::Released { node } => self.publish_node(&node),
            ReleaseOutcome::AlreadyReleased | ReleaseOutcome::NotAssigned => {}
        }

        tracing::info!(job_id, from = %job.status(), "Job cancelled");
        let job = self.find_job(job_id).await?;
        self.publish_job(&job);
        Ok(job.into())
    }

    /// Soft-delete a terminal job.
    pub async fn archive(&self, job_id: DbId) -> Result<(), SchedulerError> {
        let job = self.find_job(job_id).await?;
        if !job.status().is_terminal() {
            return Err(SchedulerError::InvalidTransition {
                job_id,
                from: job.status(),
                action: "be archived",
            });
        }
        if !self.store.archive_job(job_id).await? {
            return Err(SchedulerError::job_not_found(job_id));
        }
        tracing::info!(job_id, "Job archived");
        Ok(())
    }

    async fn change_status(
        &self,
        job_id: DbId,
        from: JobStatus,
        to: JobStatus,
        action: &'static str,
    ) -> Result<LoadTestJob, SchedulerError> {
        let job = self.find_job(job_id).await?;
        if job.status() != from {
            return Err(SchedulerError::InvalidTransition {
                job_id,
                from: job.status(),
                action,
            });
        }
        match self
            .store
            .transition_job(job_id, to, JobOutcome::default())
            .await?
        {
            Some(job) => Ok(job),
            None => {
                let current = self.find_job(job_id).await?;
                Err(SchedulerError::InvalidTransition {
                    job_id,
                    from: current.status(),
                    action,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn status(&self, job_id: DbId) -> Result<JobView, SchedulerError> {
        Ok(self.find_job(job_id).await?.into())
    }

    /// Non-archived jobs, newest first. `owner_id = None` lists everyone's.
    pub async fn list_jobs(
        &self,
        owner_id: Option<DbId>,
        query: &JobListQuery,
    ) -> Result<Vec<JobView>, SchedulerError> {
        let jobs = self.store.list_jobs(owner_id, query).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }

    /// Aggregates, nodes and non-terminal jobs for the broker.
    pub async fn snapshot(&self) -> Result<PlatformSnapshot, SchedulerError> {
        let nodes = self.store.list_nodes().await?;
        let active = self
            .store
            .list_jobs_by_status(&JobStatus::NON_TERMINAL)
            .await?;
        Ok(PlatformSnapshot::build(nodes, active, self.executing()))
    }

    /// Number of script executions in flight in this process.
    pub fn executing(&self) -> usize {
        self.executions().len()
    }

    /// Number of jobs waiting on a placement retry.
    pub fn retries_pending(&self) -> usize {
        self.retries().len()
    }

    /// Store round trip, for health checks.
    pub async fn ping(&self) -> Result<(), SchedulerError> {
        Ok(self.store.ping().await?)
    }

    async fn find_job(&self, job_id: DbId) -> Result<LoadTestJob, SchedulerError> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::job_not_found(job_id))
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    pub async fn list_nodes(&self) -> Result<Vec<NodeView>, SchedulerError> {
        let nodes = self.store.list_nodes().await?;
        Ok(nodes.into_iter().map(NodeView::from).collect())
    }

    /// Register a node. New nodes start with no load.
    pub async fn create_node(&self, input: CreateNode) -> Result<NodeView, SchedulerError> {
        let name = input.name.trim();
        if name.is_empty() || name.len() > MAX_NODE_NAME_LEN {
            return Err(SchedulerError::Validation(format!(
                "name must be 1 to {MAX_NODE_NAME_LEN} characters"
            )));
        }
        if input.region.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "region must not be empty".to_string(),
            ));
        }
        if input.max_concurrent < 1 {
            return Err(SchedulerError::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        let input = CreateNode {
            name: name.to_string(),
            region: input.region.trim().to_string(),
            ..input
        };
        let node = self.store.create_node(&input).await?;
        tracing::info!(node_id = node.id, name = %node.name, max_concurrent = node.max_concurrent, "Node registered");
        self.publish_node(&node);
        Ok(node.into())
    }

    /// Change a node's availability. Its load is left alone; jobs already
    /// placed on it keep running.
    pub async fn set_node_status(
        &self,
        node_id: DbId,
        status: NodeStatus,
    ) -> Result<NodeView, SchedulerError> {
        let node = self
            .store
            .set_node_status(node_id, status)
            .await?
            .ok_or_else(|| SchedulerError::node_not_found(node_id))?;
        tracing::info!(node_id, status = %status, "Node status changed");
        self.publish_node(&node);
        Ok(node.into())
    }

    // -----------------------------------------------------------------------
    // Startup and shutdown
    // -----------------------------------------------------------------------

    /// Repair state left by a previous process. Call once, before serving.
    ///
    /// RUNNING/PAUSED jobs lost their execution and are failed with
    /// `InterruptedError`; reservations still held by terminal jobs are
    /// returned; PENDING jobs are placed again.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, SchedulerError> {
        let mut report = RecoveryReport::default();

        let interrupted = self
            .store
            .list_jobs_by_status(&JobStatus::HOLDING_CAPACITY)
            .await?;
        for job in interrupted {
            let outcome = JobOutcome::failure(
                "InterruptedError",
                "execution was interrupted by a restart",
            );
            if let Some(job) = self
                .store
                .transition_job(job.id, JobStatus::Failed, outcome)
                .await?
            {
                self.publish_job(&job);
                report.failed += 1;
            }
        }

        let finished = self
            .store
            .list_jobs_by_status(&[JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled])
            .await?;
        for job in finished.iter().filter(|j| j.holds_capacity()) {
            if let ReleaseOutcome::Released { node } = self.store.release_job(job.id).await? {
                self.publish_node(&node);
                report.released += 1;
            }
        }

        let pending = self
            .store
            .list_jobs_by_status(&[JobStatus::Pending])
            .await?;
        for job in pending {
            report.requeued += 1;
            match self.assign(job.id).await {
                Ok(_) | Err(SchedulerError::NoCapacity(_)) => {}
                Err(e) => tracing::warn!(job_id = job.id, error = %e, "Re-queue failed"),
            }
        }

        tracing::info!(
            failed = report.failed,
            released = report.released,
            requeued = report.requeued,
            "Scheduler recovery complete",
        );
        Ok(report)
    }

    /// Stop retries and executions, then wait up to `grace` for them to
    /// record their outcome.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        for control in self.executions().values() {
            control.stop();
        }
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Scheduler tasks still running after shutdown grace period",
            );
        } else {
            tracing::info!("Scheduler stopped");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn executions(&self) -> MutexGuard<'_, HashMap<DbId, ExecutionControl>> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn retries(&self) -> MutexGuard<'_, HashSet<DbId>> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn control(&self, job_id: DbId) -> Option<ExecutionControl> {
        self.executions().get(&job_id).cloned()
    }

    fn forget(&self, job_id: DbId) -> Option<ExecutionControl> {
        self.executions().remove(&job_id)
    }

    /// Publish a job's state on `job:{id}` and on `jobs`.
    fn publish_job(&self, job: &LoadTestJob) {
        let view = JobView::from(job.clone());
        let event = BusEvent::job_update(job.id, json!({ "job": view }));
        self.bus.publish(event.clone().on_channel(channels::JOBS));
        self.bus.publish(event);
    }

    fn publish_node(&self, node: &TestNode) {
        let view = NodeView::from(node.clone());
        self.bus.publish(
            BusEvent::new(channels::NODES, channels::MSG_NODE_UPDATE)
                .with_data(json!({ "node": view })),
        );
    }
}
