//! In-process [`Store`] used by tests and by local runs without a database.
//!
//! All state sits behind one `tokio::sync::Mutex`, which makes every
//! operation (and in particular assign/release) a single critical section.
//! [`MemoryStore::set_available`] simulates an outage: while unavailable,
//! every call returns [`StoreError::Unavailable`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use stampede_core::job_spec::JobSpec;
use stampede_core::placement::select_node;
use stampede_core::status::{JobStatus, NodeStatus};
use stampede_core::types::DbId;
use tokio::sync::Mutex;

use crate::models::{CreateNode, JobListQuery, JobOutcome, LoadTestJob, TestNode};
use crate::store::{AssignOutcome, ReleaseOutcome, Store, StoreError};

#[derive(Default)]
struct Tables {
    nodes: BTreeMap<DbId, TestNode>,
    jobs: BTreeMap<DbId, LoadTestJob>,
    next_node_id: DbId,
    next_job_id: DbId,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn create_node(&self, input: &CreateNode) -> Result<TestNode, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;
        if t.nodes.values().any(|n| n.name == input.name) {
            return Err(StoreError::Conflict(format!(
                "node name '{}' already exists",
                input.name
            )));
        }
        t.next_node_id += 1;
        let now = Utc::now();
        let node = TestNode {
            id: t.next_node_id,
            name: input.name.clone(),
            region: input.region.clone(),
            status_id: input.status.unwrap_or(NodeStatus::Active).id(),
            max_concurrent: input.max_concurrent,
            current_load: 0,
            created_at: now,
            updated_at: now,
        };
        t.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn find_node(&self, id: DbId) -> Result<Option<TestNode>, StoreError> {
        self.check()?;
        Ok(self.tables.lock().await.nodes.get(&id).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<TestNode>, StoreError> {
        self.check()?;
        Ok(self.tables.lock().await.nodes.values().cloned().collect())
    }

    async fn set_node_status(
        &self,
        id: DbId,
        status: NodeStatus,
    ) -> Result<Option<TestNode>, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;
        Ok(t.nodes.get_mut(&id).map(|node| {
            node.status_id = status.id();
            node.updated_at = Utc::now();
            node.clone()
        }))
    }

    async fn create_job(&self, owner_id: DbId, spec: &JobSpec) -> Result<LoadTestJob, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;
        t.next_job_id += 1;
        let job = LoadTestJob {
            id: t.next_job_id,
            owner_id,
            target_url: spec.target_url.clone(),
            method: spec.method.clone(),
            concurrency: spec.concurrency,
            duration_secs: spec.duration_secs,
            ramp_up_secs: spec.ramp_up_secs,
            script_source: spec.script_source.clone(),
            assigned_node_id: None,
            status_id: JobStatus::Pending.id(),
            assign_attempts: 0,
            capacity_released: false,
            error_code: None,
            error_message: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            archived_at: None,
        };
        t.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<LoadTestJob>, StoreError> {
        self.check()?;
        Ok(self.tables.lock().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(
        &self,
        owner_id: Option<DbId>,
        query: &JobListQuery,
    ) -> Result<Vec<LoadTestJob>, StoreError> {
        self.check()?;
        let (limit, offset) = query.page();
        let t = self.tables.lock().await;
        Ok(t.jobs
            .values()
            .rev()
            .filter(|j| j.archived_at.is_none())
            .filter(|j| owner_id.map_or(true, |owner| j.owner_id == owner))
            .filter(|j| query.status.map_or(true, |s| j.status() == s))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_jobs_by_status(
        &self,
        statuses: &[JobStatus],
    ) -> Result<Vec<LoadTestJob>, StoreError> {
        self.check()?;
        let t = self.tables.lock().await;
        Ok(t.jobs
            .values()
            .filter(|j| statuses.contains(&j.status()))
            .cloned()
            .collect())
    }

    async fn count_active_jobs(&self, owner_id: DbId) -> Result<i64, StoreError> {
        self.check()?;
        let t = self.tables.lock().await;
        Ok(t.jobs
            .values()
            .filter(|j| j.owner_id == owner_id && !j.status().is_terminal())
            .count() as i64)
    }

    async fn assign_job(&self, job_id: DbId) -> Result<AssignOutcome, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;

        let (status, concurrency) = match t.jobs.get(&job_id) {
            None => return Ok(AssignOutcome::NotPending(None)),
            Some(job) => (job.status(), job.concurrency),
        };
        if status != JobStatus::Pending {
            return Ok(AssignOutcome::NotPending(Some(status)));
        }

        let capacities: Vec<_> = t.nodes.values().map(TestNode::capacity).collect();
        let Some(node_id) = select_node(&capacities, concurrency) else {
            return Ok(AssignOutcome::NoCapacity);
        };

        let now = Utc::now();
        let node = {
            let node = t
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| StoreError::Inconsistent(format!("node {node_id} vanished")))?;
            node.current_load += concurrency;
            node.updated_at = now;
            node.clone()
        };
        let job = {
            let job = t
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| StoreError::Inconsistent(format!("job {job_id} vanished")))?;
            job.status_id = JobStatus::Running.id();
            job.assigned_node_id = Some(node_id);
            job.started_at = Some(now);
            job.capacity_released = false;
            job.clone()
        };

        Ok(AssignOutcome::Assigned { job, node })
    }

    async fn release_job(&self, job_id: DbId) -> Result<ReleaseOutcome, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;

        let (node_id, concurrency) = match t.jobs.get(&job_id) {
            None => return Ok(ReleaseOutcome::NotAssigned),
            Some(job) => match job.assigned_node_id {
                None => return Ok(ReleaseOutcome::NotAssigned),
                Some(_) if job.capacity_released => return Ok(ReleaseOutcome::AlreadyReleased),
                Some(node_id) => (node_id, job.concurrency),
            },
        };

        let node = {
            let node = t.nodes.get_mut(&node_id).ok_or_else(|| {
                StoreError::Inconsistent(format!("job {job_id} references missing node {node_id}"))
            })?;
            node.current_load = (node.current_load - concurrency).max(0);
            node.updated_at = Utc::now();
            node.clone()
        };
        if let Some(job) = t.jobs.get_mut(&job_id) {
            job.capacity_released = true;
        }

        Ok(ReleaseOutcome::Released { node })
    }

    async fn transition_job(
        &self,
        job_id: DbId,
        to: JobStatus,
        outcome: JobOutcome,
    ) -> Result<Option<LoadTestJob>, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;
        let Some(job) = t.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !job.status().can_transition_to(to) {
            return Ok(None);
        }

        job.status_id = to.id();
        if outcome.error_code.is_some() {
            job.error_code = outcome.error_code;
        }
        if outcome.error_message.is_some() {
            job.error_message = outcome.error_message;
        }
        if outcome.result.is_some() {
            job.result = outcome.result;
        }
        if to.is_terminal() {
            job.ended_at = Some(Utc::now());
        }
        Ok(Some(job.clone()))
    }

    async fn record_assign_attempt(&self, job_id: DbId) -> Result<i32, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;
        Ok(t.jobs.get_mut(&job_id).map_or(0, |job| {
            job.assign_attempts += 1;
            job.assign_attempts
        }))
    }

    async fn archive_job(&self, job_id: DbId) -> Result<bool, StoreError> {
        self.check()?;
        let mut t = self.tables.lock().await;
        match t.jobs.get_mut(&job_id) {
            Some(job) if job.status().is_terminal() && job.archived_at.is_none() => {
                job.archived_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
