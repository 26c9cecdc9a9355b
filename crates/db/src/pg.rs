//! PostgreSQL-backed [`Store`].

use async_trait::async_trait;
use stampede_core::job_spec::JobSpec;
use stampede_core::placement::select_node;
use stampede_core::status::{JobStatus, NodeStatus};
use stampede_core::types::DbId;

use crate::models::{CreateNode, JobListQuery, JobOutcome, LoadTestJob, TestNode};
use crate::repositories::{JobRepo, NodeRepo};
use crate::store::{AssignOutcome, ReleaseOutcome, Store, StoreError};
use crate::DbPool;

/// Store implementation over a `sqlx` connection pool.
///
/// Capacity changes run in a single transaction that row-locks the job and
/// the node(s) involved, so concurrent schedulers (in this process or
/// another) serialize on the database.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }

    async fn create_node(&self, input: &CreateNode) -> Result<TestNode, StoreError> {
        NodeRepo::create(&self.pool, input)
            .await
            .map_err(StoreError::from_insert)
    }

    async fn find_node(&self, id: DbId) -> Result<Option<TestNode>, StoreError> {
        Ok(NodeRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_nodes(&self) -> Result<Vec<TestNode>, StoreError> {
        Ok(NodeRepo::list(&self.pool).await?)
    }

    async fn set_node_status(
        &self,
        id: DbId,
        status: NodeStatus,
    ) -> Result<Option<TestNode>, StoreError> {
        Ok(NodeRepo::set_status(&self.pool, id, status).await?)
    }

    async fn create_job(&self, owner_id: DbId, spec: &JobSpec) -> Result<LoadTestJob, StoreError> {
        Ok(JobRepo::create(&self.pool, owner_id, spec).await?)
    }

    async fn find_job(&self, id: DbId) -> Result<Option<LoadTestJob>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_jobs(
        &self,
        owner_id: Option<DbId>,
        query: &JobListQuery,
    ) -> Result<Vec<LoadTestJob>, StoreError> {
        Ok(JobRepo::list(&self.pool, owner_id, query).await?)
    }

    async fn list_jobs_by_status(
        &self,
        statuses: &[JobStatus],
    ) -> Result<Vec<LoadTestJob>, StoreError> {
        Ok(JobRepo::list_by_status(&self.pool, statuses).await?)
    }

    async fn count_active_jobs(&self, owner_id: DbId) -> Result<i64, StoreError> {
        Ok(JobRepo::count_active(&self.pool, owner_id).await?)
    }

    async fn assign_job(&self, job_id: DbId) -> Result<AssignOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(job) = JobRepo::lock(&mut tx, job_id).await? else {
            return Ok(AssignOutcome::NotPending(None));
        };
        if job.status() != JobStatus::Pending {
            return Ok(AssignOutcome::NotPending(Some(job.status())));
        }

        let nodes = NodeRepo::lock_active(&mut tx).await?;
        let capacities: Vec<_> = nodes.iter().map(TestNode::capacity).collect();
        let Some(node_id) = select_node(&capacities, job.concurrency) else {
            return Ok(AssignOutcome::NoCapacity);
        };

        let Some(node) = NodeRepo::reserve(&mut tx, node_id, job.concurrency).await? else {
            // Rows are locked, so this only happens if the node changed
            // between the read and the guarded update. Roll back.
            return Ok(AssignOutcome::NoCapacity);
        };
        let Some(job) = JobRepo::mark_assigned(&mut tx, job_id, node_id).await? else {
            return Err(StoreError::Inconsistent(format!(
                "job {job_id} left PENDING while locked"
            )));
        };

        tx.commit().await?;
        tracing::debug!(job_id, node_id, load = node.current_load, "Job assigned");
        Ok(AssignOutcome::Assigned { job, node })
    }

    async fn release_job(&self, job_id: DbId) -> Result<ReleaseOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(job) = JobRepo::lock(&mut tx, job_id).await? else {
            return Ok(ReleaseOutcome::NotAssigned);
        };
        let Some(node_id) = job.assigned_node_id else {
            return Ok(ReleaseOutcome::NotAssigned);
        };
        if job.capacity_released {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        let Some(node) = NodeRepo::give_back(&mut tx, node_id, job.concurrency).await? else {
            return Err(StoreError::Inconsistent(format!(
                "job {job_id} references missing node {node_id}"
            )));
        };
        JobRepo::mark_released(&mut tx, job_id).await?;

        tx.commit().await?;
        tracing::debug!(job_id, node_id, load = node.current_load, "Capacity released");
        Ok(ReleaseOutcome::Released { node })
    }

    async fn transition_job(
        &self,
        job_id: DbId,
        to: JobStatus,
        outcome: JobOutcome,
    ) -> Result<Option<LoadTestJob>, StoreError> {
        Ok(JobRepo::transition(&self.pool, job_id, to, &outcome).await?)
    }

    async fn record_assign_attempt(&self, job_id: DbId) -> Result<i32, StoreError> {
        Ok(JobRepo::record_assign_attempt(&self.pool, job_id)
            .await?
            .unwrap_or(0))
    }

    async fn archive_job(&self, job_id: DbId) -> Result<bool, StoreError> {
        Ok(JobRepo::archive(&self.pool, job_id).await?)
    }
}
