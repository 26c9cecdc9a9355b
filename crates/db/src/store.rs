//! The persistence seam the scheduler is written against.
//!
//! Two implementations exist: [`PgStore`](crate::pg::PgStore) for
//! production and [`MemoryStore`](crate::memory::MemoryStore) for tests and
//! database-less local runs. Both must provide the same atomicity:
//! `assign_job` and `release_job` each change a node's load and a job row
//! as one indivisible step, serialized against every other capacity change.

use async_trait::async_trait;
use stampede_core::job_spec::JobSpec;
use stampede_core::status::{JobStatus, NodeStatus};
use stampede_core::types::DbId;

use crate::models::{CreateNode, JobListQuery, JobOutcome, LoadTestJob, TestNode};

/// Failure to reach or trust the backing store.
///
/// Any of these makes the scheduler fail closed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Inconsistent record: {0}")]
    Inconsistent(String),

    /// A uniqueness rule rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Map a PostgreSQL unique violation (code 23505 on a `uq_` constraint)
    /// to [`StoreError::Conflict`]; anything else stays a database error.
    pub fn from_insert(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return StoreError::Conflict(format!(
                        "Duplicate value violates unique constraint: {constraint}"
                    ));
                }
            }
        }
        StoreError::Database(err)
    }
}

/// Result of an atomic placement attempt.
#[derive(Debug, Clone)]
pub enum AssignOutcome {
    /// The node's load was incremented and the job is now RUNNING on it.
    Assigned { job: LoadTestJob, node: TestNode },
    /// No ACTIVE node has room; nothing changed.
    NoCapacity,
    /// The job is missing or no longer PENDING; nothing changed.
    NotPending(Option<JobStatus>),
}

/// Result of giving a job's reservation back.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// The node's load was decremented by the job's concurrency.
    Released { node: TestNode },
    /// The reservation was already returned earlier; nothing changed.
    AlreadyReleased,
    /// The job never held a reservation (or does not exist).
    NotAssigned,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap round trip proving the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    // -- nodes ----------------------------------------------------------------

    async fn create_node(&self, input: &CreateNode) -> Result<TestNode, StoreError>;

    async fn find_node(&self, id: DbId) -> Result<Option<TestNode>, StoreError>;

    /// All nodes ordered by id.
    async fn list_nodes(&self) -> Result<Vec<TestNode>, StoreError>;

    /// Change availability. Never touches `current_load`.
    async fn set_node_status(
        &self,
        id: DbId,
        status: NodeStatus,
    ) -> Result<Option<TestNode>, StoreError>;

    // -- jobs -----------------------------------------------------------------

    /// Insert a PENDING job from an already validated spec.
    async fn create_job(&self, owner_id: DbId, spec: &JobSpec) -> Result<LoadTestJob, StoreError>;

    async fn find_job(&self, id: DbId) -> Result<Option<LoadTestJob>, StoreError>;

    /// Non-archived jobs, newest first; `owner_id = None` lists everyone's.
    async fn list_jobs(
        &self,
        owner_id: Option<DbId>,
        query: &JobListQuery,
    ) -> Result<Vec<LoadTestJob>, StoreError>;

    /// Every job currently in one of `statuses`, oldest first.
    async fn list_jobs_by_status(
        &self,
        statuses: &[JobStatus],
    ) -> Result<Vec<LoadTestJob>, StoreError>;

    /// Number of non-terminal jobs owned by `owner_id`.
    async fn count_active_jobs(&self, owner_id: DbId) -> Result<i64, StoreError>;

    /// Place a PENDING job on the least-loaded ACTIVE node with room and
    /// move it to RUNNING, atomically.
    async fn assign_job(&self, job_id: DbId) -> Result<AssignOutcome, StoreError>;

    /// Return a job's reservation to its node at most once.
    async fn release_job(&self, job_id: DbId) -> Result<ReleaseOutcome, StoreError>;

    /// Move a job to `to` if its current status allows it.
    ///
    /// Returns the updated row, or `None` when the job is missing or its
    /// current status has no edge to `to` (terminal jobs included).
    async fn transition_job(
        &self,
        job_id: DbId,
        to: JobStatus,
        outcome: JobOutcome,
    ) -> Result<Option<LoadTestJob>, StoreError>;

    /// Count one more placement attempt; returns the new total.
    async fn record_assign_attempt(&self, job_id: DbId) -> Result<i32, StoreError>;

    /// Soft-delete a terminal job. Returns `false` when the job is missing,
    /// not terminal, or already archived.
    async fn archive_job(&self, job_id: DbId) -> Result<bool, StoreError>;
}
