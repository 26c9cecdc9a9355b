//! Repository for the `load_test_jobs` table.
//!
//! Status transitions are conditional updates guarded by
//! [`JobStatus::sources_for`], so a terminal row is never rewritten and two
//! racing writers cannot both win the same edge.

use sqlx::{PgConnection, PgPool};
use stampede_core::job_spec::JobSpec;
use stampede_core::status::{JobStatus, StatusId};
use stampede_core::types::DbId;

use crate::models::job::{JobListQuery, JobOutcome, LoadTestJob};

/// Column list for `load_test_jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, target_url, method, concurrency, duration_secs, ramp_up_secs, \
    script_source, assigned_node_id, status_id, assign_attempts, capacity_released, \
    error_code, error_message, result, \
    created_at, started_at, ended_at, archived_at";

fn status_ids(statuses: &[JobStatus]) -> Vec<StatusId> {
    statuses.iter().map(|s| s.id()).collect()
}

/// Provides CRUD and lifecycle operations for load-test jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new PENDING job.
    pub async fn create(
        pool: &PgPool,
        owner_id: DbId,
        spec: &JobSpec,
    ) -> Result<LoadTestJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO load_test_jobs \
                (owner_id, target_url, method, concurrency, duration_secs, ramp_up_secs, \
                 script_source, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LoadTestJob>(&query)
            .bind(owner_id)
            .bind(&spec.target_url)
            .bind(&spec.method)
            .bind(spec.concurrency)
            .bind(spec.duration_secs)
            .bind(spec.ramp_up_secs)
            .bind(&spec.script_source)
            .bind(JobStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<LoadTestJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM load_test_jobs WHERE id = $1");
        sqlx::query_as::<_, LoadTestJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Non-archived jobs, newest first. `owner_id = None` means all owners.
    pub async fn list(
        pool: &PgPool,
        owner_id: Option<DbId>,
        params: &JobListQuery,
    ) -> Result<Vec<LoadTestJob>, sqlx::Error> {
        let (limit, offset) = params.page();
        let query = format!(
            "SELECT {COLUMNS} FROM load_test_jobs \
             WHERE archived_at IS NULL \
               AND ($1::BIGINT IS NULL OR owner_id = $1) \
               AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, LoadTestJob>(&query)
            .bind(owner_id)
            .bind(params.status.map(JobStatus::id))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Every job in one of `statuses`, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        statuses: &[JobStatus],
    ) -> Result<Vec<LoadTestJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM load_test_jobs \
             WHERE status_id = ANY($1) \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, LoadTestJob>(&query)
            .bind(status_ids(statuses))
            .fetch_all(pool)
            .await
    }

    pub async fn count_active(pool: &PgPool, owner_id: DbId) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM load_test_jobs \
             WHERE owner_id = $1 AND status_id = ANY($2)",
        )
        .bind(owner_id)
        .bind(status_ids(&JobStatus::NON_TERMINAL))
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Lock a job row for the rest of the transaction.
    pub async fn lock(conn: &mut PgConnection, id: DbId) -> Result<Option<LoadTestJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM load_test_jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, LoadTestJob>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// PENDING -> RUNNING on `node_id`, inside the assigning transaction.
    pub async fn mark_assigned(
        conn: &mut PgConnection,
        id: DbId,
        node_id: DbId,
    ) -> Result<Option<LoadTestJob>, sqlx::Error> {
        let query = format!(
            "UPDATE load_test_jobs \
             SET status_id = $3, assigned_node_id = $2, started_at = NOW(), \
                 capacity_released = FALSE \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LoadTestJob>(&query)
            .bind(id)
            .bind(node_id)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Pending.id())
            .fetch_optional(conn)
            .await
    }

    /// Flag the job's reservation as returned, inside the releasing
    /// transaction.
    pub async fn mark_released(conn: &mut PgConnection, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE load_test_jobs SET capacity_released = TRUE WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Conditionally move a job to `to`, writing `outcome` alongside.
    ///
    /// Error fields and result are only overwritten when the outcome
    /// carries a value. `ended_at` is stamped on entry to a terminal state.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        to: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<Option<LoadTestJob>, sqlx::Error> {
        let query = format!(
            "UPDATE load_test_jobs \
             SET status_id = $2, \
                 error_code = COALESCE($3, error_code), \
                 error_message = COALESCE($4, error_message), \
                 result = COALESCE($5, result), \
                 ended_at = CASE WHEN $6 THEN NOW() ELSE ended_at END \
             WHERE id = $1 AND status_id = ANY($7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LoadTestJob>(&query)
            .bind(id)
            .bind(to.id())
            .bind(&outcome.error_code)
            .bind(&outcome.error_message)
            .bind(&outcome.result)
            .bind(to.is_terminal())
            .bind(status_ids(&JobStatus::sources_for(to)))
            .fetch_optional(pool)
            .await
    }

    /// Increment the placement attempt counter, returning the new value.
    pub async fn record_assign_attempt(pool: &PgPool, id: DbId) -> Result<Option<i32>, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE load_test_jobs SET assign_attempts = assign_attempts + 1 \
             WHERE id = $1 \
             RETURNING assign_attempts",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(n,)| n))
    }

    /// Soft-delete a terminal job. Returns `true` if a row was archived.
    pub async fn archive(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let terminal: Vec<StatusId> = JobStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.id())
            .collect();
        let result = sqlx::query(
            "UPDATE load_test_jobs SET archived_at = NOW() \
             WHERE id = $1 AND archived_at IS NULL AND status_id = ANY($2)",
        )
        .bind(id)
        .bind(terminal)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
