//! Repository for the `test_nodes` table.
//!
//! `current_load` is only ever changed by [`NodeRepo::reserve`] and
//! [`NodeRepo::give_back`], both of which run inside the caller's
//! transaction and are guarded so the CHECK constraint can never fire.

use sqlx::{PgConnection, PgPool};
use stampede_core::status::NodeStatus;
use stampede_core::types::DbId;

use crate::models::node::{CreateNode, TestNode};

/// Column list for `test_nodes` queries.
const COLUMNS: &str = "\
    id, name, region, status_id, max_concurrent, current_load, \
    created_at, updated_at";

/// Provides CRUD and capacity accounting for test nodes.
pub struct NodeRepo;

impl NodeRepo {
    pub async fn create(pool: &PgPool, input: &CreateNode) -> Result<TestNode, sqlx::Error> {
        let query = format!(
            "INSERT INTO test_nodes (name, region, status_id, max_concurrent) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TestNode>(&query)
            .bind(&input.name)
            .bind(&input.region)
            .bind(input.status.unwrap_or(NodeStatus::Active).id())
            .bind(input.max_concurrent)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<TestNode>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_nodes WHERE id = $1");
        sqlx::query_as::<_, TestNode>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<TestNode>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_nodes ORDER BY id");
        sqlx::query_as::<_, TestNode>(&query).fetch_all(pool).await
    }

    pub async fn set_status(
        pool: &PgPool,
        id: DbId,
        status: NodeStatus,
    ) -> Result<Option<TestNode>, sqlx::Error> {
        let query = format!(
            "UPDATE test_nodes SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TestNode>(&query)
            .bind(id)
            .bind(status.id())
            .fetch_optional(pool)
            .await
    }

    /// Lock every ACTIVE node for the rest of the transaction.
    ///
    /// Locking in id order keeps concurrent assigners from deadlocking.
    pub async fn lock_active(conn: &mut PgConnection) -> Result<Vec<TestNode>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM test_nodes \
             WHERE status_id = $1 \
             ORDER BY id \
             FOR UPDATE"
        );
        sqlx::query_as::<_, TestNode>(&query)
            .bind(NodeStatus::Active.id())
            .fetch_all(conn)
            .await
    }

    /// Add `units` to a node's load if it still fits.
    ///
    /// Returns `None` when the guarded update matched nothing.
    pub async fn reserve(
        conn: &mut PgConnection,
        id: DbId,
        units: i32,
    ) -> Result<Option<TestNode>, sqlx::Error> {
        let query = format!(
            "UPDATE test_nodes \
             SET current_load = current_load + $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = $3 AND current_load + $2 <= max_concurrent \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TestNode>(&query)
            .bind(id)
            .bind(units)
            .bind(NodeStatus::Active.id())
            .fetch_optional(conn)
            .await
    }

    /// Subtract `units` from a node's load, never going below zero.
    pub async fn give_back(
        conn: &mut PgConnection,
        id: DbId,
        units: i32,
    ) -> Result<Option<TestNode>, sqlx::Error> {
        let query = format!(
            "UPDATE test_nodes \
             SET current_load = GREATEST(current_load - $2, 0), updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TestNode>(&query)
            .bind(id)
            .bind(units)
            .fetch_optional(conn)
            .await
    }
}
