//! Test node entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use stampede_core::placement::NodeCapacity;
use stampede_core::status::{NodeStatus, StatusId};
use stampede_core::types::{DbId, Timestamp};

/// A row from the `test_nodes` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TestNode {
    pub id: DbId,
    pub name: String,
    pub region: String,
    pub status_id: StatusId,
    /// Capacity units this node can run at once.
    pub max_concurrent: i32,
    /// Capacity units currently reserved by RUNNING/PAUSED jobs.
    pub current_load: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TestNode {
    /// Decoded status; unknown ids are treated as inactive.
    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_id(self.status_id).unwrap_or(NodeStatus::Inactive)
    }

    /// Placement view of this node.
    pub fn capacity(&self) -> NodeCapacity {
        NodeCapacity {
            id: self.id,
            status: self.status(),
            max_concurrent: self.max_concurrent,
            current_load: self.current_load,
        }
    }
}

/// DTO for registering a node via `POST /api/v1/nodes`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNode {
    pub name: String,
    pub region: String,
    pub max_concurrent: i32,
    /// Defaults to `ACTIVE`.
    pub status: Option<NodeStatus>,
}
