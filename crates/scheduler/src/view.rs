//! Read models handed to the API and the broker.
//!
//! Rows carry numeric status ids; views carry the wire labels.

use serde::Serialize;
use stampede_core::placement::utilization_pct;
use stampede_core::status::{JobStatus, NodeStatus};
use stampede_core::types::{DbId, Timestamp};
use stampede_db::models::{LoadTestJob, TestNode};

/// A job as reported by `status(job_id)`.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: DbId,
    pub owner_id: DbId,
    pub target_url: String,
    pub method: String,
    pub concurrency: i32,
    pub duration_secs: i32,
    pub ramp_up_secs: i32,
    pub status: JobStatus,
    pub assigned_node_id: Option<DbId>,
    pub assign_attempts: i32,
    pub capacity_released: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

impl From<LoadTestJob> for JobView {
    fn from(job: LoadTestJob) -> Self {
        let status = job.status();
        Self {
            id: job.id,
            owner_id: job.owner_id,
            target_url: job.target_url,
            method: job.method,
            concurrency: job.concurrency,
            duration_secs: job.duration_secs,
            ramp_up_secs: job.ramp_up_secs,
            status,
            assigned_node_id: job.assigned_node_id,
            assign_attempts: job.assign_attempts,
            capacity_released: job.capacity_released,
            error_code: job.error_code,
            error_message: job.error_message,
            result: job.result,
            created_at: job.created_at,
            started_at: job.started_at,
            ended_at: job.ended_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: DbId,
    pub name: String,
    pub region: String,
    pub status: NodeStatus,
    pub max_concurrent: i32,
    pub current_load: i32,
    pub utilization_pct: f64,
    pub updated_at: Timestamp,
}

impl From<TestNode> for NodeView {
    fn from(node: TestNode) -> Self {
        Self {
            status: node.status(),
            utilization_pct: utilization_pct(
                i64::from(node.current_load),
                i64::from(node.max_concurrent),
            ),
            id: node.id,
            name: node.name,
            region: node.region,
            max_concurrent: node.max_concurrent,
            current_load: node.current_load,
            updated_at: node.updated_at,
        }
    }
}

/// Platform-wide aggregates published on the `system` channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub total_nodes: usize,
    pub active_nodes: usize,
    /// Summed `max_concurrent` of ACTIVE nodes.
    pub total_capacity: i64,
    /// Summed `current_load` of all nodes.
    pub used_capacity: i64,
    pub utilization_pct: f64,
    pub pending_jobs: usize,
    pub running_jobs: usize,
    pub paused_jobs: usize,
    /// Script executions currently in flight in this process.
    pub executing: usize,
}

/// Everything the broker's snapshot loop publishes in one tick.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformSnapshot {
    pub metrics: SystemMetrics,
    pub nodes: Vec<NodeView>,
    pub active_jobs: Vec<JobView>,
}

impl PlatformSnapshot {
    pub fn build(nodes: Vec<TestNode>, active_jobs: Vec<LoadTestJob>, executing: usize) -> Self {
        let count = |status: JobStatus| active_jobs.iter().filter(|j| j.status() == status).count();
        let total_capacity = nodes
            .iter()
            .filter(|n| n.status() == NodeStatus::Active)
            .map(|n| i64::from(n.max_concurrent))
            .sum();
        let used_capacity = nodes.iter().map(|n| i64::from(n.current_load)).sum();

        let metrics = SystemMetrics {
            total_nodes: nodes.len(),
            active_nodes: nodes
                .iter()
                .filter(|n| n.status() == NodeStatus::Active)
                .count(),
            total_capacity,
            used_capacity,
            utilization_pct: utilization_pct(used_capacity, total_capacity),
            pending_jobs: count(JobStatus::Pending),
            running_jobs: count(JobStatus::Running),
            paused_jobs: count(JobStatus::Paused),
            executing,
        };

        Self {
            metrics,
            nodes: nodes.into_iter().map(NodeView::from).collect(),
            active_jobs: active_jobs.into_iter().map(JobView::from).collect(),
        }
    }
}
