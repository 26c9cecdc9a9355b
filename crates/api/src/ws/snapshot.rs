//! Periodic platform snapshots for the `system`, `nodes` and `jobs`
//! channels, and the per-channel snapshot sent on first subscribe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use stampede_core::types::DbId;
use stampede_events::{channels, BusEvent, EventBus};
use stampede_scheduler::{JobView, PlatformSnapshot, Scheduler, SchedulerError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Read side the broker needs from the scheduler.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn platform(&self) -> Result<PlatformSnapshot, SchedulerError>;

    /// `None` when the job does not exist.
    async fn job(&self, job_id: DbId) -> Result<Option<JobView>, SchedulerError>;
}

#[async_trait]
impl SnapshotSource for Scheduler {
    async fn platform(&self) -> Result<PlatformSnapshot, SchedulerError> {
        self.snapshot().await
    }

    async fn job(&self, job_id: DbId) -> Result<Option<JobView>, SchedulerError> {
        match self.status(job_id).await {
            Ok(job) => Ok(Some(job)),
            Err(SchedulerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One event per platform channel.
pub fn platform_events(snapshot: &PlatformSnapshot) -> [BusEvent; 3] {
    [
        BusEvent::new(channels::SYSTEM, channels::MSG_SYSTEM_METRICS)
            .with_data(json!(snapshot.metrics)),
        BusEvent::new(channels::NODES, channels::MSG_NODE_UPDATE)
            .with_data(json!({ "nodes": snapshot.nodes })),
        BusEvent::new(channels::JOBS, channels::MSG_JOB_UPDATE)
            .with_data(json!({ "jobs": snapshot.active_jobs })),
    ]
}

/// Current state of one job, on its own channel.
pub fn job_event(job: &JobView) -> BusEvent {
    BusEvent::job_update(job.id, json!({ "job": job }))
}

/// Spawn the loop that publishes [`platform_events`] every `interval`,
/// whether or not anyone is subscribed.
pub fn start_snapshot_loop(
    source: Arc<dyn SnapshotSource>,
    bus: Arc<EventBus>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match source.platform().await {
                Ok(snapshot) => {
                    for event in platform_events(&snapshot) {
                        bus.publish(event);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Snapshot skipped"),
            }
        }
        tracing::debug!("Snapshot loop stopped");
    })
}
