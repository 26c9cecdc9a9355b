//! Delayed placement retries for jobs that found no capacity.

use std::sync::Arc;

use stampede_core::placement::backoff_delay;
use stampede_core::types::DbId;

use super::Scheduler;
use crate::error::SchedulerError;

impl Scheduler {
    /// Try `assign` again after the backoff for `attempt`.
    ///
    /// A job has at most one retry pending: while one waits, further
    /// failed attempts (for example direct `assign` calls) still count but
    /// start no new chain. Shutdown drops pending retries; the jobs stay
    /// PENDING for the next process to recover.
    pub(super) fn schedule_retry(self: &Arc<Self>, job_id: DbId, attempt: u32) {
        if !self.retries().insert(job_id) {
            tracing::debug!(job_id, attempt, "Retry already pending");
            return;
        }

        let delay = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_max);
        let shutdown = self.shutdown.clone();
        let this = Arc::clone(self);

        self.tasks.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    this.retries().remove(&job_id);
                }
                _ = tokio::time::sleep(delay) => {
                    this.retries().remove(&job_id);
                    match this.assign(job_id).await {
                        Ok(_) => tracing::info!(job_id, attempt, "Job placed on retry"),
                        Err(SchedulerError::NoCapacity(_)) => {}
                        Err(SchedulerError::InvalidTransition { from, .. }) => {
                            tracing::debug!(job_id, %from, "Retry dropped; job no longer pending");
                        }
                        Err(e) => tracing::warn!(job_id, error = %e, "Placement retry failed"),
                    }
                }
            }
        });
    }
}
