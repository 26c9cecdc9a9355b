//! Per-user submission quota.

use std::sync::Arc;

use async_trait::async_trait;
use stampede_core::types::DbId;
use stampede_db::{Store, StoreError};

/// Decides whether a user may create another job.
///
/// An `Err` means the answer is unknown; callers must treat it as a refusal.
#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn check_quota(&self, user_id: DbId) -> Result<bool, StoreError>;

    /// The limit reported back to a refused user.
    fn limit(&self) -> i64;
}

/// Allows a submission while the user has fewer than `max_active_jobs`
/// non-terminal jobs. Admins are counted like everyone else.
pub struct ActiveJobQuota {
    store: Arc<dyn Store>,
    max_active_jobs: i64,
}

impl ActiveJobQuota {
    pub fn new(store: Arc<dyn Store>, max_active_jobs: i64) -> Self {
        Self {
            store,
            max_active_jobs,
        }
    }
}

#[async_trait]
impl QuotaService for ActiveJobQuota {
    async fn check_quota(&self, user_id: DbId) -> Result<bool, StoreError> {
        let active = self.store.count_active_jobs(user_id).await?;
        Ok(active < self.max_active_jobs)
    }

    fn limit(&self) -> i64 {
        self.max_active_jobs
    }
}
