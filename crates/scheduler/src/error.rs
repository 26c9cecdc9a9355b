use stampede_core::error::CoreError;
use stampede_core::status::JobStatus;
use stampede_core::types::DbId;
use stampede_db::StoreError;
use stampede_sandbox::ValidationReport;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Script rejected: {}", .0.errors.join("; "))]
    ScriptRejected(ValidationReport),

    #[error("Quota exceeded: user {owner_id} already has {limit} active jobs")]
    QuotaExceeded { owner_id: DbId, limit: i64 },

    #[error("No node has capacity for job {0}")]
    NoCapacity(DbId),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Job {job_id} cannot {action} while {from}")]
    InvalidTransition {
        job_id: DbId,
        from: JobStatus,
        action: &'static str,
    },

    #[error("Job {0} has already finished")]
    AlreadyCancelled(DbId),

    #[error("Capacity for job {0} was already released")]
    AlreadyReleased(DbId),

    #[error("Job {0} holds no node reservation")]
    NotAssigned(DbId),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub(crate) fn job_not_found(id: DbId) -> Self {
        Self::NotFound { entity: "Job", id }
    }

    pub(crate) fn node_not_found(id: DbId) -> Self {
        Self::NotFound { entity: "Node", id }
    }

    /// Stable error-kind name used in API error codes and job records.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::ScriptRejected(_) => "ValidationError",
            Self::QuotaExceeded { .. } => "QuotaExceededError",
            Self::NoCapacity(_) => "NoCapacityError",
            Self::NotFound { .. } => "NotFoundError",
            Self::InvalidTransition { .. } => "InvalidTransitionError",
            Self::AlreadyCancelled(_) => "AlreadyCancelledError",
            Self::AlreadyReleased(_) => "AlreadyReleasedError",
            Self::NotAssigned(_) => "NotAssignedError",
            Self::Conflict(_) => "ConflictError",
            Self::StoreUnavailable(_) => "StoreUnavailableError",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => Self::StoreUnavailable(e.to_string()),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Inconsistent(msg) => Self::Internal(msg),
        }
    }
}

impl From<CoreError> for SchedulerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
