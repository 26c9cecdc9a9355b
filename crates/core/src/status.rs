//! Status enums mapping to SMALLINT columns, plus the job lifecycle rules.
//!
//! Each enum variant's discriminant matches the value stored in the
//! corresponding `status_id` column; the wire name is the upper-case label
//! used in API payloads and broker messages.

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant = $val ),+
        }

        impl $name {
            /// Every variant, in discriminant order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Map a database status ID back to the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// Upper-case wire label.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Test node availability.
    NodeStatus {
        Active = 1 => "ACTIVE",
        Inactive = 2 => "INACTIVE",
        Maintenance = 3 => "MAINTENANCE",
    }
}

define_status_enum! {
    /// Load-test job lifecycle status.
    JobStatus {
        Pending = 1 => "PENDING",
        Running = 2 => "RUNNING",
        Paused = 3 => "PAUSED",
        Completed = 4 => "COMPLETED",
        Failed = 5 => "FAILED",
        Cancelled = 6 => "CANCELLED",
    }
}

impl JobStatus {
    /// Statuses in which a job still holds (or waits for) a placement.
    pub const NON_TERMINAL: [JobStatus; 3] =
        [JobStatus::Pending, JobStatus::Running, JobStatus::Paused];

    /// Statuses in which a job's concurrency counts against its node.
    pub const HOLDING_CAPACITY: [JobStatus; 2] = [JobStatus::Running, JobStatus::Paused];

    /// Completed, failed and cancelled jobs are final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// ```text
    /// PENDING -> RUNNING -> {COMPLETED, FAILED}
    /// RUNNING <-> PAUSED, PAUSED -> {COMPLETED, FAILED}
    /// PENDING -> FAILED          (placement retries exhausted)
    /// any non-terminal -> CANCELLED
    /// ```
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running | Failed | Cancelled) => true,
            (Running, Paused | Completed | Failed | Cancelled) => true,
            (Paused, Running | Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }

    /// Every status from which `target` is reachable in one step.
    ///
    /// Stores use this as the guard of a conditional update so a terminal
    /// row can never be rewritten.
    pub fn sources_for(target: JobStatus) -> Vec<JobStatus> {
        JobStatus::ALL
            .iter()
            .copied()
            .filter(|from| from.can_transition_to(target))
            .collect()
    }
}
