//! Capacity-aware load-test job scheduler.
//!
//! [`Scheduler`] places jobs on test nodes through the store's atomic
//! assign/release operations, drives each job through its lifecycle, runs
//! one sandboxed script execution per running job and publishes every
//! change on the event bus.

pub mod config;
pub mod error;
pub mod quota;
pub mod scheduler;
pub mod view;

pub use config::{SandboxSettings, SchedulerConfig};
pub use error::SchedulerError;
pub use quota::{ActiveJobQuota, QuotaService};
pub use scheduler::{RecoveryReport, Scheduler};
pub use view::{JobView, NodeView, PlatformSnapshot, SystemMetrics};
