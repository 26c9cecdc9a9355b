//! Domain primitives shared by every Stampede crate.
//!
//! Pure logic only: identifiers, the error enum, role names, lifecycle
//! status enums with their transition rules, and the placement / backoff
//! arithmetic the scheduler builds on. No I/O lives here.

pub mod error;
pub mod job_spec;
pub mod placement;
pub mod roles;
pub mod status;
pub mod types;
