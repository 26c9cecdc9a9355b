//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that take
//! `&PgPool` as the first argument, or `&mut PgConnection` when they must
//! run inside a caller-owned transaction.

pub mod job_repo;
pub mod node_repo;

pub use job_repo::JobRepo;
pub use node_repo::NodeRepo;
