//! Row models and request DTOs for the `test_nodes` and `load_test_jobs`
//! tables.

pub mod job;
pub mod node;

pub use job::{JobListQuery, JobOutcome, LoadTestJob};
pub use node::{CreateNode, TestNode};
