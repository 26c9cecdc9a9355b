use crate::validation::ValidationReport;

/// Reasons an execution never started.
///
/// Failures *during* a run are not errors here; they come back as a
/// `ScriptResult` with `success: false`.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Script failed validation: {}", .0.errors.join("; "))]
    Validation(ValidationReport),

    #[error("An execution is already running on this engine")]
    AlreadyRunning,

    #[error("Sandbox failure: {0}")]
    Runtime(String),
}

impl SandboxError {
    /// Stable error-kind name, recorded as a job's `error_code`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::AlreadyRunning => "AlreadyRunningError",
            Self::Runtime(_) => "SandboxError",
        }
    }
}
