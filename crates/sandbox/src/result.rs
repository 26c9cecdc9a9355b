//! Execution outcome types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kinds of execution failure recorded on a job.
///
/// The [`name`](ScriptErrorKind::name) is what scripts see as `error.name`
/// and what the scheduler stores as the job's `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptErrorKind {
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "RateLimitExceededError")]
    RateLimitExceeded,
    #[serde(rename = "DomainNotAllowedError")]
    DomainNotAllowed,
    #[serde(rename = "HttpError")]
    Http,
    /// The script threw and did not catch.
    #[serde(rename = "ScriptError")]
    Exception,
    /// Stopped by a cancel request.
    #[serde(rename = "CancelledError")]
    Cancelled,
}

impl ScriptErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Timeout => "TimeoutError",
            Self::RateLimitExceeded => "RateLimitExceededError",
            Self::DomainNotAllowed => "DomainNotAllowedError",
            Self::Http => "HttpError",
            Self::Exception => "ScriptError",
            Self::Cancelled => "CancelledError",
        }
    }

    /// Inverse of [`name`](Self::name) for the error names scripts can throw.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "TimeoutError" => Some(Self::Timeout),
            "RateLimitExceededError" => Some(Self::RateLimitExceeded),
            "DomainNotAllowedError" => Some(Self::DomainNotAllowed),
            "HttpError" => Some(Self::Http),
            "CancelledError" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One outbound call as seen by the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    /// `None` when the call failed before a response arrived.
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_requests: u32,
    pub requests: Vec<RequestRecord>,
    pub elapsed_ms: u64,
    pub log_lines: u32,
}

impl ExecutionMetrics {
    /// Requests that got a 2xx answer.
    pub fn successful_requests(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.status.is_some_and(|s| (200..300).contains(&s)))
            .count()
    }
}

/// Outcome of one engine execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResult {
    pub success: bool,
    /// Completion value of the script as JSON (`null` if not representable).
    pub value: serde_json::Value,
    pub error: Option<ScriptError>,
    pub metrics: ExecutionMetrics,
}

impl ScriptResult {
    pub fn succeeded(value: serde_json::Value, metrics: ExecutionMetrics) -> Self {
        Self {
            success: true,
            value,
            error: None,
            metrics,
        }
    }

    pub fn failed(error: ScriptError, metrics: ExecutionMetrics) -> Self {
        Self {
            success: false,
            value: serde_json::Value::Null,
            error: Some(error),
            metrics,
        }
    }

    pub fn error_kind(&self) -> Option<ScriptErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
