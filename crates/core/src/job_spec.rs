//! Load-test job submission payload and its validation rules.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CoreError;

/// Largest script source accepted at submission (64 KiB).
pub const MAX_SCRIPT_BYTES: usize = 64 * 1024;

/// Longest permitted test run (24 hours).
pub const MAX_DURATION_SECS: i32 = 86_400;

/// HTTP methods a job may declare for its target.
pub const ALLOWED_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// What a user submits to start a load test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub target_url: String,
    pub method: String,
    /// Capacity units requested on a node.
    pub concurrency: i32,
    pub duration_secs: i32,
    #[serde(default)]
    pub ramp_up_secs: i32,
    pub script_source: String,
}

impl JobSpec {
    /// Validate every field and return the normalised spec.
    ///
    /// The method is upper-cased; all other fields are kept as submitted.
    pub fn normalized(mut self, max_concurrency: i32) -> Result<Self, CoreError> {
        target_host(&self.target_url).ok_or_else(|| {
            CoreError::Validation(format!(
                "target_url must be an absolute http(s) URL, got '{}'",
                self.target_url
            ))
        })?;

        self.method = self.method.trim().to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&self.method.as_str()) {
            return Err(CoreError::Validation(format!(
                "method must be one of {}",
                ALLOWED_METHODS.join(", ")
            )));
        }

        if self.concurrency < 1 || self.concurrency > max_concurrency {
            return Err(CoreError::Validation(format!(
                "concurrency must be between 1 and {max_concurrency}"
            )));
        }
        if self.duration_secs < 1 || self.duration_secs > MAX_DURATION_SECS {
            return Err(CoreError::Validation(format!(
                "duration_secs must be between 1 and {MAX_DURATION_SECS}"
            )));
        }
        if self.ramp_up_secs < 0 || self.ramp_up_secs > self.duration_secs {
            return Err(CoreError::Validation(
                "ramp_up_secs must be between 0 and duration_secs".to_string(),
            ));
        }

        if self.script_source.trim().is_empty() {
            return Err(CoreError::Validation(
                "script_source must not be empty".to_string(),
            ));
        }
        if self.script_source.len() > MAX_SCRIPT_BYTES {
            return Err(CoreError::Validation(format!(
                "script_source must not exceed {MAX_SCRIPT_BYTES} bytes"
            )));
        }

        Ok(self)
    }
}

/// Lower-cased host of an absolute `http`/`https` URL.
pub fn target_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str().map(|h| h.to_ascii_lowercase())
}
