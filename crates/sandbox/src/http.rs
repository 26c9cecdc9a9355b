//! Outbound HTTP for scripts.
//!
//! The sandbox never talks to the network directly: every call goes through
//! an [`OutboundHttp`] after the allowlist and request limit have passed.
//! [`LiveHttp`] issues real requests; [`SimulatedHttp`] fakes them with
//! random latency for tests and dry runs.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;

/// Largest response body handed back to a script.
const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    pub status: u16,
    pub body: String,
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[async_trait]
pub trait OutboundHttp: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// Mode selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    Live,
    Simulated,
}

impl FromStr for HttpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("unknown HTTP mode '{other}' (expected live|simulated)")),
        }
    }
}

/// Build the client for `mode`.
pub fn client_for(mode: HttpMode) -> Result<Arc<dyn OutboundHttp>, HttpError> {
    Ok(match mode {
        HttpMode::Live => Arc::new(LiveHttp::new()?),
        HttpMode::Simulated => Arc::new(SimulatedHttp::default()),
    })
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

/// `reqwest`-backed client. Redirects are not followed so a redirect can
/// never lead outside the allowlist.
#[derive(Clone)]
pub struct LiveHttp {
    client: reqwest::Client,
}

impl LiveHttp {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("stampede-sandbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Read at most [`MAX_BODY_BYTES`] of the body; the rest is never pulled.
async fn read_capped(mut response: reqwest::Response) -> Result<Vec<u8>, HttpError> {
    let mut body = Vec::new();
    while body.len() < MAX_BODY_BYTES {
        let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?
        else {
            break;
        };
        let room = MAX_BODY_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok(body)
}

#[async_trait]
impl OutboundHttp for LiveHttp {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HttpError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpError::InvalidMethod(request.method.clone()))?;

        let started = Instant::now();
        let mut builder = self.client.request(method, &request.url);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = read_capped(response).await?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(OutboundResponse {
            status,
            body,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Simulated
// ---------------------------------------------------------------------------

/// Answers every request with `200` after a random delay.
#[derive(Debug, Clone)]
pub struct SimulatedHttp {
    pub min_latency: Duration,
    pub max_latency: Duration,
}

impl Default for SimulatedHttp {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(20),
            max_latency: Duration::from_millis(120),
        }
    }
}

impl SimulatedHttp {
    /// Zero-latency instance for tests.
    pub fn instant() -> Self {
        Self {
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
        }
    }

    fn pick_latency(&self) -> Duration {
        let min = self.min_latency.as_millis() as u64;
        let max = (self.max_latency.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[async_trait]
impl OutboundHttp for SimulatedHttp {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HttpError> {
        reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpError::InvalidMethod(request.method.clone()))?;

        let latency = self.pick_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let body = serde_json::json!({
            "simulated": true,
            "method": request.method,
            "url": request.url,
        })
        .to_string();

        Ok(OutboundResponse {
            status: 200,
            body,
            duration_ms: latency.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("LIVE".parse::<HttpMode>(), Ok(HttpMode::Live));
        assert_eq!(" simulated ".parse::<HttpMode>(), Ok(HttpMode::Simulated));
        assert!("mock".parse::<HttpMode>().is_err());
    }

    #[tokio::test]
    async fn simulated_answers_200() {
        let http = SimulatedHttp::instant();
        let response = http
            .send(OutboundRequest {
                method: "POST".into(),
                url: "https://api.example.com/x".into(),
                body: Some("{}".into()),
            })
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.contains("\"simulated\":true"));
    }

    #[tokio::test]
    async fn simulated_rejects_malformed_method() {
        let http = SimulatedHttp::instant();
        let result = http
            .send(OutboundRequest {
                method: "GE T".into(),
                url: "https://api.example.com/".into(),
                body: None,
            })
            .await;
        assert_matches!(result, Err(HttpError::InvalidMethod(_)));
    }

    #[test]
    fn latency_stays_in_range() {
        let http = SimulatedHttp {
            min_latency: Duration::from_millis(5),
            max_latency: Duration::from_millis(10),
        };
        for _ in 0..50 {
            let latency = http.pick_latency();
            assert!(latency >= Duration::from_millis(5) && latency <= Duration::from_millis(10));
        }
    }
}
