use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use stampede_sandbox::{HttpMode, SandboxLimits};
use stampede_scheduler::{SandboxSettings, SchedulerConfig};

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Grace period for executions and connections at shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL URL. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
    pub jwt: JwtConfig,
    pub scheduler: SchedulerConfig,
    pub ws: WsConfig,
}

/// Real-time broker timings.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_interval: Duration,
    /// Missed heartbeat intervals before a silent client is evicted.
    pub heartbeat_timeout_multiplier: u32,
    pub snapshot_interval: Duration,
    /// How long a connection without `?token=` may take to send `auth`.
    pub auth_timeout: Duration,
}

impl WsConfig {
    /// Inactivity after which a client is evicted.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_timeout_multiplier
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout_multiplier: 2,
            snapshot_interval: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                 |
    /// |-----------------------------------|-------------------------|
    /// | `HOST`                            | `0.0.0.0`               |
    /// | `PORT`                            | `3000`                  |
    /// | `CORS_ORIGINS`                    | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`            | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`           | `30`                    |
    /// | `DATABASE_URL`                    | unset (in-memory store) |
    /// | `LOG_FORMAT`                      | `text` (`json`)         |
    /// | `JWT_SECRET`                      | required                |
    /// | `JWT_ACCESS_EXPIRY_MINS`          | `15`                    |
    /// | `SCHEDULER_MAX_ASSIGN_ATTEMPTS`   | `8`                     |
    /// | `SCHEDULER_BACKOFF_BASE_MS`       | `500`                   |
    /// | `SCHEDULER_BACKOFF_MAX_MS`        | `30000`                 |
    /// | `SCHEDULER_MAX_JOB_CONCURRENCY`   | `10000`                 |
    /// | `QUOTA_MAX_ACTIVE_JOBS`           | `5`                     |
    /// | `SANDBOX_MAX_EXECUTION_TIME_MS`   | `300000`                |
    /// | `SANDBOX_MAX_REQUESTS`            | `1000`                  |
    /// | `SANDBOX_ALLOWED_DOMAINS`         | empty (comma list)      |
    /// | `SANDBOX_HTTP_MODE`               | `live` (`simulated`)    |
    /// | `SANDBOX_LOOP_ITERATION_LIMIT`    | `50000000`              |
    /// | `WS_HEARTBEAT_INTERVAL_SECS`      | `30`                    |
    /// | `WS_HEARTBEAT_TIMEOUT_MULTIPLIER` | `2`                     |
    /// | `WS_SNAPSHOT_INTERVAL_SECS`       | `5`                     |
    /// | `WS_AUTH_TIMEOUT_SECS`            | `10`                    |
    ///
    /// # Panics
    ///
    /// Panics on any value that does not parse, so misconfiguration fails
    /// at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_parse("PORT", "3000");
        let cors_origins = env_list("CORS_ORIGINS", "http://localhost:5173");
        let request_timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", "30");
        let shutdown_timeout_secs: u64 = env_parse("SHUTDOWN_TIMEOUT_SECS", "30");

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let log_json = std::env::var("LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let jwt = JwtConfig::from_env();

        let sandbox = SandboxSettings {
            max_execution_time_ms: env_parse("SANDBOX_MAX_EXECUTION_TIME_MS", "300000"),
            max_requests_per_execution: env_parse("SANDBOX_MAX_REQUESTS", "1000"),
            extra_allowed_domains: env_list("SANDBOX_ALLOWED_DOMAINS", ""),
            http_mode: env_parse::<HttpMode>("SANDBOX_HTTP_MODE", "live"),
            limits: SandboxLimits {
                loop_iteration_limit: env_parse("SANDBOX_LOOP_ITERATION_LIMIT", "50000000"),
                ..SandboxLimits::default()
            },
        };

        let scheduler = SchedulerConfig {
            max_assign_attempts: env_parse("SCHEDULER_MAX_ASSIGN_ATTEMPTS", "8"),
            backoff_base: Duration::from_millis(env_parse("SCHEDULER_BACKOFF_BASE_MS", "500")),
            backoff_max: Duration::from_millis(env_parse("SCHEDULER_BACKOFF_MAX_MS", "30000")),
            max_job_concurrency: env_parse("SCHEDULER_MAX_JOB_CONCURRENCY", "10000"),
            max_active_jobs_per_user: env_parse("QUOTA_MAX_ACTIVE_JOBS", "5"),
            sandbox,
        };
        assert!(scheduler.max_assign_attempts >= 1, "SCHEDULER_MAX_ASSIGN_ATTEMPTS must be at least 1");

        let ws = WsConfig {
            heartbeat_interval: Duration::from_secs(env_parse("WS_HEARTBEAT_INTERVAL_SECS", "30")),
            heartbeat_timeout_multiplier: env_parse("WS_HEARTBEAT_TIMEOUT_MULTIPLIER", "2"),
            snapshot_interval: Duration::from_secs(env_parse("WS_SNAPSHOT_INTERVAL_SECS", "5")),
            auth_timeout: Duration::from_secs(env_parse("WS_AUTH_TIMEOUT_SECS", "10")),
        };
        assert!(!ws.heartbeat_interval.is_zero(), "WS_HEARTBEAT_INTERVAL_SECS must be positive");
        assert!(!ws.snapshot_interval.is_zero(), "WS_SNAPSHOT_INTERVAL_SECS must be positive");
        assert!(
            ws.heartbeat_timeout_multiplier >= 1,
            "WS_HEARTBEAT_TIMEOUT_MULTIPLIER must be at least 1"
        );

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            database_url,
            log_json,
            jwt,
            scheduler,
            ws,
        }
    }
}

/// Parse `name` from the environment, falling back to `default`.
fn env_parse<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .unwrap_or_else(|e| panic!("{name} has an invalid value '{raw}': {e}"))
}

/// Comma-separated list with blanks dropped.
fn env_list(name: &str, default: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
