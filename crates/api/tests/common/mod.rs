#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use stampede_core::job_spec::JobSpec;
use stampede_core::types::DbId;
use stampede_db::models::CreateNode;
use stampede_db::MemoryStore;
use stampede_events::EventBus;
use stampede_sandbox::SimulatedHttp;
use stampede_scheduler::{ActiveJobQuota, NodeView, Scheduler, SchedulerConfig};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use stampede_api::auth::jwt::{generate_access_token, JwtConfig};
use stampede_api::auth::JwtVerifier;
use stampede_api::config::{ServerConfig, WsConfig};
use stampede_api::router::build_app_router;
use stampede_api::state::AppState;
use stampede_api::ws::{self, Broker, SnapshotSource};

pub const TEST_SECRET: &str = "integration-test-secret";

/// Script that issues one request and then idles until cancelled.
pub const LONG_SCRIPT: &str = "http.get(target.url); utils.sleep(600000);";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    /// Stops the relay started for the app.
    pub background: CancellationToken,
}

impl TestApp {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.state.scheduler
    }

    pub async fn add_node(&self, name: &str, max_concurrent: i32) -> NodeView {
        self.scheduler()
            .create_node(CreateNode {
                name: name.to_string(),
                region: "eu-west".to_string(),
                max_concurrent,
                status: None,
            })
            .await
            .unwrap()
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    let scheduler = SchedulerConfig {
        // Retries never fire within a test.
        backoff_base: Duration::from_secs(3600),
        backoff_max: Duration::from_secs(3600),
        max_active_jobs_per_user: 3,
        ..SchedulerConfig::default()
    };

    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: None,
        log_json: false,
        jwt: JwtConfig {
            secret: TEST_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
        scheduler,
        ws: WsConfig {
            auth_timeout: Duration::from_secs(2),
            ..WsConfig::default()
        },
    }
}

/// Build the full application on the in-memory store, with the bus relay
/// running. Must be called inside a Tokio runtime.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());

    let quota = Arc::new(ActiveJobQuota::new(
        store.clone(),
        config.scheduler.max_active_jobs_per_user,
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        quota,
        Arc::clone(&bus),
        Arc::new(SimulatedHttp::instant()),
        config.scheduler.clone(),
    );

    let source: Arc<dyn SnapshotSource> = scheduler.clone();
    let broker = Arc::new(Broker::new(source));
    let background = CancellationToken::new();
    ws::start_relay(Arc::clone(&broker), bus.subscribe(), background.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        scheduler,
        identity: Arc::new(JwtVerifier::new(config.jwt.clone())),
        broker,
    };

    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        store,
        bus,
        background,
    }
}

/// Mint a token signed with the test secret.
pub fn token(user_id: DbId, role: &str) -> String {
    let config = JwtConfig {
        secret: TEST_SECRET.to_string(),
        access_token_expiry_mins: 15,
    };
    generate_access_token(user_id, role, &config).unwrap()
}

pub fn job_spec(concurrency: i32, script: &str) -> JobSpec {
    JobSpec {
        target_url: "https://api.example.com/health".to_string(),
        method: "GET".to_string(),
        concurrency,
        duration_secs: 600,
        ramp_up_secs: 0,
        script_source: script.to_string(),
    }
}

/// Send a request through the router.
pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &TestApp, uri: &str, token: Option<&str>) -> Response<Body> {
    send(app, Method::GET, uri, token, None).await
}

pub async fn post_json(app: &TestApp, uri: &str, token: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn post(app: &TestApp, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), None).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
