use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stampede_db::{MemoryStore, PgStore, Store};
use stampede_events::EventBus;
use stampede_scheduler::{ActiveJobQuota, Scheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stampede_api::auth::JwtVerifier;
use stampede_api::config::ServerConfig;
use stampede_api::router::build_app_router;
use stampede_api::state::AppState;
use stampede_api::ws::{self, Broker, SnapshotSource};

const DEFAULT_LOG_FILTER: &str =
    "stampede_api=debug,stampede_scheduler=debug,stampede_sandbox=info,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();

    // --- Tracing ---
    let (json_layer, text_layer) = if config.log_json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Store ---
    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let pool = stampede_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            stampede_db::health_check(&pool)
                .await
                .expect("Database health check failed");

            stampede_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store (state is lost on exit)");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // --- Scheduler ---
    let quota = Arc::new(ActiveJobQuota::new(
        Arc::clone(&store),
        config.scheduler.max_active_jobs_per_user,
    ));
    let http = stampede_sandbox::http::client_for(config.scheduler.sandbox.http_mode)
        .expect("Failed to build outbound HTTP client");
    let scheduler = Scheduler::new(
        store,
        quota,
        Arc::clone(&event_bus),
        http,
        config.scheduler.clone(),
    );

    match scheduler.recover().await {
        Ok(report) => tracing::info!(?report, "Recovered scheduler state"),
        Err(e) => tracing::error!(error = %e, "Scheduler recovery failed; continuing"),
    }

    // --- Broker and background loops ---
    let source: Arc<dyn SnapshotSource> = scheduler.clone();
    let broker = Arc::new(Broker::new(Arc::clone(&source)));
    let background = CancellationToken::new();

    let relay_handle = ws::start_relay(
        Arc::clone(&broker),
        event_bus.subscribe(),
        background.clone(),
    );
    let snapshot_handle = ws::start_snapshot_loop(
        source,
        Arc::clone(&event_bus),
        config.ws.snapshot_interval,
        background.clone(),
    );
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&broker),
        config.ws.heartbeat_interval,
        config.ws.heartbeat_timeout(),
        background.clone(),
    );
    tracing::info!("Broker services started (relay, snapshots, heartbeat)");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        scheduler: Arc::clone(&scheduler),
        identity: Arc::new(JwtVerifier::new(config.jwt.clone())),
        broker: Arc::clone(&broker),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    // Executions first, so their final job updates still go out through
    // the relay.
    scheduler.shutdown(grace).await;

    background.cancel();
    for handle in [relay_handle, snapshot_handle, heartbeat_handle] {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Broker services stopped");

    let ws_count = broker.client_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    broker.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
