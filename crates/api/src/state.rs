use std::sync::Arc;

use stampede_scheduler::Scheduler;

use crate::auth::IdentityVerifier;
use crate::config::ServerConfig;
use crate::ws::Broker;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub scheduler: Arc<Scheduler>,
    /// Verifies bearer tokens for HTTP requests and WebSocket handshakes.
    pub identity: Arc<dyn IdentityVerifier>,
    /// Real-time subscription broker (browser clients).
    pub broker: Arc<Broker>,
}
