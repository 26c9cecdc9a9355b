use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::broker::Broker;

/// Spawn the heartbeat task.
///
/// Every `interval` each client gets a Ping frame and a `heartbeat`
/// message; clients silent for longer than `timeout` are evicted.
pub fn start_heartbeat(
    broker: Arc<Broker>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let evicted = broker.heartbeat(timeout).await;
            let clients = broker.client_count().await;
            tracing::debug!(
                clients,
                evicted = evicted.len(),
                "WebSocket heartbeat",
            );
        }
    })
}
