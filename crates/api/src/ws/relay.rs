//! Fan-out of bus events to WebSocket subscribers.

use std::sync::Arc;

use stampede_events::BusEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::broker::Broker;
use super::protocol::ServerMessage;

/// Spawn the relay: every event on the bus is broadcast on its channel.
///
/// Stops on cancellation or when the bus is dropped.
pub fn start_relay(
    broker: Arc<Broker>,
    mut events: Receiver<BusEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => {
                    broker
                        .broadcast(&event.channel, &ServerMessage::from(&event))
                        .await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Broker relay lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Broker relay stopped");
    })
}
