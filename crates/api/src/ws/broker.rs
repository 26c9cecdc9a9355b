//! Channel subscriptions for authenticated WebSocket clients.
//!
//! The broker never waits on a client: every outbound frame goes through the
//! connection's unbounded channel and is written by that connection's send
//! task. A client whose channel is closed is pruned on the next send.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use stampede_core::types::{DbId, Timestamp};
use stampede_events::channels;
use stampede_scheduler::JobView;
use tokio::sync::{mpsc, RwLock};

use super::protocol::ServerMessage;
use super::snapshot::{self, SnapshotSource};
use crate::auth::Identity;

/// Channel sender half for pushing frames to one WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// One authenticated connection and what it listens to.
pub struct ClientSession {
    pub identity: Identity,
    pub channels: HashSet<String>,
    /// Last pong or message received from the client.
    pub last_activity: Instant,
    pub connected_at: Timestamp,
    sender: WsSender,
}

/// Who may subscribe to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAccess {
    /// Any authenticated user.
    Open,
    AdminOnly,
    /// The job's owner and admins.
    JobOwner(DbId),
    Unknown,
}

impl ChannelAccess {
    pub fn of(channel: &str) -> Self {
        match channel {
            channels::SYSTEM | channels::NODES => Self::Open,
            channels::JOBS => Self::AdminOnly,
            other => channels::parse_job(other).map_or(Self::Unknown, Self::JobOwner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("client {0} is not connected")]
    UnknownClient(String),

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("access to channel '{0}' denied")]
    Forbidden(String),

    #[error("job {0} not found")]
    JobNotFound(DbId),

    #[error("channel state unavailable: {0}")]
    Unavailable(String),
}

pub struct Broker {
    clients: RwLock<HashMap<String, ClientSession>>,
    source: Arc<dyn SnapshotSource>,
}

impl Broker {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            source,
        }
    }

    /// Register an authenticated connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward frames to the WebSocket sink.
    pub async fn register(
        &self,
        client_id: String,
        identity: Identity,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ClientSession {
            identity,
            channels: HashSet::new(),
            last_activity: Instant::now(),
            connected_at: chrono::Utc::now(),
            sender: tx,
        };
        self.clients.write().await.insert(client_id, session);
        rx
    }

    /// Drop a connection and all its subscriptions.
    pub async fn remove(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
    }

    /// Record inbound activity for heartbeat accounting.
    pub async fn touch(&self, client_id: &str) {
        if let Some(session) = self.clients.write().await.get_mut(client_id) {
            session.last_activity = Instant::now();
        }
    }

    /// Subscribe `client_id` to `channel` and answer it.
    ///
    /// Subscribing twice is harmless. The first subscription to a channel is
    /// followed by a fresh snapshot of it. Denials are answered with an
    /// `error` message and leave the client's subscriptions untouched.
    ///
    /// Returns whether the subscription is new.
    pub async fn subscribe(&self, client_id: &str, channel: &str) -> Result<bool, SubscribeError> {
        let result = self.try_subscribe(client_id, channel).await;
        match &result {
            Ok((newly, job)) => {
                self.send_to(client_id, &ServerMessage::subscription_confirmed(channel, true))
                    .await;
                if *newly {
                    self.send_snapshot(client_id, channel, job.clone()).await;
                }
                tracing::debug!(client_id, channel, newly, "Client subscribed");
            }
            Err(SubscribeError::UnknownClient(_)) => {}
            Err(e) => {
                tracing::debug!(client_id, channel, error = %e, "Subscription refused");
                self.send_to(client_id, &ServerMessage::channel_error(channel, e.to_string()))
                    .await;
            }
        }
        result.map(|(newly, _)| newly)
    }

    async fn try_subscribe(
        &self,
        client_id: &str,
        channel: &str,
    ) -> Result<(bool, Option<JobView>), SubscribeError> {
        let identity = self
            .clients
            .read()
            .await
            .get(client_id)
            .map(|s| s.identity.clone())
            .ok_or_else(|| SubscribeError::UnknownClient(client_id.to_string()))?;

        let job = match ChannelAccess::of(channel) {
            ChannelAccess::Open => None,
            ChannelAccess::AdminOnly if identity.is_admin() => None,
            ChannelAccess::AdminOnly => return Err(SubscribeError::Forbidden(channel.to_string())),
            ChannelAccess::JobOwner(job_id) => {
                let job = self
                    .source
                    .job(job_id)
                    .await
                    .map_err(|e| SubscribeError::Unavailable(e.to_string()))?
                    .ok_or(SubscribeError::JobNotFound(job_id))?;
                if !identity.can_access_job(job.owner_id) {
                    return Err(SubscribeError::Forbidden(channel.to_string()));
                }
                Some(job)
            }
            ChannelAccess::Unknown => {
                return Err(SubscribeError::UnknownChannel(channel.to_string()))
            }
        };

        let mut clients = self.clients.write().await;
        let session = clients
            .get_mut(client_id)
            .ok_or_else(|| SubscribeError::UnknownClient(client_id.to_string()))?;
        Ok((session.channels.insert(channel.to_string()), job))
    }

    /// Unsubscribe and confirm. Unsubscribing from a channel the client is
    /// not on is confirmed all the same.
    pub async fn unsubscribe(&self, client_id: &str, channel: &str) -> bool {
        let removed = match self.clients.write().await.get_mut(client_id) {
            Some(session) => session.channels.remove(channel),
            None => return false,
        };
        self.send_to(client_id, &ServerMessage::subscription_confirmed(channel, false))
            .await;
        removed
    }

    async fn send_snapshot(&self, client_id: &str, channel: &str, job: Option<JobView>) {
        let message = match (ChannelAccess::of(channel), job) {
            (ChannelAccess::JobOwner(_), Some(job)) => Some(snapshot::job_event(&job)),
            _ => match self.source.platform().await {
                Ok(platform) => snapshot::platform_events(&platform)
                    .into_iter()
                    .find(|event| event.channel == channel),
                Err(e) => {
                    tracing::warn!(client_id, channel, error = %e, "Could not build channel snapshot");
                    None
                }
            },
        };
        if let Some(event) = message {
            self.send_to(client_id, &ServerMessage::from(&event)).await;
        }
    }

    /// Send to one client. A closed connection is pruned.
    pub async fn send_to(&self, client_id: &str, message: &ServerMessage) -> bool {
        let delivered = match self.clients.read().await.get(client_id) {
            Some(session) => session.sender.send(message.to_ws()).is_ok(),
            None => return false,
        };
        if !delivered {
            self.prune(&[client_id.to_string()]).await;
        }
        delivered
    }

    /// Deliver `message` to every client subscribed to `channel`.
    ///
    /// Fire-and-forget: clients whose connection is gone are pruned without
    /// affecting the others. Returns the number of clients reached.
    pub async fn broadcast(&self, channel: &str, message: &ServerMessage) -> usize {
        let frame = message.to_ws();
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let clients = self.clients.read().await;
            for (client_id, session) in clients.iter() {
                if !session.channels.contains(channel) {
                    continue;
                }
                if session.sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    failed.push(client_id.clone());
                }
            }
        }
        if !failed.is_empty() {
            self.prune(&failed).await;
        }
        delivered
    }

    async fn prune(&self, client_ids: &[String]) {
        let mut clients = self.clients.write().await;
        for client_id in client_ids {
            if clients.remove(client_id).is_some() {
                tracing::warn!(client_id = %client_id, "Pruned client with closed connection");
            }
        }
    }

    /// One heartbeat round.
    ///
    /// Clients silent for longer than `timeout` get a Close frame and are
    /// removed from every channel; the rest get a Ping frame and a
    /// `heartbeat` message. Returns the evicted client ids.
    pub async fn heartbeat(&self, timeout: Duration) -> Vec<String> {
        let ping = Message::Ping(Bytes::new());
        let beat = ServerMessage::heartbeat().to_ws();
        let mut evicted = Vec::new();

        let mut clients = self.clients.write().await;
        clients.retain(|client_id, session| {
            if session.last_activity.elapsed() > timeout {
                let _ = session.sender.send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Utf8Bytes::from_static("heartbeat timeout"),
                })));
                evicted.push(client_id.clone());
                return false;
            }
            session.sender.send(ping.clone()).is_ok() && session.sender.send(beat.clone()).is_ok()
        });
        drop(clients);

        for client_id in &evicted {
            tracing::info!(client_id = %client_id, "Evicted silent WebSocket client");
        }
        evicted
    }

    /// Send a Close frame to every connection, then forget them all.
    pub async fn shutdown_all(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        for session in clients.values() {
            let _ = session.sender.send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: Utf8Bytes::from_static("server shutting down"),
            })));
        }
        clients.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of clients on `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|s| s.channels.contains(channel))
            .count()
    }

    /// Channels `client_id` is subscribed to, if connected.
    pub async fn channels_of(&self, client_id: &str) -> Option<HashSet<String>> {
        self.clients
            .read()
            .await
            .get(client_id)
            .map(|s| s.channels.clone())
    }
}
