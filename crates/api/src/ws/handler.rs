use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::protocol::{ClientMessage, ServerMessage, CLOSE_AUTH_FAILED};
use crate::auth::{AuthOutcome, Identity};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The token may come as `?token=` on the upgrade request; otherwise the
/// first client message must be `auth`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

/// Manage a single WebSocket connection after upgrade.
///
///   1. Authenticates, closing with code 4001 on failure.
///   2. Registers the client with the broker and sends `welcome`.
///   3. Spawns a sender task that forwards frames from the broker channel.
///   4. Dispatches inbound messages until either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    let identity = match authenticate(&state, token, &mut stream).await {
        Ok(identity) => identity,
        Err(reason) => {
            tracing::info!(reason, "WebSocket authentication failed");
            let frame = CloseFrame {
                code: CLOSE_AUTH_FAILED,
                reason: Utf8Bytes::from_static(reason),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let client_id = uuid::Uuid::new_v4().to_string();
    let broker = &state.broker;
    let mut rx = broker.register(client_id.clone(), identity.clone()).await;
    tracing::info!(client_id = %client_id, user_id = identity.user_id, "WebSocket connected");

    broker
        .send_to(
            &client_id,
            &ServerMessage::welcome(&client_id, identity.user_id, &identity.role),
        )
        .await;

    // Sender task: forward channel frames to the WebSocket sink. Ends after
    // a Close frame or once the broker drops the client.
    let sender_client_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(client_id = %sender_client_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            _ = &mut send_task => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Text(text))) => {
                broker.touch(&client_id).await;
                dispatch(&state, &client_id, text.as_str()).await;
            }
            Some(Ok(_)) => broker.touch(&client_id).await,
            Some(Err(e)) => {
                tracing::debug!(client_id = %client_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    broker.remove(&client_id).await;
    send_task.abort();
    tracing::info!(client_id = %client_id, "WebSocket disconnected");
}

/// Resolve the connection's identity, or the reason it was refused.
async fn authenticate(
    state: &AppState,
    token: Option<String>,
    stream: &mut SplitStream<WebSocket>,
) -> Result<Identity, &'static str> {
    let token = match token {
        Some(token) => token,
        None => match tokio::time::timeout(state.config.ws.auth_timeout, auth_message(stream)).await
        {
            Ok(Some(token)) => token,
            Ok(None) => return Err("authentication required"),
            Err(_) => return Err("authentication timed out"),
        },
    };

    match state.identity.verify(&token).await {
        AuthOutcome::Verified(identity) => Ok(identity),
        AuthOutcome::Rejected { reason } => Err(reason.as_str()),
    }
}

/// Wait for the first data message and take the token out of it if it is
/// an `auth` message.
async fn auth_message(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Text(text) => {
                return match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Auth { token }) => Some(token),
                    _ => None,
                };
            }
            _ => return None,
        }
    }
    None
}

async fn dispatch(state: &AppState, client_id: &str, text: &str) {
    let broker = &state.broker;
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { channel }) => {
            // Refusals are answered by the broker.
            let _ = broker.subscribe(client_id, &channel).await;
        }
        Ok(ClientMessage::Unsubscribe { channel }) => {
            broker.unsubscribe(client_id, &channel).await;
        }
        Ok(ClientMessage::Ping) => {
            broker.send_to(client_id, &ServerMessage::heartbeat()).await;
        }
        Ok(ClientMessage::Auth { .. }) => {
            broker
                .send_to(client_id, &ServerMessage::error("already authenticated"))
                .await;
        }
        Err(e) => {
            broker
                .send_to(client_id, &ServerMessage::error(format!("invalid message: {e}")))
                .await;
        }
    }
}
