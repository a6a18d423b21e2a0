//! WebSocket handler for real-time communication
//!
//! A socket authenticates either at the handshake (`?token=` or a bearer
//! header) or with an `authenticate` message within the configured timeout.
//! Anything else closes the socket after an `AUTH_FAILED` error.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::*,
    presence::ConnectionId,
    AppState,
};

use super::bearer_token;

#[derive(Debug, Default, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_string));

    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn send_direct(sink: &mut SplitSink<WebSocket, Message>, msg: &WsServerMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = sink.send(Message::Text(json)).await;
    }
}

async fn authenticate(state: &AppState, token: &str) -> Option<User> {
    match state.storage.authenticate_token(token).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("Socket authentication failed: {}", e);
            None
        }
    }
}

/// First frame must be `authenticate`; any other frame fails the handshake
async fn await_authenticate(
    state: &AppState,
    receiver: &mut SplitStream<WebSocket>,
    timeout: Duration,
) -> Option<User> {
    let first_frame = async {
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                Message::Text(text) => {
                    return match serde_json::from_str::<WsClientMessage>(&text) {
                        Ok(WsClientMessage::Authenticate { token }) => authenticate(state, &token).await,
                        _ => None,
                    };
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    };

    tokio::time::timeout(timeout, first_frame).await.ok().flatten()
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user = match token {
        Some(token) => authenticate(&state, &token).await,
        None => {
            let timeout = Duration::from_secs(state.config.auth.socket_auth_timeout_secs);
            await_authenticate(&state, &mut ws_receiver, timeout).await
        }
    };

    let Some(user) = user else {
        send_direct(
            &mut ws_sender,
            &WsServerMessage::error("AUTH_FAILED", "Invalid or expired token"),
        )
        .await;
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    };

    let conn: ConnectionId = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsServerMessage>();

    // Forward queued events from the gateway to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    if let Err(e) = state.messaging.connect(&user, conn, tx.clone()).await {
        tracing::error!(user = %user.id, "Failed to attach socket: {}", e);
        state.messaging.disconnect(&user.id, conn).await;
        send_task.abort();
        return;
    }
    tracing::info!(user = %user.id, conn = %conn, "WebSocket authenticated");

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsClientMessage>(&text) {
                Ok(client_msg) => dispatch(&state, &user, conn, &tx, client_msg).await,
                Err(e) => {
                    tracing::warn!("Failed to parse WebSocket message: {}", e);
                    let _ = tx.send(WsServerMessage::error(
                        "PARSE_ERROR",
                        format!("Invalid message format: {}", e),
                    ));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    state.messaging.disconnect(&user.id, conn).await;
    tracing::info!(user = %user.id, conn = %conn, "WebSocket closed");
    send_task.abort();
}

async fn dispatch(
    state: &AppState,
    user: &User,
    conn: ConnectionId,
    tx: &mpsc::UnboundedSender<WsServerMessage>,
    msg: WsClientMessage,
) {
    let messaging = &state.messaging;

    let result: Result<(), AppError> = match msg {
        WsClientMessage::Authenticate { .. } => Ok(()),

        WsClientMessage::Typing(signal) => {
            messaging.handle_typing(&user.id, conn, signal);
            Ok(())
        }

        WsClientMessage::Presence { status } => {
            messaging.gateway().broadcast_except_user(
                &user.id,
                WsServerMessage::Presence(PresenceNotice {
                    user_id: user.id.clone(),
                    status,
                }),
            );
            Ok(())
        }

        WsClientMessage::ForwardedMessage(relay) => {
            messaging
                .relay_forwarded(&user.id, conn, &relay.message_id, ChatTarget::Individual(relay.recipient_id))
                .await;
            Ok(())
        }

        WsClientMessage::ForwardedToGroup(relay) => {
            messaging
                .relay_forwarded(&user.id, conn, &relay.message_id, ChatTarget::Event(relay.event_id))
                .await;
            Ok(())
        }

        WsClientMessage::JoinEvent(join) => messaging.join_event(&user.id, conn, &join.event_id).await,

        WsClientMessage::RtcSignal(signal) => messaging.relay_signal(&user.id, signal).await,

        WsClientMessage::IceCandidate(candidate) => messaging.relay_ice_candidate(&user.id, candidate).await,

        WsClientMessage::CallInitiate(req) => messaging.initiate_call(&user.id, conn, req).await.map(|_| ()),

        WsClientMessage::CallAccept(call) => messaging.accept_call(&user.id, &call.call_id).await.map(|_| ()),

        WsClientMessage::CallReject(call) => messaging.reject_call(&user.id, &call.call_id).await.map(|_| ()),

        WsClientMessage::CallEnd(call) => messaging.end_call(&user.id, &call.call_id).await.map(|_| ()),

        WsClientMessage::CallFailed(failure) => messaging.fail_call(&user.id, failure).await.map(|_| ()),

        WsClientMessage::Ping => {
            let _ = tx.send(WsServerMessage::Pong);
            Ok(())
        }
    };

    if let Err(e) = result {
        let _ = tx.send(WsServerMessage::error(e.code(), e.public_message()));
    }
}
