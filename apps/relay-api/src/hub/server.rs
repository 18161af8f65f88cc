//! WebSocket upgrade handler and per-connection event loop (push transport).

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time;

use crate::source::SourceAddress;
use crate::AppState;

use super::broadcast::Subscription;
use super::connection::Connection;
use super::messages::{parse_client_message, ClientCommand, ServerMessage};

/// Close code sent when the hub dropped this subscriber (queue overflow).
const CLOSE_SUBSCRIBER_DROPPED: u16 = 4008;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    SourceAddress(source): SourceAddress,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, source))
}

async fn handle_connection(socket: WebSocket, state: AppState, source: Option<String>) {
    let mut connection = Connection::new(source);
    let Some(subscription) = connection.activate(&state.hub) else {
        return;
    };

    let (ws_tx, ws_rx) = socket.split();
    let reason = run_connection(&state, &connection, subscription, ws_tx, ws_rx).await;

    connection.close(&state.hub, reason);
}

/// Main loop: forward queued hub messages to the socket and feed inbound
/// submissions to the hub. Returns why the connection ended.
async fn run_connection(
    state: &AppState,
    connection: &Connection,
    mut subscription: Subscription,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
) -> &'static str {
    let send_timeout = state.config.send_timeout();

    loop {
        tokio::select! {
            // Drain outbound first so our own submissions cannot overflow our queue.
            biased;

            outbound = subscription.recv() => {
                let Some(message) = outbound else {
                    let _ = send_close(&mut ws_tx, CLOSE_SUBSCRIBER_DROPPED, "Subscriber dropped", send_timeout).await;
                    return "dropped by hub";
                };
                if let Err(reason) = send_json(&mut ws_tx, &message, send_timeout).await {
                    tracing::debug!(connection_id = %connection.connection_id, %reason, "push failed");
                    return reason;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(state, connection, text.as_str()),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => return "client closed",
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %connection.connection_id, "ws read error");
                        return "read error";
                    }
                    _ => continue,
                }
            }
        }
    }
}

/// Handle one inbound text frame. Malformed input is logged and ignored; the
/// connection stays open.
fn handle_text(state: &AppState, connection: &Connection, text: &str) {
    match parse_client_message(text) {
        Ok(ClientCommand::Submit(event)) => {
            if !state.throttle.admit(&event.session_id, &event.kind) {
                tracing::debug!(
                    connection_id = %connection.connection_id,
                    session_id = %event.session_id,
                    kind = %event.kind,
                    "event throttled"
                );
                return;
            }
            let submitted = state
                .hub
                .submit(event, connection.source_address().map(str::to_owned));
            tracing::info!(
                seq = submitted.record.seq,
                kind = %submitted.record.kind,
                source = %submitted.record.source_address,
                "log received over ws"
            );
        }
        Ok(ClientCommand::Unsupported(kind)) => {
            tracing::debug!(connection_id = %connection.connection_id, %kind, "ignoring unsupported message type");
        }
        Err(err) => {
            tracing::warn!(connection_id = %connection.connection_id, %err, "malformed client message");
        }
    }
}

/// Serialize and send one message, bounded by `timeout`.
async fn send_json(
    ws_tx: &mut WsSink,
    message: &ServerMessage,
    timeout: Duration,
) -> Result<(), &'static str> {
    let json = serde_json::to_string(message).map_err(|_| "serialization failed")?;
    match time::timeout(timeout, ws_tx.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("send failed"),
        Err(_elapsed) => Err("send timed out"),
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut WsSink,
    code: u16,
    reason: &str,
    timeout: Duration,
) -> Result<(), &'static str> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    match time::timeout(timeout, ws_tx.send(close_msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("send failed"),
        Err(_elapsed) => Err("send timed out"),
    }
}
