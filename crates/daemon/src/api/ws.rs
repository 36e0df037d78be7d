//! Event transport: WebSocket endpoint on the daemon port.
//!
//! Flow:
//! 1. Client connects to `/ws?token=<secret>&kind=proxy|webui`.
//! 2. The hub registers it and rebroadcasts `clients:count`.
//! 3. Outbound: every hub event as `{"event": .., "data": ..}`.
//! 4. Inbound: requests `{"id", "op", "params"}`, each acknowledged once
//!    with `{"id", "success", "data"|"error"}`; `ping` answers `pong`.
//!
//! No per-subscriber backlog survives a disconnect; a lagging subscriber
//! is dropped and rehydrates over REST.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use cd_domain::model::ClientKind;

use crate::api::ops;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub kind: Option<String>,
}

/// `GET /ws` — authenticate, then upgrade.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let presented = query.token.as_deref().unwrap_or("");
    if !state.token_matches(presented) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            "missing or invalid daemon token",
        )
            .into_response();
    }
    let kind = ClientKind::from_query(query.kind.as_deref().unwrap_or(""));
    ws.on_upgrade(move |socket| handle_socket(socket, state, kind))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, kind: ClientKind) {
    let client_id = state.hub.register(kind);
    let (mut ws_sink, mut ws_stream) = socket.split();

    // All outbound traffic (events + acks) funnels through one channel
    // so the sink has a single writer.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Forward hub events. A lagging receiver means this client cannot
    // keep up: drop the forwarder, which closes the connection.
    let mut events = state.hub.subscribe();
    let event_tx = outbound_tx.clone();
    let event_client = client_id.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_tx.send(event.frame().to_string()).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        client = %event_client,
                        skipped,
                        "subscriber lagged, disconnecting"
                    );
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Inbound request loop.
    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    tracing::debug!(client = %client_id, "ignoring unparseable frame");
                    continue;
                };
                let ack = handle_request(&state, &frame).await;
                if outbound_tx.send(ack.to_string()).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
        if forwarder.is_finished() {
            break;
        }
    }

    forwarder.abort();
    drop(outbound_tx);
    let _ = writer.await;
    state.hub.unregister(&client_id);
}

/// Run one named operation and build its single acknowledgement. Failed
/// operations ack `{success: false, error}`; the hub itself never emits
/// error events.
async fn handle_request(state: &AppState, frame: &Value) -> Value {
    let id = frame.get("id").cloned().unwrap_or(Value::Null);
    let op = frame.get("op").and_then(|v| v.as_str()).unwrap_or_default();
    let params = frame.get("params").cloned().unwrap_or(json!({}));

    if op == "ping" {
        return json!({ "id": id, "success": true, "data": "pong" });
    }

    match ops::dispatch(state, op, params).await {
        Ok(data) => json!({ "id": id, "success": true, "data": data }),
        Err(e) => json!({
            "id": id,
            "success": false,
            "error": e.public_message(),
            "code": e.code(),
        }),
    }
}
