//! WebSocket endpoints for the observatory: `/ws/logs`, `/ws/metrics`,
//! `/ws/session/{id}`.
//!
//! Flow per connection:
//! 1. Snapshot for the topic is sent immediately
//! 2. Incremental updates stream from the hub's per-subscriber channel
//! 3. Heartbeats go out on the configured interval; a subscriber that
//!    misses three is force-closed

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::hub::Topic;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub service: Option<String>,
}

pub async fn logs_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let topic = Topic::Logs {
        service: query.service,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

pub async fn metrics_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::Metrics))
}

pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let topic = Topic::Session { id: session_id };
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

async fn handle_socket(socket: WebSocket, state: AppState, topic: Topic) {
    let (mut sink, mut stream) = socket.split();

    // 1. Snapshot first, so the client renders before the stream starts
    match state.hub.snapshot(&topic).await {
        Ok(snapshot) => {
            if send_json(&mut sink, &snapshot).await.is_err() {
                return;
            }
        }
        Err(err) => {
            warn!(error = %err, "snapshot failed, closing subscriber");
            let _ = sink
                .send(Message::Close(None))
                .await;
            return;
        }
    }

    let (subscriber_id, mut updates) = state.hub.subscribe(topic.clone());
    info!(subscriber_id, ?topic, "subscriber connected");

    let heartbeat_interval = state.hub.config().heartbeat_interval;
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                if send_json(&mut sink, &update).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(_)) => break,
                }
            }
            _ = heartbeat.tick() => {
                // Three silent intervals and the connection is gone
                if last_seen.elapsed() > heartbeat_interval * 3 {
                    debug!(subscriber_id, "subscriber missed heartbeats, closing");
                    break;
                }
                let ping = json!({"type": "heartbeat", "ts": chrono::Utc::now()});
                if send_json(&mut sink, &ping).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(subscriber_id);
    info!(subscriber_id, "subscriber disconnected");
}

async fn send_json(
    sink: &mut (impl SinkExt<Message> + Unpin),
    message: &Value,
) -> Result<(), ()> {
    let text = serde_json::to_string(message).map_err(|_| ())?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
