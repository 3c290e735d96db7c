//! WebSocket handler for real-time updates.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use livepreview_core::{PreviewHandle, PreviewState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::{models::PreviewStatus, AppState};

/// WebSocket event sent to clients.
#[derive(Debug, Clone, Serialize)]
pub struct WebSocketEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Client subscription message.
#[derive(Debug, Deserialize)]
struct SubscriptionMessage {
    action: String,
    #[serde(default)]
    events: Vec<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.ws_tx.subscribe();
    let (sub_tx, mut sub_rx) = tokio::sync::mpsc::channel::<Vec<String>>(16);

    // New clients get the current status right away
    let hello = WebSocketEvent {
        event_type: "preview.status".to_string(),
        timestamp: now_ms(),
        data: state
            .handle
            .with_state(|s| serde_json::to_value(PreviewStatus::from(s)).ok()),
    };
    if let Ok(msg) = serde_json::to_string(&hello) {
        if sender.send(Message::Text(msg)).await.is_err() {
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        let mut subscriptions = vec!["*".to_string()];
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if is_subscribed(&event.event_type, &subscriptions) {
                                let msg = serde_json::to_string(&event).unwrap_or_default();
                                if sender.send(Message::Text(msg)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::debug!("WebSocket client lagged, skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                Some(new_subs) = sub_rx.recv() => {
                    subscriptions = new_subs;
                }
            }
        }
    });

    let mut local_subscriptions = vec!["*".to_string()];

    while let Some(msg) = receiver.next().await {
        if let Ok(Message::Text(text)) = msg {
            if let Ok(sub_msg) = serde_json::from_str::<SubscriptionMessage>(&text) {
                if apply_subscription(&mut local_subscriptions, &sub_msg) {
                    let _ = sub_tx.send(local_subscriptions.clone()).await;
                }
            }
        }
    }

    send_task.abort();
}

/// Update `subscriptions` in place. Returns false for unknown actions.
fn apply_subscription(subscriptions: &mut Vec<String>, msg: &SubscriptionMessage) -> bool {
    match msg.action.as_str() {
        "subscribe" => {
            if msg.events.is_empty() {
                *subscriptions = vec!["*".to_string()];
            } else {
                for pattern in &msg.events {
                    if !subscriptions.contains(pattern) {
                        subscriptions.push(pattern.clone());
                    }
                }
            }
            true
        }
        "unsubscribe" => {
            subscriptions.retain(|s| !msg.events.contains(s));
            true
        }
        _ => false,
    }
}

/// Check if an event type matches any subscription pattern.
fn is_subscribed(event_type: &str, subscriptions: &[String]) -> bool {
    subscriptions.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => event_type.starts_with(prefix),
        None => pattern == event_type,
    })
}

fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Events describing the step from `previous` to `current`.
fn state_events(previous: Option<&PreviewState>, current: &PreviewState) -> Vec<(&'static str, serde_json::Value)> {
    let mut events = Vec::new();

    let generation_changed = previous.map_or(true, |p| p.generation != current.generation);
    if generation_changed {
        events.push((
            "preview.generation",
            serde_json::json!({ "generation": current.generation.as_u64() }),
        ));
    }

    let frame_changed = previous.map_or(true, |p| p.diagnostics.frame != current.diagnostics.frame);
    if frame_changed {
        events.push((
            "preview.frame",
            serde_json::json!({
                "html": current.diagnostics.frame.html,
                "outline": current.diagnostics.frame.outline,
            }),
        ));
    }

    if let Ok(status) = serde_json::to_value(PreviewStatus::from(current)) {
        events.push(("preview.status", status));
    }
    events
}

/// Background task that polls state and broadcasts events.
pub async fn run_event_broadcaster(handle: PreviewHandle, tx: broadcast::Sender<WebSocketEvent>) {
    let mut last: Option<PreviewState> = None;

    let mut interval = tokio::time::interval(Duration::from_millis(50)); // 20 Hz update rate

    loop {
        interval.tick().await;

        let version = handle.state().version();
        if last.as_ref().map(|s| s.version) == Some(version) {
            continue;
        }

        let current = handle.snapshot();
        let timestamp = now_ms();
        for (event_type, data) in state_events(last.as_ref(), &current) {
            let _ = tx.send(WebSocketEvent {
                event_type: event_type.to_string(),
                timestamp,
                data: Some(data),
            });
        }
        last = Some(current);
    }
}
