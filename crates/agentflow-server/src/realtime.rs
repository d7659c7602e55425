//! C6 — Realtime Gateway: the long-lived WebSocket transport.
//! Uses axum's split-sender/receiver `handle_socket` pattern, generalized
//! from a single broadcast channel to per-session subscriptions managed
//! per connection.

use std::collections::{HashMap, HashSet};

use agentflow_bus::Topic;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ClientCommand {
    Subscribe { session_id: String },
    Unsubscribe { session_id: String },
}

fn credential_from_handshake(headers: &HeaderMap, query: &RealtimeQuery) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    if let Some(key) = &query.api_key {
        return Some(key.clone());
    }
    if let Some(cookie) = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
    {
        for part in cookie.split(';') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix("agentflow_session=") {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Authenticates the handshake before accepting the upgrade at all: on
/// failure the connection is never accepted, matching a "reject with
/// reason, do not accept" contract.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
) -> Response {
    let credential = credential_from_handshake(&headers, &query);
    let principal = credential.and_then(|c| state.admission.admit(Some(&c)).ok());

    let Some(_principal) = principal else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Authentication required" })),
        )
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

    // Global forwarding starts before the initial snapshot is read so no
    // administrative notification published in between is missed.
    let mut global_sub = state.bus.subscribe(&Topic::Global);
    {
        let tx = outgoing_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = global_sub.recv().await {
                if tx.send(frame(msg.name, &msg.payload)).is_err() {
                    break;
                }
            }
        });
    }

    match state.store.list_sessions() {
        Ok(sessions) => {
            let _ = outgoing_tx.send(frame("sessions:list", &serde_json::to_value(&sessions).unwrap_or_default()));
        }
        Err(err) => warn!(%err, "failed to load initial sessions:list snapshot"),
    }

    let mut session_subs: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

    let writer = tokio::spawn(async move {
        while let Some(text) = outgoing_rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(command) = serde_json::from_str::<ClientCommand>(&text) else {
            continue;
        };
        match command {
            ClientCommand::Subscribe { session_id } => {
                if session_subs.contains_key(&session_id) {
                    continue;
                }
                let handle = spawn_session_forward(&state, session_id.clone(), outgoing_tx.clone());
                session_subs.insert(session_id, handle);
            }
            ClientCommand::Unsubscribe { session_id } => {
                if let Some(handle) = session_subs.remove(&session_id) {
                    handle.abort();
                }
            }
        }
    }

    for (_, handle) in session_subs {
        handle.abort();
    }
    writer.abort();
    info!("realtime connection closed");
}

/// Subscribes to `session:<id>` before reading history, then dedups the
/// window where an event could land in both the history read and the live
/// stream, guaranteeing subscribe-then-snapshot-then-flush with no gap and
/// no duplicate.
fn spawn_session_forward(
    state: &AppState,
    session_id: String,
    outgoing_tx: mpsc::UnboundedSender<String>,
) -> tokio::task::JoinHandle<()> {
    let mut sub = state.bus.subscribe(&Topic::Session(session_id.clone()));
    let store = state.store.clone();

    tokio::spawn(async move {
        let events = store.get_session_events(&session_id).unwrap_or_default();
        let mut seen: HashSet<Uuid> = events.iter().map(|e| e.id).collect();
        let _ = outgoing_tx.send(frame(
            "session:events",
            &serde_json::to_value(&events).unwrap_or_default(),
        ));

        while let Some(msg) = sub.recv().await {
            if msg.name == "event" {
                if let Some(id) = msg
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                {
                    if seen.remove(&id) {
                        continue;
                    }
                }
            }
            if outgoing_tx.send(frame(msg.name, &msg.payload)).is_err() {
                break;
            }
        }
    })
}

fn frame(name: &str, payload: &serde_json::Value) -> String {
    json!({ "type": name, "payload": payload }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_prefers_header_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "agentflow_hdr".parse().unwrap());
        let query = RealtimeQuery {
            api_key: Some("agentflow_qs".to_string()),
        };
        assert_eq!(
            credential_from_handshake(&headers, &query),
            Some("agentflow_hdr".to_string())
        );
    }

    #[test]
    fn credential_falls_back_to_query_param() {
        let headers = HeaderMap::new();
        let query = RealtimeQuery {
            api_key: Some("agentflow_qs".to_string()),
        };
        assert_eq!(
            credential_from_handshake(&headers, &query),
            Some("agentflow_qs".to_string())
        );
    }

    #[test]
    fn subscribe_command_parses() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"subscribe","sessionId":"S1"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Subscribe { session_id } if session_id == "S1"));
    }
}
