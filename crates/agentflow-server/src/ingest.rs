//! C4 — Ingest API: `POST /api/ingest`. Validates, applies the
//! claude-code transcript-splice side effect, normalizes, persists, and
//! publishes — the one path every producer (and, synthetically, C8/C9)
//! flows through.

use std::path::Path;

use agentflow_bus::{BusMessage, Topic};
use agentflow_types::Source;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::auth_mw;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Transcript files are read only to splice the latest assistant turn into
/// a `Stop` event missing `result`. The read is bounded to the last 64 KiB
/// of the file, which comfortably covers one turn of conversational text
/// without risking an unbounded read on a multi-hour transcript
/// (documented in DESIGN.md).
const TRANSCRIPT_READ_CAP: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub source: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub event: Option<Value>,
    pub user: Option<Map<String, Value>>,
    pub git: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    #[serde(rename = "eventId")]
    pub event_id: String,
}

/// Bypasses the blanket admission middleware (see `router::build_router`)
/// so it can enforce the contract's actual order: reject a malformed body
/// with 400 before ever checking credentials, then authenticate and
/// reject with 401.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    let source_raw = body
        .source
        .ok_or_else(|| ApiError::Validation("source is required".to_string()))?;
    let session_id = body
        .session_id
        .ok_or_else(|| ApiError::Validation("sessionId is required".to_string()))?;
    let mut raw_event = body
        .event
        .ok_or_else(|| ApiError::Validation("event is required".to_string()))?;

    let principal = auth_mw::admit(&state, &headers).ok_or(ApiError::Unauthorized)?;

    let source = Source::parse(&source_raw);

    if source == Source::ClaudeCode {
        splice_transcript_if_needed(&mut raw_event).await;
    }

    let event = agentflow_normalize::normalize(&source, &session_id, &raw_event);

    state.store.append(&event)?;

    // Best-effort: a session row always exists right after `append`, so
    // this should not fail, but a race with a concurrent `deleteSession`
    // is tolerated silently.
    let _ = state.store.set_session_user(&session_id, &principal.user_id);

    if let Some(user) = &body.user {
        let mut patch = Map::new();
        patch.insert("user".to_string(), Value::Object(user.clone()));
        state.store.update_session_meta(&session_id, &patch)?;
    }
    if let Some(git) = &body.git {
        let mut patch = Map::new();
        patch.insert("git".to_string(), Value::Object(git.clone()));
        state.store.update_session_meta(&session_id, &patch)?;
    }

    state
        .bus
        .publish(&Topic::Session(session_id.clone()), BusMessage::event(&event));
    if let Some(session) = state.store.get_session(&session_id)? {
        state
            .bus
            .publish(&Topic::Global, BusMessage::session_update(&session));
    }

    info!(
        source = source.as_str(),
        session_id = %session_id,
        event_type = %event.event_type,
        "ingested event"
    );

    Ok(Json(IngestResponse {
        ok: true,
        event_id: event.id.to_string(),
    }))
}

async fn splice_transcript_if_needed(raw_event: &mut Value) {
    let Some(obj) = raw_event.as_object_mut() else {
        return;
    };
    let is_stop = obj.get("hook_event_name").and_then(Value::as_str) == Some("Stop");
    if !is_stop || obj.get("result").is_some() {
        return;
    }
    let Some(path) = obj.get("transcript_path").and_then(Value::as_str) else {
        return;
    };

    match read_latest_assistant_turn(path).await {
        Some(text) => {
            obj.insert("result".to_string(), Value::String(text));
        }
        None => {
            warn!(path, "transcript splice skipped: unreadable or empty transcript");
        }
    }
}

/// Reads the tail of a claude-code transcript (one JSON object per line)
/// and concatenates the text of the last assistant turn. Any failure
/// (missing file, unparseable line, no assistant turn) is silently
/// swallowed — the `Stop` event is still processed.
async fn read_latest_assistant_turn(path: &str) -> Option<String> {
    let bytes = tokio::fs::read(Path::new(path)).await.ok()?;
    let start = bytes.len().saturating_sub(TRANSCRIPT_READ_CAP);
    let tail = String::from_utf8_lossy(&bytes[start..]);

    tail.lines()
        .rev()
        .find_map(|line| {
            let value: Value = serde_json::from_str(line).ok()?;
            if value.get("role").and_then(Value::as_str) != Some("assistant") {
                return None;
            }
            value
                .get("content")
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let store: std::sync::Arc<dyn agentflow_store::Store> =
            std::sync::Arc::new(agentflow_store::SqliteStore::open_in_memory().unwrap());
        let config = crate::config::AppConfig {
            port: 3333,
            db_path: "agent-flow.db".into(),
            auth_secret: None,
            allowed_email_domains: vec![],
            public_url: None,
        };
        let state = AppState::new(store, config);
        state.api_keys.issue("agentflow_validkey", "user-1");
        state
    }

    #[tokio::test]
    async fn malformed_body_with_no_credentials_is_400_not_401() {
        let router = crate::router::build_router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn well_formed_body_without_credentials_is_401() {
        let router = crate::router::build_router(test_state());
        let body = serde_json::json!({
            "source": "claude-code",
            "sessionId": "S1",
            "event": {"hook_event_name": "SessionStart"},
        });
        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn well_formed_body_with_valid_key_is_accepted() {
        let router = crate::router::build_router(test_state());
        let body = serde_json::json!({
            "source": "claude-code",
            "sessionId": "S1",
            "event": {"hook_event_name": "SessionStart"},
        });
        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest")
            .header("content-type", "application/json")
            .header("x-api-key", "agentflow_validkey")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn splice_skips_when_result_present() {
        let mut raw = serde_json::json!({"hook_event_name": "Stop", "result": "already there"});
        splice_transcript_if_needed(&mut raw).await;
        assert_eq!(raw["result"], "already there");
    }

    #[tokio::test]
    async fn splice_skips_when_no_transcript_path() {
        let mut raw = serde_json::json!({"hook_event_name": "Stop"});
        splice_transcript_if_needed(&mut raw).await;
        assert!(raw.get("result").is_none());
    }

    #[tokio::test]
    async fn splice_reads_latest_assistant_turn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        tokio::fs::write(
            &path,
            "{\"role\":\"user\",\"content\":\"hi\"}\n{\"role\":\"assistant\",\"content\":\"first\"}\n{\"role\":\"assistant\",\"content\":\"second\"}\n",
        )
        .await
        .unwrap();

        let mut raw = serde_json::json!({
            "hook_event_name": "Stop",
            "transcript_path": path.to_str().unwrap(),
        });
        splice_transcript_if_needed(&mut raw).await;
        assert_eq!(raw["result"], "second");
    }
}
