//! C5 — Query API: read endpoints plus the hook-script download and health
//! check.

use agentflow_bus::{BusMessage, Topic};
use agentflow_types::SessionView;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<SessionView>>> {
    Ok(Json(state.store.list_sessions()?))
}

#[derive(Serialize)]
pub struct SessionWithEvents {
    #[serde(flatten)]
    pub view: SessionView,
    pub events: Vec<agentflow_types::Event>,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionWithEvents>> {
    let view = state.store.get_session(&id)?.ok_or(ApiError::NotFound)?;
    let events = state.store.get_session_events(&id)?;
    Ok(Json(SessionWithEvents { view, events }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.get_session(&id)?.ok_or(ApiError::NotFound)?;
    state.store.delete_session(&id)?;
    state
        .bus
        .publish(&Topic::Global, BusMessage::session_deleted(&id));
    Ok(Json(json!({ "ok": true })))
}

pub async fn clear_all_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.clear_all()?;
    state.bus.publish(&Topic::Global, BusMessage::sessions_cleared());
    Ok(Json(json!({ "ok": true })))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct AnswerQuestionRequest {
    pub answer: String,
}

/// Records an answer to a preliminary insight's question, advancing its
/// refinement state machine. A no-op if the insight scheduler hasn't been
/// wired into this process (no analyzer configured for `serve`).
pub async fn answer_question(
    State(state): State<AppState>,
    Path((insight_id, question_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<AnswerQuestionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(scheduler) = state.insight_scheduler.get() else {
        return Err(ApiError::NotFound);
    };
    scheduler
        .answer_question(insight_id, question_id, body.answer)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// Derives the public origin from `X-Forwarded-Proto`/`Host`, falling back
/// to `http://localhost:<port>`.
fn public_origin(headers: &HeaderMap, port: u16) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    match host {
        Some(host) => {
            let proto = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("http");
            format!("{proto}://{host}")
        }
        None => format!("http://localhost:{port}"),
    }
}

pub async fn hook_script(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let origin = public_origin(&headers, state.config.port);
    let script = hook_script_template(&origin);

    let mut response = script.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        "attachment; filename=\"agentflow-hook.sh\"".parse().unwrap(),
    );
    (StatusCode::OK, response).into_response()
}

fn hook_script_template(origin: &str) -> String {
    format!(
        r#"#!/usr/bin/env bash
# agentflow ingest hook: forwards a hook-event JSON payload on stdin to
# the configured agentflow server.
set -euo pipefail

AGENT_FLOW_URL="{origin}"
SESSION_ID="${{CLAUDE_SESSION_ID:-${{AGENT_FLOW_SESSION_ID:-}}}}"
SOURCE="${{AGENT_FLOW_SOURCE:-claude-code}}"

payload="$(cat)"
body="$(printf '{{"source":"%s","sessionId":"%s","event":%s}}' "$SOURCE" "$SESSION_ID" "$payload")"

curl -sS -X POST "$AGENT_FLOW_URL/api/ingest" \
  -H "Content-Type: application/json" \
  -H "x-api-key: ${{AGENT_FLOW_API_KEY:-}}" \
  -d "$body" > /dev/null
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use tower::ServiceExt;

    fn scripted_scheduler(state: &AppState) -> std::sync::Arc<crate::insight::InsightScheduler> {
        let outcome = crate::insight::AnalysisOutcome {
            summary: "s".to_string(),
            user_intent: "debugging".to_string(),
            frustration_points: vec![],
            improvements: vec![],
            follow_up_actions: vec![],
            questions: vec![],
            token_usage: None,
        };
        std::sync::Arc::new(crate::insight::InsightScheduler::new(
            state,
            std::sync::Arc::new(crate::insight::ScriptedAnalyzer {
                initial: outcome.clone(),
                refinement: outcome,
            }),
        ))
    }

    fn test_state() -> AppState {
        let store: std::sync::Arc<dyn agentflow_store::Store> =
            std::sync::Arc::new(agentflow_store::SqliteStore::open_in_memory().unwrap());
        AppState::new(store, crate::config::AppConfig {
            port: 3333,
            db_path: "agent-flow.db".into(),
            auth_secret: None,
            allowed_email_domains: vec![],
            public_url: None,
        })
    }

    #[tokio::test]
    async fn answer_question_without_scheduler_is_not_found() {
        let state = test_state();
        state.api_keys.issue("agentflow_validkey", "user-1");
        let router = crate::router::build_router(state);
        let request = Request::builder()
            .method("POST")
            .uri(format!(
                "/api/insights/{}/questions/{}/answer",
                uuid::Uuid::new_v4(),
                uuid::Uuid::new_v4()
            ))
            .header("content-type", "application/json")
            .header("x-api-key", "agentflow_validkey")
            .body(Body::from(r#"{"answer":"Read"}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn answer_question_with_scheduler_updates_insight() {
        let state = test_state();
        state.api_keys.issue("agentflow_validkey", "user-1");

        let insight_id = uuid::Uuid::new_v4();
        let question_id = uuid::Uuid::new_v4();
        let insight = agentflow_types::Insight {
            id: insight_id,
            user_id: "user-1".to_string(),
            repo: None,
            window_start: chrono::Utc::now(),
            window_end: chrono::Utc::now(),
            content: "c".to_string(),
            categories: vec![],
            follow_up_actions: vec![],
            sessions_analyzed: 1,
            events_analyzed: 5,
            token_usage: None,
            phase: Some(agentflow_types::InsightPhase::Preliminary),
            round: 0,
            questions: vec![agentflow_types::Question {
                id: question_id,
                insight_id,
                text: "what tool?".to_string(),
                answer: None,
                answered_at: None,
            }],
        };
        state.store.upsert_insight(&insight).unwrap();
        state.set_insight_scheduler(scripted_scheduler(&state));

        let router = crate::router::build_router(state.clone());
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/insights/{insight_id}/questions/{question_id}/answer"))
            .header("content-type", "application/json")
            .header("x-api-key", "agentflow_validkey")
            .body(Body::from(r#"{"answer":"Read"}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let updated = state.store.get_insight(insight_id).unwrap().unwrap();
        assert_eq!(updated.phase, Some(agentflow_types::InsightPhase::Refined));
    }

    #[test]
    fn origin_from_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("agentflow.example.com"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(public_origin(&headers, 3333), "https://agentflow.example.com");
    }

    #[test]
    fn origin_falls_back_to_localhost() {
        let headers = HeaderMap::new();
        assert_eq!(public_origin(&headers, 4000), "http://localhost:4000");
    }

    #[test]
    fn hook_script_embeds_origin() {
        let script = hook_script_template("http://localhost:3333");
        assert!(script.contains("http://localhost:3333"));
        assert!(script.contains("/api/ingest"));
    }
}
