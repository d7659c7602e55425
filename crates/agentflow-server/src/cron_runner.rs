//! C9 — Cron Runner: user-defined scheduled jobs that execute as synthetic
//! sessions emitted onto the bus exactly like ingest events.
//! Uses the real `cron` crate to parse `cronExpression` and compute the
//! next run.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow_bus::{BusMessage, Topic};
use agentflow_types::{Category, CronJob, CronRunStatus, Event, Role, Source};
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::insight::BoxFuture;
use crate::state::AppState;

/// Hard cap on tool-call iterations per cron run.
pub const MAX_ITERATIONS: usize = 15;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
}

pub enum ChatStepOutcome {
    ToolCalls(Vec<ToolCall>),
    FinalMessage(String),
    Error(String),
}

/// The external tool-calling chat client, playing the same role as
/// `Analyzer` does for the insight scheduler, reused here for the cron
/// prompt loop. A deterministic test double drives the runner's tests
/// without any network round-trip.
pub trait ChatClient: Send + Sync {
    fn step<'a>(&'a self, conversation: &'a [ChatMessage]) -> BoxFuture<'a, ChatStepOutcome>;
}

/// The whitelisted tool surface a cron job's chat client may call. Handing
/// a chat client raw SQL access to the store is a needless injection
/// surface, so this implementation restricts the tool to a fixed set of
/// read operations over `Store` (documented in DESIGN.md).
fn dispatch_tool(state: &AppState, call: &ToolCall) -> Value {
    match call.name.as_str() {
        "list_sessions" => match state.store.list_sessions() {
            Ok(sessions) => serde_json::to_value(sessions).unwrap_or(Value::Null),
            Err(err) => json!({ "error": err.to_string() }),
        },
        "get_session" => {
            let id = call.input.get("sessionId").and_then(Value::as_str);
            match id {
                Some(id) => match state.store.get_session(id) {
                    Ok(Some(session)) => serde_json::to_value(session).unwrap_or(Value::Null),
                    Ok(None) => json!({ "error": "not found" }),
                    Err(err) => json!({ "error": err.to_string() }),
                },
                None => json!({ "error": "sessionId is required" }),
            }
        }
        other => json!({ "error": format!("unknown tool: {other}") }),
    }
}

/// Placeholder used when `serve` is started without a real external chat
/// client wired in (the tool-calling chat client is an external
/// collaborator). Immediately finishes every job with a fixed message so
/// the runner's scheduling and bookkeeping still exercise end to end.
pub struct NoopChatClient;

impl ChatClient for NoopChatClient {
    fn step<'a>(&'a self, _conversation: &'a [ChatMessage]) -> BoxFuture<'a, ChatStepOutcome> {
        Box::pin(async {
            ChatStepOutcome::FinalMessage(
                "no external chat client configured for this run".to_string(),
            )
        })
    }
}

pub struct CronRunner {
    state: AppState,
    chat_client: Arc<dyn ChatClient>,
    running: Mutex<HashSet<Uuid>>,
}

impl CronRunner {
    pub fn new(state: AppState, chat_client: Arc<dyn ChatClient>) -> Self {
        Self {
            state,
            chat_client,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Polls enabled jobs whose `next_run_at` has elapsed every `poll`
    /// interval (this runner does not keep a sleeping timer per job —
    /// polling is simpler to reason about and cheap at cron granularity).
    pub async fn run_loop(self: Arc<Self>, poll: Duration) {
        let mut ticker = tokio::time::interval(poll);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let jobs = match self.state.store.list_cron_jobs() {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(%err, "cron runner failed to list jobs");
                return;
            }
        };
        let now = Utc::now();
        for job in jobs {
            if !job.enabled {
                continue;
            }
            let due = job.next_run_at.map(|t| t <= now).unwrap_or(true);
            if due {
                self.trigger(job).await;
            }
        }
    }

    /// Runs a job immediately, bypassing its schedule but not the overlap
    /// guard bypasses the schedule but
    /// not the overlap guard").
    pub async fn trigger(&self, job: CronJob) {
        if !self.running.lock().expect("cron running-set poisoned").insert(job.id) {
            info!(job_id = %job.id, "cron run skipped: already in flight");
            return;
        }

        let result = self.execute(&job).await;

        self.running.lock().expect("cron running-set poisoned").remove(&job.id);

        let (status, session_id) = match result {
            Ok(session_id) => (CronRunStatus::Success, session_id),
            Err(session_id) => (CronRunStatus::Failed, session_id),
        };

        let next_run_at = compute_next_run(&job.cron_expression, &job.timezone);

        if let Err(err) = self
            .state
            .store
            .record_cron_run(job.id, status, &session_id, next_run_at)
        {
            error!(%err, job_id = %job.id, "failed to record cron run");
        }
        self.state
            .bus
            .publish(&Topic::Global, BusMessage::cron_run(job.id, &session_id));
    }

    /// Returns `Ok(session_id)` on a clean run, `Err(session_id)` if an
    /// `error` event was emitted and the run should be recorded as failed.
    async fn execute(&self, job: &CronJob) -> Result<String, String> {
        let session_id = format!("cron-{}-{}", job.id, Utc::now().timestamp_millis());

        self.emit(
            &session_id,
            Category::Session,
            "session.start",
            None,
            None,
            Some(json!({
                "title": job.name,
                "cronJob": { "id": job.id, "name": job.name, "schedule": job.schedule_text },
            })),
        );

        self.emit(
            &session_id,
            Category::Message,
            "message.user",
            Some(Role::User),
            Some(job.prompt.clone()),
            None,
        );

        let mut conversation = vec![ChatMessage {
            role: "user",
            content: job.prompt.clone(),
        }];

        let mut failed = false;
        for _ in 0..MAX_ITERATIONS {
            match self.chat_client.step(&conversation).await {
                ChatStepOutcome::ToolCalls(calls) => {
                    for call in calls {
                        self.emit_tool_start(&session_id, &call);
                        let output = dispatch_tool(&self.state, &call);
                        let truncated = agentflow_types::truncate_tool_output(output.clone());
                        self.emit(
                            &session_id,
                            Category::Tool,
                            "tool.end",
                            None,
                            None,
                            Some(json!({ "toolName": call.name, "toolOutput": truncated })),
                        );
                        conversation.push(ChatMessage {
                            role: "tool",
                            content: truncated.to_string(),
                        });
                    }
                }
                ChatStepOutcome::FinalMessage(text) => {
                    self.emit(
                        &session_id,
                        Category::Message,
                        "message.assistant",
                        Some(Role::Assistant),
                        Some(text),
                        None,
                    );
                    break;
                }
                ChatStepOutcome::Error(message) => {
                    self.emit_error(&session_id, &message);
                    failed = true;
                    break;
                }
            }
        }

        self.emit(&session_id, Category::Session, "session.end", None, None, None);

        if failed {
            Err(session_id)
        } else {
            Ok(session_id)
        }
    }

    fn emit_error(&self, session_id: &str, message: &str) {
        let event = Event {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            source: Source::Cron,
            category: Category::Error,
            event_type: "error".to_string(),
            role: None,
            text: None,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            error: Some(message.to_string()),
            meta: None,
        };
        if let Err(err) = self.state.store.append(&event) {
            error!(%err, session_id, "cron runner failed to append error event");
            return;
        }
        self.state
            .bus
            .publish(&Topic::Session(session_id.to_string()), BusMessage::event(&event));
    }

    fn emit_tool_start(&self, session_id: &str, call: &ToolCall) {
        self.emit(
            session_id,
            Category::Tool,
            "tool.start",
            None,
            None,
            Some(json!({ "toolName": call.name, "toolInput": call.input })),
        );
    }

    fn emit(
        &self,
        session_id: &str,
        category: Category,
        event_type: &str,
        role: Option<Role>,
        text: Option<String>,
        meta: Option<Value>,
    ) {
        let event = Event {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            source: Source::Cron,
            category,
            event_type: event_type.to_string(),
            role,
            text,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            error: None,
            meta,
        };

        if let Err(err) = self.state.store.append(&event) {
            error!(%err, session_id, event_type, "cron runner failed to append event");
            return;
        }
        self.state
            .bus
            .publish(&Topic::Session(session_id.to_string()), BusMessage::event(&event));
        if let Ok(Some(session)) = self.state.store.get_session(session_id) {
            self.state
                .bus
                .publish(&Topic::Global, BusMessage::session_update(&session));
        }
    }
}

/// Computes `next_run_at` for a freshly-created or edited job, so it is
/// populated before the first scheduler tick sees it. `cron_expression` is
/// evaluated in `timezone` (falling back to UTC if it doesn't parse), then
/// the resulting occurrence is converted back to UTC for storage.
pub fn compute_next_run(cron_expression: &str, timezone: &str) -> Option<chrono::DateTime<Utc>> {
    let schedule = Schedule::from_str(cron_expression).ok()?;
    match timezone.parse::<Tz>() {
        Ok(tz) => schedule
            .upcoming(tz)
            .next()
            .map(|dt| dt.with_timezone(&Utc)),
        Err(_) => {
            warn!(timezone, "cron job timezone did not parse, evaluating schedule as UTC");
            schedule.upcoming(Utc).next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_auth::Admission;
    use agentflow_store::SqliteStore;

    fn test_state() -> AppState {
        let store: Arc<dyn agentflow_store::Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        AppState {
            store,
            bus: Arc::new(agentflow_bus::EventBus::new()),
            admission: Arc::new(Admission::new(vec![])),
            api_keys: Arc::new(agentflow_auth::ApiKeyVerifier::new()),
            sessions: Arc::new(agentflow_auth::SessionCookieVerifier::new()),
            config: Arc::new(crate::config::AppConfig {
                port: 3333,
                db_path: "agent-flow.db".into(),
                auth_secret: None,
                allowed_email_domains: vec![],
                public_url: None,
            }),
            insight_scheduler: Arc::new(std::sync::OnceLock::new()),
        }
    }

    fn sample_job() -> CronJob {
        CronJob {
            id: Uuid::new_v4(),
            name: "nightly summary".to_string(),
            prompt: "summarize today's sessions".to_string(),
            schedule_text: "every day at midnight".to_string(),
            cron_expression: "0 0 0 * * * *".to_string(),
            timezone: "UTC".to_string(),
            enabled: true,
            notify_slack: false,
            last_run_at: None,
            last_run_session_id: None,
            last_run_status: None,
            next_run_at: None,
            total_runs: 0,
        }
    }

    struct ImmediateFinish;

    impl ChatClient for ImmediateFinish {
        fn step<'a>(&'a self, _conversation: &'a [ChatMessage]) -> BoxFuture<'a, ChatStepOutcome> {
            Box::pin(async { ChatStepOutcome::FinalMessage("done".to_string()) })
        }
    }

    struct OneToolThenFinish;

    impl ChatClient for OneToolThenFinish {
        fn step<'a>(&'a self, conversation: &'a [ChatMessage]) -> BoxFuture<'a, ChatStepOutcome> {
            let already_called_tool = conversation.iter().any(|m| m.role == "tool");
            Box::pin(async move {
                if already_called_tool {
                    ChatStepOutcome::FinalMessage("summary ready".to_string())
                } else {
                    ChatStepOutcome::ToolCalls(vec![ToolCall {
                        name: "list_sessions".to_string(),
                        input: json!({}),
                    }])
                }
            })
        }
    }

    #[tokio::test]
    async fn run_emits_full_synthetic_session_and_records_run() {
        let state = test_state();
        let job = sample_job();
        state.store.upsert_cron_job(&job).unwrap();

        let runner = CronRunner::new(state.clone(), Arc::new(ImmediateFinish));
        runner.trigger(job.clone()).await;

        let stored = state.store.get_cron_job(job.id).unwrap().unwrap();
        assert_eq!(stored.total_runs, 1);
        assert_eq!(stored.last_run_status, Some(CronRunStatus::Success));
        let session_id = stored.last_run_session_id.unwrap();

        let events = state.store.get_session_events(&session_id).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["session.start", "message.user", "message.assistant", "session.end"]
        );
    }

    #[tokio::test]
    async fn overlap_guard_skips_concurrent_trigger() {
        let state = test_state();
        let runner = Arc::new(CronRunner::new(state.clone(), Arc::new(ImmediateFinish)));
        let job = sample_job();
        runner.running.lock().unwrap().insert(job.id);

        runner.trigger(job.clone()).await;

        // trigger() should have returned immediately without clearing the
        // guard we inserted, since execute() never ran.
        assert!(runner.running.lock().unwrap().contains(&job.id));
        runner.running.lock().unwrap().remove(&job.id);
    }

    #[tokio::test]
    async fn tool_call_loop_terminates_on_final_message() {
        let state = test_state();
        let runner = CronRunner::new(state.clone(), Arc::new(OneToolThenFinish));
        let result = runner.execute(&sample_job()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn compute_next_run_parses_valid_expression() {
        assert!(compute_next_run("0 0 0 * * * *", "UTC").is_some());
    }

    #[test]
    fn compute_next_run_rejects_invalid_expression() {
        assert!(compute_next_run("not a cron expression", "UTC").is_none());
    }

    #[test]
    fn compute_next_run_falls_back_to_utc_on_bad_timezone() {
        assert!(compute_next_run("0 0 0 * * * *", "not/a/zone").is_some());
    }

    #[test]
    fn compute_next_run_honors_job_timezone() {
        // New York is behind UTC, so a midnight-local occurrence lands on a
        // later UTC wall-clock hour than a midnight-UTC occurrence would.
        let utc_run = compute_next_run("0 0 0 * * * *", "UTC").unwrap();
        let ny_run = compute_next_run("0 0 0 * * * *", "America/New_York").unwrap();
        assert_ne!(utc_run, ny_run);
    }
}
