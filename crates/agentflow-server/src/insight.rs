//! C8 — Insight Scheduler: the periodic user-scoped batch analyzer.
//! `protect` mode is a single `AtomicBool` guarding the whole run
//! (generalized from agtrace-runtime's token-usage monitor cooldown
//! pattern — "skip this tick if a run is still in flight" rather than a
//! per-resource cooldown timer).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentflow_bus::{BusMessage, Topic};
use agentflow_types::{
    FollowUpAction, Insight, InsightPhase, Question, MAX_INSIGHT_ROUNDS,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default cadence between scheduler runs.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60 * 60);
/// Minimum new events before a user's activity is analyzed.
pub const DEFAULT_EVENT_THRESHOLD: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub user_id: String,
    pub events_since_last_run: i64,
}

/// The fixed-schema analyzer output.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisOutcome {
    pub summary: String,
    pub user_intent: String,
    #[serde(default)]
    pub frustration_points: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub follow_up_actions: Vec<FollowUpAction>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub token_usage: Option<serde_json::Value>,
}

/// The external tool-calling chat client. Both
/// methods are boxed futures rather than `async fn` so the trait stays
/// object-safe without pulling in an extra async-trait dependency.
pub trait Analyzer: Send + Sync {
    fn analyze<'a>(&'a self, request: &'a AnalysisRequest) -> BoxFuture<'a, AnalysisOutcome>;
    fn refine<'a>(&'a self, insight: &'a Insight) -> BoxFuture<'a, AnalysisOutcome>;
}

/// Deterministic test double: returns pre-scripted outcomes without any
/// network round-trip, so the scheduler's state machine can be exercised
/// in the test suite.
pub struct ScriptedAnalyzer {
    pub initial: AnalysisOutcome,
    pub refinement: AnalysisOutcome,
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze<'a>(&'a self, _request: &'a AnalysisRequest) -> BoxFuture<'a, AnalysisOutcome> {
        let outcome = self.initial.clone();
        Box::pin(async move { outcome })
    }

    fn refine<'a>(&'a self, _insight: &'a Insight) -> BoxFuture<'a, AnalysisOutcome> {
        let outcome = self.refinement.clone();
        Box::pin(async move { outcome })
    }
}

/// Placeholder used when `serve` is started without a real external
/// analyzer wired in (the analyzer is an external collaborator, out of
/// scope for this core). Reports no questions, so no insight ever
/// leaves the `final-no-answers`-free happy path; an operator plugs in a
/// real `Analyzer` to get meaningful output.
pub struct NoopAnalyzer;

impl Analyzer for NoopAnalyzer {
    fn analyze<'a>(&'a self, _request: &'a AnalysisRequest) -> BoxFuture<'a, AnalysisOutcome> {
        Box::pin(async {
            AnalysisOutcome {
                summary: String::new(),
                user_intent: String::new(),
                frustration_points: vec![],
                improvements: vec![],
                follow_up_actions: vec![],
                questions: vec![],
                token_usage: None,
            }
        })
    }

    fn refine<'a>(&'a self, _insight: &'a Insight) -> BoxFuture<'a, AnalysisOutcome> {
        Box::pin(async {
            AnalysisOutcome {
                summary: String::new(),
                user_intent: String::new(),
                frustration_points: vec![],
                improvements: vec![],
                follow_up_actions: vec![],
                questions: vec![],
                token_usage: None,
            }
        })
    }
}

pub struct InsightScheduler {
    store: Arc<dyn agentflow_store::Store>,
    bus: Arc<agentflow_bus::EventBus>,
    analyzer: Arc<dyn Analyzer>,
    event_threshold: i64,
    running: AtomicBool,
}

impl InsightScheduler {
    /// Takes `store`/`bus` rather than a whole `AppState` so `AppState`
    /// itself can hold an `Arc<InsightScheduler>` (for the answer-question
    /// route) without an ownership cycle.
    pub fn new(state: &AppState, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            store: state.store.clone(),
            bus: state.bus.clone(),
            analyzer,
            event_threshold: DEFAULT_EVENT_THRESHOLD,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_event_threshold(mut self, threshold: i64) -> Self {
        self.event_threshold = threshold;
        self
    }

    /// Drives `run_once` on `interval`, skipping ticks while a run is
    /// still in flight.
    pub async fn run_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("insight run skipped: previous run still in flight");
            return;
        }

        self.run_once_inner().await;

        self.running.store(false, Ordering::SeqCst);
    }

    /// Users are processed independently: a store error analyzing one user
    /// is captured, logged, and published as `insight:error` for that user
    /// rather than aborting the whole run.
    async fn run_once_inner(&self) {
        let users = match self.store.distinct_users_with_activity() {
            Ok(users) => users,
            Err(err) => {
                warn!(%err, "insight run failed: could not list active users");
                return;
            }
        };

        for user_id in users {
            if let Err(err) = self.process_user(&user_id).await {
                warn!(%err, user_id, "insight run failed for user");
                self.bus
                    .publish(&Topic::Global, BusMessage::insight_error(&user_id, &err.to_string()));
            }
        }
    }

    async fn process_user(&self, user_id: &str) -> Result<(), agentflow_store::Error> {
        let last_event_timestamp = self
            .store
            .get_analysis_state(user_id)?
            .and_then(|s| s.last_event_timestamp);
        let count = self.store.count_events_since(user_id, last_event_timestamp)?;

        if count < self.event_threshold {
            return Ok(());
        }

        self.analyze_user(user_id, count, last_event_timestamp).await
    }

    async fn analyze_user(
        &self,
        user_id: &str,
        events_since_last_run: i64,
        since_ms: Option<i64>,
    ) -> Result<(), agentflow_store::Error> {
        let request = AnalysisRequest {
            user_id: user_id.to_string(),
            events_since_last_run,
        };
        let outcome = self.analyzer.analyze(&request).await;
        let now = Utc::now();

        let insight_id = Uuid::new_v4();
        let questions = outcome
            .questions
            .iter()
            .map(|text| Question {
                id: Uuid::new_v4(),
                insight_id,
                text: text.clone(),
                answer: None,
                answered_at: None,
            })
            .collect::<Vec<_>>();

        // A question can only be answered if something is connected to see it;
        // a live subscriber on the global topic is that downstream channel.
        let has_question_channel = self.bus.subscriber_count(&Topic::Global) > 0;
        let phase = if questions.is_empty() {
            None
        } else if has_question_channel {
            Some(InsightPhase::Preliminary)
        } else {
            Some(InsightPhase::FinalNoAnswers)
        };

        let sessions_analyzed = self
            .store
            .count_distinct_sessions_since(user_id, since_ms)
            .unwrap_or(0);

        let insight = Insight {
            id: insight_id,
            user_id: user_id.to_string(),
            repo: None,
            window_start: now,
            window_end: now,
            content: outcome.summary.clone(),
            categories: vec![outcome.user_intent.clone()],
            follow_up_actions: outcome.follow_up_actions.clone(),
            sessions_analyzed,
            events_analyzed: events_since_last_run,
            token_usage: outcome.token_usage.clone(),
            phase,
            round: 0,
            questions,
        };

        self.store.upsert_insight(&insight)?;
        self.store.put_analysis_state(&agentflow_types::AnalysisState {
            user_id: user_id.to_string(),
            last_analyzed_at: Some(now),
            last_event_timestamp: Some(now.timestamp_millis()),
        })?;

        self.bus
            .publish(&Topic::Global, BusMessage::insight_new(&insight));
        info!(user_id, insight_id = %insight_id, "insight produced");
        Ok(())
    }

    /// Records an answer to one of an insight's questions; once every
    /// question on the insight has an answer, re-invokes the analyzer in
    /// refinement mode, advancing the state machine
    /// (`preliminary -> preliminary(round+1) -> ... -> refined`, capped at
    /// `MAX_INSIGHT_ROUNDS`).
    pub async fn answer_question(
        &self,
        insight_id: Uuid,
        question_id: Uuid,
        answer: String,
    ) -> Result<(), agentflow_store::Error> {
        let Some(mut insight) = self.store.get_insight(insight_id)? else {
            return Ok(());
        };

        let now = Utc::now();
        for question in insight.questions.iter_mut() {
            if question.id == question_id {
                question.answer = Some(answer.clone());
                question.answered_at = Some(now);
            }
        }

        let all_answered = !insight.questions.is_empty()
            && insight.questions.iter().all(|q| q.answer.is_some());

        if all_answered {
            let outcome = self.analyzer.refine(&insight).await;
            insight.content = outcome.summary.clone();
            insight.follow_up_actions = outcome.follow_up_actions.clone();
            insight.round += 1;

            if outcome.questions.is_empty() || insight.round >= MAX_INSIGHT_ROUNDS {
                insight.phase = Some(InsightPhase::Refined);
                insight.questions.clear();
            } else {
                insight.phase = Some(InsightPhase::Preliminary);
                insight.questions = outcome
                    .questions
                    .iter()
                    .map(|text| Question {
                        id: Uuid::new_v4(),
                        insight_id,
                        text: text.clone(),
                        answer: None,
                        answered_at: None,
                    })
                    .collect();
            }
        }

        self.store.upsert_insight(&insight)?;
        self.bus
            .publish(&Topic::Global, BusMessage::insight_updated(&insight));
        Ok(())
    }
}
