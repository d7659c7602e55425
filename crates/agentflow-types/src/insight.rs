use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowUpCategory {
    Tooling,
    Workflow,
    Knowledge,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpAction {
    pub description: String,
    pub priority: Priority,
    pub category: FollowUpCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsightPhase {
    Preliminary,
    Refined,
    FinalNoAnswers,
}

/// One analysis artifact per (user, optional repo, time window). Immutable
/// except for in-place refinement after answers to its questions arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub user_id: String,
    pub repo: Option<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub content: String,
    pub categories: Vec<String>,
    pub follow_up_actions: Vec<FollowUpAction>,
    pub sessions_analyzed: i64,
    pub events_analyzed: i64,
    pub token_usage: Option<serde_json::Value>,
    pub phase: Option<InsightPhase>,
    pub round: u32,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub insight_id: Uuid,
    pub text: String,
    pub answer: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// Per-user watermark tracked between Insight Scheduler runs: the last
/// time this user was analyzed, and the timestamp of the last event seen
/// at that time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    pub user_id: String,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub last_event_timestamp: Option<i64>,
}

/// Max refinement rounds before an Insight is forced to `refined`.
pub const MAX_INSIGHT_ROUNDS: u32 = 3;
