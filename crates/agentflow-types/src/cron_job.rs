use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CronRunStatus {
    Success,
    Failed,
}

/// A user-defined scheduled job. `cron_expression` is the
/// canonical schedule used to compute the next run; `schedule_text` is a
/// human-readable echo kept only for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: Uuid,
    pub name: String,
    pub prompt: String,
    pub schedule_text: String,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub notify_slack: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_session_id: Option<String>,
    pub last_run_status: Option<CronRunStatus>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub total_runs: i64,
}
