//! Canonical data model shared by every agentflow component: the `Event`
//! and `Session` records persisted by the store, plus the `Insight` and
//! `CronJob` artifacts produced by the two background schedulers.

pub mod cron_job;
pub mod event;
pub mod insight;
pub mod session;

pub use cron_job::{CronJob, CronRunStatus};
pub use event::{truncate_tool_output, Category, Event, Role, Source, TOOL_OUTPUT_LIMIT};
pub use insight::{
    AnalysisState, FollowUpAction, FollowUpCategory, Insight, InsightPhase, Priority, Question,
    MAX_INSIGHT_ROUNDS,
};
pub use session::{shallow_merge, EffectiveStatus, Session, SessionView, StoredStatus, STALE_TIMEOUT_MS};
