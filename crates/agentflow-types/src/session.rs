use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::Source;

/// Stored status, as written by `Store::append`'s side-rules. Never
/// includes the stale-timeout rule — see `EffectiveStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredStatus {
    Active,
    Completed,
    Error,
    Archived,
}

/// Status as returned to readers: stored status overridden by the
/// stale-inactivity rule (`active` older than 120_000ms becomes
/// `completed` without mutating the stored row).
pub type EffectiveStatus = StoredStatus;

/// A session row as persisted by the store. No derived fields live here —
/// those are computed at read time, as a view over the stored row, and
/// live on `SessionView`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub source: Source,
    pub start_time: i64,
    pub last_event_time: i64,
    pub status: StoredStatus,
    pub metadata: Map<String, Value>,
    pub user_id: Option<String>,
}

/// Threshold, in milliseconds, after which an `active` session with no new
/// events reads as `completed`.
pub const STALE_TIMEOUT_MS: i64 = 120_000;

/// A session merged with fields derived at read time: `eventCount`,
/// `lastEventType`, `lastEventText`, and the effective status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub effective_status: EffectiveStatus,
    pub event_count: i64,
    pub last_event_type: Option<String>,
    pub last_event_text: Option<String>,
}

impl SessionView {
    pub fn compute_effective_status(
        stored_status: StoredStatus,
        last_event_time: i64,
        now_ms: i64,
    ) -> EffectiveStatus {
        if stored_status == StoredStatus::Active && now_ms - last_event_time > STALE_TIMEOUT_MS {
            StoredStatus::Completed
        } else {
            stored_status
        }
    }
}

/// Shallow-merge `patch` into `target`:
/// top-level keys of `patch` override `target`'s; no recursion into nested
/// objects.
pub fn shallow_merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}
