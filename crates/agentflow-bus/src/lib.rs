//! C3 — EventBus: in-process publish/subscribe with per-session rooms plus
//! a global channel. Uses `tokio::sync::broadcast` fan-out per logical
//! channel, generalized to one channel per topic created lazily.
//!
//! The bus exposes only `publish`/`subscribe` — callers never see
//! `tokio::sync::broadcast` directly, so the transport can be swapped
//! without touching C4/C6/C8/C9.

use std::collections::HashMap;
use std::sync::Mutex;

use agentflow_types::{Event, Insight, SessionView};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Session(String),
    Global,
}

impl Topic {
    fn key(&self) -> String {
        match self {
            Topic::Session(id) => format!("session:{id}"),
            Topic::Global => "global".to_string(),
        }
    }
}

/// A message carried on a topic. `name` is the wire event name the
/// realtime gateway forwards it under; `payload` is whatever that event
/// carries.
#[derive(Debug, Clone, Serialize)]
pub struct BusMessage {
    pub name: &'static str,
    pub payload: serde_json::Value,
}

impl BusMessage {
    pub fn event(event: &Event) -> Self {
        Self {
            name: "event",
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn session_update(session: &SessionView) -> Self {
        Self {
            name: "session:update",
            payload: serde_json::to_value(session).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn session_deleted(session_id: &str) -> Self {
        Self {
            name: "session:deleted",
            payload: serde_json::json!({ "sessionId": session_id }),
        }
    }

    pub fn sessions_cleared() -> Self {
        Self {
            name: "sessions:cleared",
            payload: serde_json::Value::Null,
        }
    }

    pub fn insight_new(insight: &Insight) -> Self {
        Self {
            name: "insight:new",
            payload: serde_json::to_value(insight).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn insight_updated(insight: &Insight) -> Self {
        Self {
            name: "insight:updated",
            payload: serde_json::to_value(insight).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn insight_error(user_id: &str, message: &str) -> Self {
        Self {
            name: "insight:error",
            payload: serde_json::json!({ "userId": user_id, "message": message }),
        }
    }

    pub fn cron_run(job_id: Uuid, session_id: &str) -> Self {
        Self {
            name: "cron:run",
            payload: serde_json::json!({ "jobId": job_id, "sessionId": session_id }),
        }
    }
}

/// A live subscription to one topic. Delivery is best-effort: if a
/// subscriber falls too far behind the channel's ring buffer, the oldest
/// unread messages are dropped and `recv` resumes from what remains —
/// publishers never block on subscribers.
pub struct Subscription {
    rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, dropping missed messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Capability-style pub/sub: `publish(topic, msg)` / `subscribe(topic)`.
/// Subscribe/unsubscribe (a `Subscription` simply being dropped) may race
/// freely with publish.
pub struct EventBus {
    channels: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &Topic) -> broadcast::Sender<BusMessage> {
        let mut channels = self.channels.lock().expect("bus mutex poisoned");
        channels
            .entry(topic.key())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish never blocks on subscribers and never fails when there are
    /// none — a topic with no subscribers simply drops the message.
    pub fn publish(&self, topic: &Topic, msg: BusMessage) {
        let sender = self.sender_for(topic);
        let _ = sender.send(msg);
    }

    pub fn subscribe(&self, topic: &Topic) -> Subscription {
        let sender = self.sender_for(topic);
        Subscription {
            rx: sender.subscribe(),
        }
    }

    /// How many live subscriptions a topic currently has. Lets a publisher
    /// decide whether there is anyone downstream to deliver to before
    /// committing to a delivery-dependent state (e.g. whether a question
    /// asked via this topic could ever be answered).
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let channels = self.channels.lock().expect("bus mutex poisoned");
        channels
            .get(&topic.key())
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

pub use agentflow_types::SessionView as SessionSummary;
