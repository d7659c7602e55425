use agentflow_types::{truncate_tool_output, Event, Role, Source};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// Pull `timestamp` from the raw payload if it's numeric, else "now".
pub fn extract_timestamp(raw: &Value) -> i64 {
    raw.get("timestamp")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| Utc::now().timestamp_millis())
}

/// First non-null string field among `keys`, in order.
pub fn first_text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Skeleton with the fields every dialect rule fills in the same way:
/// a fresh id and the extracted timestamp. Each rule overrides the rest.
pub fn base_event(source: Source, session_id: &str, raw: &Value) -> Event {
    Event {
        id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        timestamp: extract_timestamp(raw),
        source,
        category: agentflow_types::Category::System,
        event_type: String::new(),
        role: None,
        text: None,
        tool_name: None,
        tool_input: None,
        tool_output: None,
        error: None,
        meta: None,
    }
}

pub fn with_tool_output(raw: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|key| raw.get(*key))
        .cloned()
        .map(truncate_tool_output)
}

pub fn role_for(role: &str) -> Option<Role> {
    match role {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

/// The total catch-all: any raw payload not matched by a dialect's rule
/// table becomes a `system` event carrying the raw payload, so the
/// Normalizer never rejects a producer message.
pub fn unknown_event(source: Source, session_id: &str, raw: &Value) -> Event {
    let mut event = base_event(source, session_id, raw);
    event.category = agentflow_types::Category::System;
    event.event_type = raw
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| raw.get("hook_event_name").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();
    event.meta = Some(serde_json::json!({ "rawEvent": raw }));
    event
}
