//! opencode dialect — two sub-dialects sharing one dispatch
//! table keyed by `type`: the hook-style events (`session.created`,
//! `session.idle`, `message.updated`, `message.part.updated`) emitted by
//! the opencode server, and the jsonl-style events (`step_start`,
//! `step_finish`, `text`, `tool_use`) read back from its session log.
//!
//! Both styles dispatch on the same top-level `type` tag, so one match
//! covers them; sub-dispatch on `part.type`/`state.status` resolves the
//! `message.part.updated` ambiguity between a user/assistant text update
//! and a tool-call lifecycle update.

use agentflow_types::{Category, Event, Role, Source};
use serde_json::Value;

use crate::common::{base_event, role_for, unknown_event};

pub fn normalize(session_id: &str, raw: &Value) -> Event {
    let event_type = raw.get("type").and_then(Value::as_str);

    match event_type {
        Some("session.created") => {
            let mut event = base_event(Source::Opencode, session_id, raw);
            event.category = Category::Session;
            event.event_type = "session.start".to_string();
            event
        }
        Some("session.idle") => {
            let mut event = base_event(Source::Opencode, session_id, raw);
            event.category = Category::Session;
            event.event_type = "session.end".to_string();
            event
        }
        Some("message.part.updated") => normalize_part_update(session_id, raw, raw.get("part")),
        Some("message.updated") => {
            if let Some(part) = raw
                .get("part")
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            {
                normalize_part_update(session_id, raw, Some(part))
            } else {
                let mut event = base_event(Source::Opencode, session_id, raw);
                event.category = Category::System;
                event.event_type = "message.updated".to_string();
                event.meta = Some(serde_json::json!({ "rawEvent": raw }));
                event
            }
        }
        Some("step_start") => {
            let mut event = base_event(Source::Opencode, session_id, raw);
            event.category = Category::System;
            event.event_type = "step.start".to_string();
            event
        }
        Some("step_finish") => {
            let mut event = base_event(Source::Opencode, session_id, raw);
            event.category = Category::System;
            event.event_type = "step.finish".to_string();
            event
        }
        Some("text") => {
            let mut event = base_event(Source::Opencode, session_id, raw);
            let role = text_role(raw);
            event.category = Category::Message;
            event.event_type = match role {
                Some(Role::Assistant) => "message.assistant",
                _ => "message.user",
            }
            .to_string();
            event.role = role;
            event.text = raw.get("text").and_then(Value::as_str).map(str::to_string);
            event
        }
        Some("tool_use") => {
            let mut event = base_event(Source::Opencode, session_id, raw);
            event.category = Category::Tool;
            event.tool_name = raw
                .get("tool")
                .and_then(Value::as_str)
                .map(str::to_string);
            if is_completed(raw) {
                event.event_type = "tool.end".to_string();
                event.tool_output = raw
                    .get("output")
                    .cloned()
                    .map(agentflow_types::truncate_tool_output);
            } else {
                event.event_type = "tool.start".to_string();
                event.tool_input = raw.get("input").cloned();
            }
            event
        }
        _ => unknown_event(Source::Opencode, session_id, raw),
    }
}

fn text_role(raw: &Value) -> Option<Role> {
    raw.get("_role")
        .or_else(|| raw.get("role"))
        .and_then(Value::as_str)
        .and_then(role_for)
}

fn is_completed(raw: &Value) -> bool {
    raw.get("state")
        .and_then(|s| s.get("status"))
        .and_then(Value::as_str)
        == Some("completed")
}

fn normalize_part_update(session_id: &str, raw: &Value, part: Option<&Value>) -> Event {
    let mut event = base_event(Source::Opencode, session_id, raw);
    let Some(part) = part else {
        return unknown_event(Source::Opencode, session_id, raw);
    };

    match part.get("type").and_then(Value::as_str) {
        Some("text") => {
            let role = part
                .get("_role")
                .or_else(|| part.get("role"))
                .and_then(Value::as_str)
                .and_then(role_for);
            event.category = Category::Message;
            event.event_type = match role {
                Some(Role::Assistant) => "message.assistant",
                _ => "message.user",
            }
            .to_string();
            event.role = role.or(Some(Role::User));
            event.text = part
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string);
            event
        }
        Some("tool") => {
            let status = part.get("state").and_then(|s| s.get("status")).and_then(Value::as_str);
            event.category = Category::Tool;
            event.tool_name = part.get("tool").and_then(Value::as_str).map(str::to_string);
            match status {
                Some("completed") => {
                    event.event_type = "tool.end".to_string();
                    event.tool_output = part
                        .get("state")
                        .and_then(|s| s.get("output"))
                        .cloned()
                        .map(agentflow_types::truncate_tool_output);
                }
                _ => {
                    event.event_type = "tool.start".to_string();
                    event.tool_input = part.get("state").and_then(|s| s.get("input")).cloned();
                }
            }
            event
        }
        _ => unknown_event(Source::Opencode, session_id, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn part_update_tool_running_then_completed() {
        let running = json!({
            "type": "message.part.updated",
            "part": {"id": "p1", "type": "tool", "tool": "bash", "state": {"status": "running"}}
        });
        let start = normalize("S1", &running);
        assert_eq!(start.event_type, "tool.start");

        let completed = json!({
            "type": "message.part.updated",
            "part": {"id": "p1", "type": "tool", "tool": "bash", "state": {"status": "completed", "output": "ok"}}
        });
        let end = normalize("S1", &completed);
        assert_eq!(end.event_type, "tool.end");
        assert_eq!(end.tool_output.unwrap(), json!("ok"));
    }

    #[test]
    fn part_update_text_user_role() {
        let raw = json!({
            "type": "message.part.updated",
            "part": {"type": "text", "_role": "user", "text": "hi"}
        });
        let event = normalize("S1", &raw);
        assert_eq!(event.event_type, "message.user");
        assert_eq!(event.text.as_deref(), Some("hi"));
    }

    #[test]
    fn message_updated_without_text_part_is_system() {
        let raw = json!({"type": "message.updated", "part": {"type": "tool"}});
        let event = normalize("S1", &raw);
        assert_eq!(event.category, Category::System);
    }
}
