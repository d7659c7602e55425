//! codex dialect. Dispatched by `event.type`, with a
//! sub-dispatch on `event.item.type` for the `item.started`/`item.completed`
//! envelope events.

use agentflow_types::{truncate_tool_output, Category, Event, Role, Source};
use serde_json::Value;

use crate::common::{base_event, unknown_event};

pub fn normalize(session_id: &str, raw: &Value) -> Event {
    let event_type = raw.get("type").and_then(Value::as_str);

    match event_type {
        Some("thread.started") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::Session;
            event.event_type = "session.start".to_string();
            event
        }
        Some("turn.started") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::System;
            event.event_type = "turn.start".to_string();
            event
        }
        Some("turn.completed") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::Session;
            event.event_type = "session.end".to_string();
            event
        }
        Some("item.started") => normalize_item_started(session_id, raw),
        Some("item.completed") => normalize_item_completed(session_id, raw),
        Some("error") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::Error;
            event.event_type = "error".to_string();
            event.error = raw
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
            event
        }
        _ => unknown_event(Source::Codex, session_id, raw),
    }
}

fn item(raw: &Value) -> &Value {
    raw.get("item").unwrap_or(&Value::Null)
}

fn normalize_item_started(session_id: &str, raw: &Value) -> Event {
    let item = item(raw);
    let item_type = item.get("type").and_then(Value::as_str);

    match item_type {
        Some("command_execution") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::Tool;
            event.event_type = "tool.start".to_string();
            event.tool_name = Some("command_execution".to_string());
            event.tool_input = item.get("command").cloned();
            event
        }
        Some("file_change") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::Tool;
            event.event_type = "tool.start".to_string();
            event.tool_name = Some("file_change".to_string());
            event.tool_input = Some(serde_json::json!({
                "file": item.get("file"),
                "patch": item.get("patch"),
            }));
            event
        }
        Some("agent_message") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::Message;
            event.event_type = "message.assistant".to_string();
            event.role = Some(Role::Assistant);
            event.text = item
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string);
            event
        }
        _ => unknown_event(Source::Codex, session_id, raw),
    }
}

fn normalize_item_completed(session_id: &str, raw: &Value) -> Event {
    let item = item(raw);
    let item_type = item.get("type").and_then(Value::as_str);

    match item_type {
        Some("command_execution") | Some("file_change") => {
            let mut event = base_event(Source::Codex, session_id, raw);
            event.category = Category::Tool;
            event.event_type = "tool.end".to_string();
            event.tool_name = item_type.map(str::to_string);
            event.tool_output = item.get("output").cloned().map(truncate_tool_output);
            event
        }
        _ => unknown_event(Source::Codex, session_id, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_turn_produces_expected_type_sequence() {
        let events = [
            json!({"type": "thread.started"}),
            json!({"type": "turn.started"}),
            json!({"type": "item.started", "item": {"type": "command_execution", "command": "ls"}}),
            json!({"type": "item.completed", "item": {"type": "command_execution", "output": "a\nb"}}),
            json!({"type": "turn.completed"}),
        ];
        let types: Vec<String> = events.iter().map(|e| normalize("S1", e).event_type).collect();
        assert_eq!(
            types,
            vec!["session.start", "turn.start", "tool.start", "tool.end", "session.end"]
        );
    }

    #[test]
    fn tool_end_carries_truncated_output() {
        let raw = json!({"type": "item.completed", "item": {"type": "command_execution", "output": "a\nb"}});
        let event = normalize("S1", &raw);
        assert_eq!(event.tool_output.unwrap(), json!("a\nb"));
    }
}
