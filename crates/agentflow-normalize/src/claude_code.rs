//! claude-code dialect. Dispatched by `hook_event_name`; rules
//! are tried top to bottom, first match wins, and an unrecognised
//! `hook_event_name` (or its absence) falls through to the catch-all.

use agentflow_types::{Category, Event, Source};
use serde_json::Value;

use crate::common::{base_event, first_text, role_for, unknown_event, with_tool_output};

pub fn normalize(session_id: &str, raw: &Value) -> Event {
    let hook = raw.get("hook_event_name").and_then(Value::as_str);

    match hook {
        Some("SessionStart") => {
            let mut event = base_event(Source::ClaudeCode, session_id, raw);
            event.category = Category::Session;
            event.event_type = "session.start".to_string();
            event
        }
        Some("UserPromptSubmit") => {
            let mut event = base_event(Source::ClaudeCode, session_id, raw);
            event.category = Category::Message;
            event.event_type = "message.user".to_string();
            event.role = role_for("user");
            event.text = first_text(raw, &["user_message", "message", "text", "prompt"]);
            event
        }
        Some("PreToolUse") => {
            let mut event = base_event(Source::ClaudeCode, session_id, raw);
            event.category = Category::Tool;
            event.event_type = "tool.start".to_string();
            event.tool_name = first_text(raw, &["tool_name"]);
            event.tool_input = raw.get("tool_input").cloned();
            event
        }
        Some("PostToolUse") => {
            let mut event = base_event(Source::ClaudeCode, session_id, raw);
            event.category = Category::Tool;
            event.event_type = "tool.end".to_string();
            event.tool_name = first_text(raw, &["tool_name"]);
            event.tool_output = with_tool_output(raw, &["tool_response", "tool_output"]);
            event
        }
        Some("Stop") => {
            let mut event = base_event(Source::ClaudeCode, session_id, raw);
            event.category = Category::Message;
            event.event_type = "message.assistant".to_string();
            event.role = role_for("assistant");
            event.text = first_text(raw, &["result", "response"]);
            if let Some(stop_reason) = raw.get("stop_reason") {
                event.meta = Some(serde_json::json!({ "stop_reason": stop_reason }));
            }
            event
        }
        Some("SessionEnd") => {
            let mut event = base_event(Source::ClaudeCode, session_id, raw);
            event.category = Category::Session;
            event.event_type = "session.end".to_string();
            event
        }
        Some("Error") => {
            let mut event = base_event(Source::ClaudeCode, session_id, raw);
            event.category = Category::Error;
            event.event_type = "error".to_string();
            event.error = first_text(raw, &["message", "error"]);
            event
        }
        _ => unknown_event(Source::ClaudeCode, session_id, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_start() {
        let raw = json!({"hook_event_name": "SessionStart", "session_id": "S1"});
        let event = normalize("S1", &raw);
        assert_eq!(event.category, Category::Session);
        assert_eq!(event.event_type, "session.start");
    }

    #[test]
    fn user_prompt_submit_picks_first_matching_field() {
        let raw = json!({"hook_event_name": "UserPromptSubmit", "message": "fix bug"});
        let event = normalize("S1", &raw);
        assert_eq!(event.event_type, "message.user");
        assert_eq!(event.text.as_deref(), Some("fix bug"));
        assert_eq!(event.role, Some(agentflow_types::Role::User));
    }

    #[test]
    fn post_tool_use_truncates_output() {
        let big = "x".repeat(15_000);
        let raw = json!({"hook_event_name": "PostToolUse", "tool_name": "Read", "tool_output": big});
        let event = normalize("S1", &raw);
        let out = event.tool_output.unwrap();
        let s = out.as_str().unwrap();
        assert!(s.ends_with("... [truncated, 15000 chars total]"));
    }

    #[test]
    fn unmatched_hook_becomes_system_catchall() {
        let raw = json!({"hook_event_name": "SomethingNew", "foo": "bar"});
        let event = normalize("S1", &raw);
        assert_eq!(event.category, Category::System);
        assert_eq!(event.event_type, "SomethingNew");
        assert!(event.meta.unwrap().get("rawEvent").is_some());
    }
}
