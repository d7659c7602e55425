//! C2 — Normalizer. A pure, stateless function:
//! `normalize(source, sessionId, rawEvent) -> Event`. Dispatch is a
//! `match` on `Source`, one arm per producer dialect module, so a new
//! producer is an additive arm plus module rather than a change to any
//! existing dialect's code.

mod claude_code;
mod codex;
mod common;
mod opencode;

use agentflow_types::{Event, Source};
use serde_json::Value;

pub use common::unknown_event;

/// Normalize one raw producer payload into a canonical `Event`. Never
/// fails — an unrecognised `source` or payload shape falls through to the
/// `system`/`meta.rawEvent` catch-all.
pub fn normalize(source: &Source, session_id: &str, raw: &Value) -> Event {
    match source {
        Source::ClaudeCode => claude_code::normalize(session_id, raw),
        Source::Codex => codex::normalize(session_id, raw),
        Source::Opencode => opencode::normalize(session_id, raw),
        other => unknown_event(other.clone(), session_id, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::Category;
    use serde_json::json;

    #[test]
    fn claude_code_full_turn_seed_scenario() {
        let raws = [
            json!({"hook_event_name": "SessionStart", "session_id": "S1"}),
            json!({"hook_event_name": "UserPromptSubmit", "session_id": "S1", "message": "fix bug"}),
            json!({"hook_event_name": "PreToolUse", "session_id": "S1", "tool_name": "Read", "tool_input": {"file_path": "a.ts"}}),
            json!({"hook_event_name": "PostToolUse", "session_id": "S1", "tool_name": "Read", "tool_output": "ok"}),
            json!({"hook_event_name": "Stop", "session_id": "S1"}),
        ];
        let types: Vec<String> = raws
            .iter()
            .map(|raw| normalize(&Source::ClaudeCode, "S1", raw).event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "session.start",
                "message.user",
                "tool.start",
                "tool.end",
                "message.assistant"
            ]
        );
    }

    #[test]
    fn unknown_source_is_total() {
        let raw = json!({"anything": true});
        let event = normalize(&Source::Other("future-cli".into()), "S1", &raw);
        assert_eq!(event.category, Category::System);
    }
}
