use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Producer tag. Not a closed set — an implementer plugging in a new
/// upstream dialect adds a variant (or falls back to `Other`) without
/// touching the event schema. Serialises as its plain string form so the
/// wire format stays additive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    ClaudeCode,
    Codex,
    Opencode,
    Cron,
    Sandbox,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::ClaudeCode => "claude-code",
            Source::Codex => "codex",
            Source::Opencode => "opencode",
            Source::Cron => "cron",
            Source::Sandbox => "sandbox",
            Source::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "claude-code" => Source::ClaudeCode,
            "codex" => Source::Codex,
            "opencode" => Source::Opencode,
            "cron" => Source::Cron,
            "sandbox" => Source::Sandbox,
            other => Source::Other(other.to_string()),
        }
    }
}

impl Serialize for Source {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Source::parse(&s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Session,
    Message,
    Tool,
    Error,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// The canonical, atomic, immutable-once-appended event record.
///
/// Maps 1:1 to the `events` table row. `id` is assigned on normalization;
/// `timestamp` is milliseconds since epoch and is not guaranteed to be
/// monotonic per session — ties are broken by insertion order at the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: String,
    pub timestamp: i64,
    pub source: Source,
    pub category: Category,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Tool output is capped at this many serialised characters; oversize
/// payloads are replaced with a truncated prefix plus a marker that
/// preserves the original length.
pub const TOOL_OUTPUT_LIMIT: usize = 10_000;

/// Run a `toolOutput` value through the size limiter. Returns the value
/// unchanged if its serialised form is within budget, otherwise a JSON
/// string `"<first 10000 chars>... [truncated, N chars total]"`.
pub fn truncate_tool_output(value: Value) -> Value {
    let serialised = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if serialised.chars().count() <= TOOL_OUTPUT_LIMIT {
        return value;
    }
    let total = serialised.chars().count();
    let prefix: String = serialised.chars().take(TOOL_OUTPUT_LIMIT).collect();
    Value::String(format!("{prefix}... [truncated, {total} chars total]"))
}

impl Event {
    pub fn is_session_start(&self) -> bool {
        self.event_type == "session.start"
    }

    pub fn is_session_end(&self) -> bool {
        self.event_type == "session.end"
    }
}
