use agentflow_store::{SqliteStore, Store};
use agentflow_types::{Category, Event, Role, Source, StoredStatus};
use uuid::Uuid;

fn event(session_id: &str, timestamp: i64, category: Category, event_type: &str) -> Event {
    Event {
        id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        timestamp,
        source: Source::ClaudeCode,
        category,
        event_type: event_type.to_string(),
        role: None,
        text: None,
        tool_name: None,
        tool_input: None,
        tool_output: None,
        error: None,
        meta: None,
    }
}

#[test]
fn session_lazy_creation() {
    let store = SqliteStore::open_in_memory().unwrap();
    let e = event("S1", 1_000, Category::Session, "session.start");
    store.append(&e).unwrap();

    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.session.start_time, 1_000);
    assert_eq!(session.session.last_event_time, 1_000);
    assert_eq!(session.session.status, StoredStatus::Active);
}

#[test]
fn append_ordering_is_non_decreasing() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&event("S1", 500, Category::Message, "message.user")).unwrap();
    store.append(&event("S1", 100, Category::Message, "message.assistant")).unwrap();
    store.append(&event("S1", 900, Category::Tool, "tool.start")).unwrap();

    let events = store.get_session_events("S1").unwrap();
    let timestamps: Vec<i64> = events.iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![100, 500, 900]);
}

#[test]
fn error_category_raises_stored_status() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&event("S1", 1, Category::Session, "session.start")).unwrap();
    store.append(&event("S1", 2, Category::Error, "error")).unwrap();

    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.session.status, StoredStatus::Error);
}

#[test]
fn session_end_then_reactivation() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&event("S1", 1, Category::Session, "session.start")).unwrap();
    store.append(&event("S1", 2, Category::Session, "session.end")).unwrap();

    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.session.status, StoredStatus::Completed);

    store.append(&event("S1", 3, Category::Message, "message.user")).unwrap();
    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.session.status, StoredStatus::Active);
}

#[test]
fn stale_active_session_reads_completed_without_mutating_stored_status() {
    let store = SqliteStore::open_in_memory().unwrap();
    let old_ts = chrono::Utc::now().timestamp_millis() - 200_000;
    store.append(&event("S1", old_ts, Category::Session, "session.start")).unwrap();

    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.effective_status, StoredStatus::Completed);
    assert_eq!(session.session.status, StoredStatus::Active);
}

#[test]
fn update_session_meta_shallow_merges() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&event("S1", 1, Category::Session, "session.start")).unwrap();

    let mut patch = serde_json::Map::new();
    patch.insert("git".to_string(), serde_json::json!({"branch": "main"}));
    store.update_session_meta("S1", &patch).unwrap();

    let mut patch2 = serde_json::Map::new();
    patch2.insert("user".to_string(), serde_json::json!({"name": "ana"}));
    store.update_session_meta("S1", &patch2).unwrap();

    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.session.metadata.get("git").unwrap()["branch"], "main");
    assert_eq!(session.session.metadata.get("user").unwrap()["name"], "ana");
}

#[test]
fn set_session_user_assigns_owner() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&event("S1", 1, Category::Session, "session.start")).unwrap();

    store.set_session_user("S1", "user-42").unwrap();

    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.session.user_id.as_deref(), Some("user-42"));
}

#[test]
fn set_session_user_on_unknown_session_errors() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.set_session_user("missing", "user-42").is_err());
}

#[test]
fn event_count_and_last_event_type_are_derived() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&event("S1", 1, Category::Session, "session.start")).unwrap();
    store.append(&event("S1", 2, Category::Message, "message.user")).unwrap();

    let session = store.get_session("S1").unwrap().unwrap();
    assert_eq!(session.event_count, 2);
    assert_eq!(session.last_event_type.as_deref(), Some("message.user"));
}

#[test]
fn delete_session_cascades_events() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(&event("S1", 1, Category::Session, "session.start")).unwrap();
    store.delete_session("S1").unwrap();

    assert!(store.get_session("S1").unwrap().is_none());
    assert!(store.get_session_events("S1").unwrap().is_empty());
}

#[test]
fn unknown_session_returns_none() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.get_session("nope").unwrap().is_none());
}

#[test]
fn role_and_text_round_trip() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut e = event("S1", 1, Category::Message, "message.user");
    e.role = Some(Role::User);
    e.text = Some("hello".to_string());
    store.append(&e).unwrap();

    let events = store.get_session_events("S1").unwrap();
    assert_eq!(events[0].role, Some(Role::User));
    assert_eq!(events[0].text.as_deref(), Some("hello"));
}
