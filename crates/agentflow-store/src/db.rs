use std::path::Path;
use std::sync::Mutex;

use agentflow_types::{
    shallow_merge, AnalysisState, Category, CronJob, CronRunStatus, Event, Insight, Role, Session,
    SessionView, Source, StoredStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::init_schema;

/// C1 — Store. Object-safe so the server can hold `Arc<dyn Store>` and
/// hand the same handle to the ingest path, the query API, and both
/// schedulers, with an explicit init/teardown lifecycle rather than a
/// process-global connection.
pub trait Store: Send + Sync {
    fn append(&self, event: &Event) -> Result<()>;
    fn get_session(&self, id: &str) -> Result<Option<SessionView>>;
    fn list_sessions(&self) -> Result<Vec<SessionView>>;
    fn get_session_events(&self, id: &str) -> Result<Vec<Event>>;
    fn update_session_meta(&self, id: &str, patch: &Map<String, Value>) -> Result<()>;
    fn set_session_user(&self, id: &str, user_id: &str) -> Result<()>;
    fn delete_session(&self, id: &str) -> Result<()>;
    fn clear_all(&self) -> Result<()>;

    fn upsert_insight(&self, insight: &Insight) -> Result<()>;
    fn get_insight(&self, id: Uuid) -> Result<Option<Insight>>;
    fn list_insights_for_user(&self, user_id: &str) -> Result<Vec<Insight>>;
    fn distinct_users_with_activity(&self) -> Result<Vec<String>>;
    fn get_analysis_state(&self, user_id: &str) -> Result<Option<AnalysisState>>;
    fn put_analysis_state(&self, state: &AnalysisState) -> Result<()>;
    fn count_events_since(&self, user_id: &str, since_ms: Option<i64>) -> Result<i64>;
    fn count_distinct_sessions_since(&self, user_id: &str, since_ms: Option<i64>) -> Result<i64>;

    fn upsert_cron_job(&self, job: &CronJob) -> Result<()>;
    fn get_cron_job(&self, id: Uuid) -> Result<Option<CronJob>>;
    fn list_cron_jobs(&self) -> Result<Vec<CronJob>>;
    fn record_cron_run(
        &self,
        id: Uuid,
        status: CronRunStatus,
        session_id: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Store for SqliteStore {
    fn append(&self, event: &Event) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;

        let existing_status: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                params![event.session_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut status = match existing_status {
            None => {
                tx.execute(
                    "INSERT INTO sessions (id, source, start_time, last_event_time, status, metadata, user_id)
                     VALUES (?1, ?2, ?3, ?3, 'active', '{}', NULL)",
                    params![event.session_id, event.source.as_str(), event.timestamp],
                )?;
                StoredStatus::Active
            }
            Some(s) => parse_status(&s),
        };

        if status == StoredStatus::Completed {
            status = StoredStatus::Active;
        }
        if event.category == Category::Error {
            status = StoredStatus::Error;
        }
        if event.is_session_end() {
            status = StoredStatus::Completed;
        }

        tx.execute(
            "UPDATE sessions SET last_event_time = ?1, status = ?2 WHERE id = ?3",
            params![event.timestamp, status_str(status), event.session_id],
        )?;

        tx.execute(
            "INSERT INTO events (id, session_id, timestamp, source, category, type, role, text,
                                  tool_name, tool_input, tool_output, error, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                event.id.to_string(),
                event.session_id,
                event.timestamp,
                event.source.as_str(),
                category_str(event.category),
                event.event_type,
                event.role.map(role_str),
                event.text,
                event.tool_name,
                json_opt(&event.tool_input)?,
                json_opt(&event.tool_output)?,
                event.error,
                json_opt(&event.meta)?,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<SessionView>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        get_session_locked(&conn, id)
    }

    fn list_sessions(&self) -> Result<Vec<SessionView>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id FROM sessions ORDER BY last_event_time DESC",
        )?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(view) = get_session_locked(&conn, &id)? {
                views.push(view);
            }
        }
        Ok(views)
    }

    fn get_session_events(&self, id: &str) -> Result<Vec<Event>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        get_session_events_locked(&conn, id)
    }

    fn update_session_meta(&self, id: &str, patch: &Map<String, Value>) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let raw: Option<String> = conn
            .query_row(
                "SELECT metadata FROM sessions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(Error::NotFound(id.to_string()));
        };
        let mut metadata: Map<String, Value> =
            serde_json::from_str(&raw).unwrap_or_default();
        shallow_merge(&mut metadata, patch);
        conn.execute(
            "UPDATE sessions SET metadata = ?1 WHERE id = ?2",
            params![serde_json::to_string(&metadata)?, id],
        )?;
        Ok(())
    }

    fn set_session_user(&self, id: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "UPDATE sessions SET user_id = ?1 WHERE id = ?2",
            params![user_id, id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE session_id = ?1", params![id])?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM events; DELETE FROM sessions;")?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_insight(&self, insight: &Insight) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO insights (id, user_id, repo, window_start, window_end, content,
                                    categories, follow_up_actions, sessions_analyzed, events_analyzed,
                                    token_usage, phase, round, questions)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                categories = excluded.categories,
                follow_up_actions = excluded.follow_up_actions,
                sessions_analyzed = excluded.sessions_analyzed,
                events_analyzed = excluded.events_analyzed,
                token_usage = excluded.token_usage,
                phase = excluded.phase,
                round = excluded.round,
                questions = excluded.questions",
            params![
                insight.id.to_string(),
                insight.user_id,
                insight.repo,
                insight.window_start.to_rfc3339(),
                insight.window_end.to_rfc3339(),
                insight.content,
                serde_json::to_string(&insight.categories)?,
                serde_json::to_string(&insight.follow_up_actions)?,
                insight.sessions_analyzed,
                insight.events_analyzed,
                insight.token_usage.as_ref().map(serde_json::to_string).transpose()?,
                insight.phase.map(|p| serde_json::to_string(&p)).transpose()?,
                insight.round,
                serde_json::to_string(&insight.questions)?,
            ],
        )?;
        Ok(())
    }

    fn get_insight(&self, id: Uuid) -> Result<Option<Insight>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT id, user_id, repo, window_start, window_end, content, categories,
                    follow_up_actions, sessions_analyzed, events_analyzed, token_usage, phase,
                    round, questions
             FROM insights WHERE id = ?1",
            params![id.to_string()],
            row_to_insight,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_insights_for_user(&self, user_id: &str) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, user_id, repo, window_start, window_end, content, categories,
                    follow_up_actions, sessions_analyzed, events_analyzed, token_usage, phase,
                    round, questions
             FROM insights WHERE user_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_insight)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    fn distinct_users_with_activity(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM sessions WHERE user_id IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    fn get_analysis_state(&self, user_id: &str) -> Result<Option<AnalysisState>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT user_id, last_analyzed_at, last_event_timestamp FROM insight_analysis_state WHERE user_id = ?1",
            params![user_id],
            |row| {
                let last_analyzed_at: Option<String> = row.get(1)?;
                Ok(AnalysisState {
                    user_id: row.get(0)?,
                    last_analyzed_at: last_analyzed_at
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                    last_event_timestamp: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn put_analysis_state(&self, state: &AnalysisState) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO insight_analysis_state (user_id, last_analyzed_at, last_event_timestamp)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                last_analyzed_at = excluded.last_analyzed_at,
                last_event_timestamp = excluded.last_event_timestamp",
            params![
                state.user_id,
                state.last_analyzed_at.map(|dt| dt.to_rfc3339()),
                state.last_event_timestamp,
            ],
        )?;
        Ok(())
    }

    fn count_events_since(&self, user_id: &str, since_ms: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let since = since_ms.unwrap_or(0);
        conn.query_row(
            "SELECT COUNT(*) FROM events e JOIN sessions s ON e.session_id = s.id
             WHERE s.user_id = ?1 AND e.timestamp > ?2",
            params![user_id, since],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn count_distinct_sessions_since(&self, user_id: &str, since_ms: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let since = since_ms.unwrap_or(0);
        conn.query_row(
            "SELECT COUNT(DISTINCT e.session_id) FROM events e JOIN sessions s ON e.session_id = s.id
             WHERE s.user_id = ?1 AND e.timestamp > ?2",
            params![user_id, since],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn upsert_cron_job(&self, job: &CronJob) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO cron_jobs (id, name, prompt, schedule_text, cron_expression, timezone,
                                     enabled, notify_slack, last_run_at, last_run_session_id,
                                     last_run_status, next_run_at, total_runs)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                prompt = excluded.prompt,
                schedule_text = excluded.schedule_text,
                cron_expression = excluded.cron_expression,
                timezone = excluded.timezone,
                enabled = excluded.enabled,
                notify_slack = excluded.notify_slack,
                next_run_at = excluded.next_run_at",
            params![
                job.id.to_string(),
                job.name,
                job.prompt,
                job.schedule_text,
                job.cron_expression,
                job.timezone,
                job.enabled,
                job.notify_slack,
                job.last_run_at.map(|dt| dt.to_rfc3339()),
                job.last_run_session_id,
                job.last_run_status.map(|s| serde_json::to_string(&s)).transpose()?,
                job.next_run_at.map(|dt| dt.to_rfc3339()),
                job.total_runs,
            ],
        )?;
        Ok(())
    }

    fn get_cron_job(&self, id: Uuid) -> Result<Option<CronJob>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT id, name, prompt, schedule_text, cron_expression, timezone, enabled,
                    notify_slack, last_run_at, last_run_session_id, last_run_status,
                    next_run_at, total_runs
             FROM cron_jobs WHERE id = ?1",
            params![id.to_string()],
            row_to_cron_job,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_cron_jobs(&self) -> Result<Vec<CronJob>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, name, prompt, schedule_text, cron_expression, timezone, enabled,
                    notify_slack, last_run_at, last_run_session_id, last_run_status,
                    next_run_at, total_runs
             FROM cron_jobs",
        )?;
        let rows = stmt
            .query_map([], row_to_cron_job)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    fn record_cron_run(
        &self,
        id: Uuid,
        status: CronRunStatus,
        session_id: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE cron_jobs SET
                last_run_at = ?1,
                last_run_session_id = ?2,
                last_run_status = ?3,
                next_run_at = ?4,
                total_runs = total_runs + 1
             WHERE id = ?5",
            params![
                Utc::now().to_rfc3339(),
                session_id,
                serde_json::to_string(&status)?,
                next_run_at.map(|dt| dt.to_rfc3339()),
                id.to_string(),
            ],
        )?;
        Ok(())
    }
}

fn get_session_locked(conn: &Connection, id: &str) -> Result<Option<SessionView>> {
    let row: Option<(String, i64, i64, String, String, Option<String>)> = conn
        .query_row(
            "SELECT source, start_time, last_event_time, status, metadata, user_id
             FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;

    let Some((source, start_time, last_event_time, status, metadata, user_id)) = row else {
        return Ok(None);
    };

    let event_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE session_id = ?1",
        params![id],
        |row| row.get(0),
    )?;

    let last_event: Option<String> = conn
        .query_row(
            "SELECT type FROM events WHERE session_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    let last_event_text: Option<String> = conn
        .query_row(
            "SELECT text FROM events WHERE session_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    let stored_status = parse_status(&status);
    let effective_status =
        SessionView::compute_effective_status(stored_status, last_event_time, now_ms());

    let session = Session {
        id: id.to_string(),
        source: Source::parse(&source),
        start_time,
        last_event_time,
        status: stored_status,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        user_id,
    };

    Ok(Some(SessionView {
        session,
        effective_status,
        event_count,
        last_event_type: last_event,
        last_event_text,
    }))
}

fn get_session_events_locked(conn: &Connection, id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, timestamp, source, category, type, role, text, tool_name,
                tool_input, tool_output, error, meta
         FROM events WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map(params![id], row_to_event)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let id: String = row.get(0)?;
    let source: String = row.get(3)?;
    let category: String = row.get(4)?;
    let role: Option<String> = row.get(6)?;
    Ok(Event {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        session_id: row.get(1)?,
        timestamp: row.get(2)?,
        source: Source::parse(&source),
        category: parse_category(&category),
        event_type: row.get(5)?,
        role: role.as_deref().and_then(parse_role),
        text: row.get(7)?,
        tool_name: row.get(8)?,
        tool_input: parse_json_col(row, 9)?,
        tool_output: parse_json_col(row, 10)?,
        error: row.get(11)?,
        meta: parse_json_col(row, 12)?,
    })
}

fn row_to_insight(row: &Row) -> rusqlite::Result<Insight> {
    let id: String = row.get(0)?;
    let window_start: String = row.get(3)?;
    let window_end: String = row.get(4)?;
    let categories: String = row.get(6)?;
    let follow_up: String = row.get(7)?;
    let token_usage: Option<String> = row.get(10)?;
    let phase: Option<String> = row.get(11)?;
    let questions: String = row.get(13)?;
    Ok(Insight {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        user_id: row.get(1)?,
        repo: row.get(2)?,
        window_start: DateTime::parse_from_rfc3339(&window_start)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        window_end: DateTime::parse_from_rfc3339(&window_end)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        content: row.get(5)?,
        categories: serde_json::from_str(&categories).unwrap_or_default(),
        follow_up_actions: serde_json::from_str(&follow_up).unwrap_or_default(),
        sessions_analyzed: row.get(8)?,
        events_analyzed: row.get(9)?,
        token_usage: token_usage.and_then(|s| serde_json::from_str(&s).ok()),
        phase: phase.and_then(|s| serde_json::from_str(&s).ok()),
        round: row.get(12)?,
        questions: serde_json::from_str(&questions).unwrap_or_default(),
    })
}

fn row_to_cron_job(row: &Row) -> rusqlite::Result<CronJob> {
    let id: String = row.get(0)?;
    let last_run_at: Option<String> = row.get(8)?;
    let last_run_status: Option<String> = row.get(10)?;
    let next_run_at: Option<String> = row.get(11)?;
    Ok(CronJob {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        name: row.get(1)?,
        prompt: row.get(2)?,
        schedule_text: row.get(3)?,
        cron_expression: row.get(4)?,
        timezone: row.get(5)?,
        enabled: row.get(6)?,
        notify_slack: row.get(7)?,
        last_run_at: last_run_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        last_run_session_id: row.get(9)?,
        last_run_status: last_run_status.and_then(|s| serde_json::from_str(&s).ok()),
        next_run_at: next_run_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        total_runs: row.get(12)?,
    })
}

fn parse_json_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

fn json_opt(value: &Option<Value>) -> Result<Option<String>> {
    Ok(match value {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    })
}

fn status_str(status: StoredStatus) -> &'static str {
    match status {
        StoredStatus::Active => "active",
        StoredStatus::Completed => "completed",
        StoredStatus::Error => "error",
        StoredStatus::Archived => "archived",
    }
}

fn parse_status(s: &str) -> StoredStatus {
    match s {
        "completed" => StoredStatus::Completed,
        "error" => StoredStatus::Error,
        "archived" => StoredStatus::Archived,
        _ => StoredStatus::Active,
    }
}

fn category_str(category: Category) -> &'static str {
    match category {
        Category::Session => "session",
        Category::Message => "message",
        Category::Tool => "tool",
        Category::Error => "error",
        Category::System => "system",
    }
}

fn parse_category(s: &str) -> Category {
    match s {
        "session" => Category::Session,
        "message" => Category::Message,
        "tool" => Category::Tool,
        "error" => Category::Error,
        _ => Category::System,
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}
