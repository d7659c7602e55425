use rusqlite::Connection;

use crate::error::Result;

/// Bump when the table shape changes. A mismatched `user_version` drops
/// and recreates all tables — acceptable because this store backs a
/// single-process service, not a system of record replicated elsewhere.
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;

    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            last_event_time INTEGER NOT NULL,
            status TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            user_id TEXT
        );

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            source TEXT NOT NULL,
            category TEXT NOT NULL,
            type TEXT NOT NULL,
            role TEXT,
            text TEXT,
            tool_name TEXT,
            tool_input TEXT,
            tool_output TEXT,
            error TEXT,
            meta TEXT,
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_events_session_ts ON events(session_id, timestamp);

        CREATE TABLE IF NOT EXISTS insights (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            repo TEXT,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            content TEXT NOT NULL,
            categories TEXT NOT NULL DEFAULT '[]',
            follow_up_actions TEXT NOT NULL DEFAULT '[]',
            sessions_analyzed INTEGER NOT NULL DEFAULT 0,
            events_analyzed INTEGER NOT NULL DEFAULT 0,
            token_usage TEXT,
            phase TEXT,
            round INTEGER NOT NULL DEFAULT 0,
            questions TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_insights_user ON insights(user_id);

        CREATE TABLE IF NOT EXISTS insight_analysis_state (
            user_id TEXT PRIMARY KEY,
            last_analyzed_at TEXT,
            last_event_timestamp INTEGER
        );

        CREATE TABLE IF NOT EXISTS cron_jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            prompt TEXT NOT NULL,
            schedule_text TEXT NOT NULL,
            cron_expression TEXT NOT NULL,
            timezone TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            notify_slack INTEGER NOT NULL DEFAULT 0,
            last_run_at TEXT,
            last_run_session_id TEXT,
            last_run_status TEXT,
            next_run_at TEXT,
            total_runs INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS events;
        DROP TABLE IF EXISTS sessions;
        DROP TABLE IF EXISTS insights;
        DROP TABLE IF EXISTS insight_analysis_state;
        DROP TABLE IF EXISTS cron_jobs;
        "#,
    )?;
    Ok(())
}
