use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Opens the configured database, runs `PRAGMA integrity_check`, and
/// reports row counts per table, a supplemental `doctor` subcommand
/// in the namespaced-diagnostics style of `doctor`/`lab` CLIs.
pub fn run(db_path: &Path) -> Result<()> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;

    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    println!("integrity_check: {integrity}");

    for table in ["sessions", "events", "insights", "insight_analysis_state", "cron_jobs"] {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap_or(-1);
        println!("{table}: {count} rows");
    }

    Ok(())
}
