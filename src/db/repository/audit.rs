//! Append-only audit/event sink.
//!
//! The pipeline writes `job_started` / `job_finished` / `job_failed`
//! events here for observability; nothing in this crate reads them back.

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{fmt_ts, now_ts};
use crate::db::DatabaseError;

pub fn log_event(
    conn: &Connection,
    project_id: &Uuid,
    level: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (project_id, timestamp, level, event_type, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            project_id.to_string(),
            fmt_ts(&now_ts()),
            level,
            event_type,
            payload.to_string(),
        ],
    )?;
    Ok(())
}

/// Prune audit entries older than the given number of days.
pub fn prune_audit_log(conn: &Connection, retention_days: i64) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM audit_log WHERE timestamp < datetime('now', ?1)",
        params![format!("-{retention_days} days")],
    )?;
    Ok(deleted)
}

pub fn count_events(
    conn: &Connection,
    project_id: &Uuid,
    event_type: &str,
) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM audit_log WHERE project_id = ?1 AND event_type = ?2",
        params![project_id.to_string(), event_type],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    #[test]
    fn events_append_and_count() {
        let conn = open_memory_database().unwrap();
        let project = Uuid::new_v4();

        log_event(&conn, &project, "info", "job_started", &serde_json::json!({"job_id": 1}))
            .unwrap();
        log_event(&conn, &project, "info", "job_finished", &serde_json::json!({"job_id": 1}))
            .unwrap();
        log_event(&conn, &project, "error", "job_failed", &serde_json::json!({"job_id": 2}))
            .unwrap();

        assert_eq!(count_events(&conn, &project, "job_started").unwrap(), 1);
        assert_eq!(count_events(&conn, &project, "job_failed").unwrap(), 1);
        assert_eq!(count_events(&conn, &Uuid::new_v4(), "job_started").unwrap(), 0);
    }
}
