use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{col_enum, col_uuid, fmt_ts, now_ts, parse_ts};
use crate::db::DatabaseError;
use crate::models::{ContinuityIssue, IssueSeverity, IssueStatus};

const ISSUE_COLUMNS: &str =
    "id, project_id, entity_id, field, description, severity, status, created_at, updated_at";

pub fn insert_issue(conn: &Connection, issue: &ContinuityIssue) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO continuity_issues (id, project_id, entity_id, field, description, severity, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            issue.id.to_string(),
            issue.project_id.to_string(),
            issue.entity_id.to_string(),
            issue.field,
            issue.description,
            issue.severity.as_str(),
            issue.status.as_str(),
            fmt_ts(&issue.created_at),
            fmt_ts(&issue.updated_at),
        ],
    )?;
    Ok(())
}

/// Whether an open issue already covers this `(entity, field)`. Keeps
/// continuity re-runs from duplicating findings.
pub fn open_issue_exists(
    conn: &Connection,
    entity_id: &Uuid,
    field: &str,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM continuity_issues
         WHERE entity_id = ?1 AND field = ?2 AND status = 'open'",
        params![entity_id.to_string(), field],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Synchronous request-handler entry point: mark an issue resolved.
pub fn resolve_issue(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE continuity_issues SET status = 'resolved', updated_at = ?2
         WHERE id = ?1 AND status = 'open'",
        params![id.to_string(), fmt_ts(&now_ts())],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "ContinuityIssue".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn list_open_issues(
    conn: &Connection,
    project_id: &Uuid,
) -> Result<Vec<ContinuityIssue>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ISSUE_COLUMNS} FROM continuity_issues
         WHERE project_id = ?1 AND status = 'open'
         ORDER BY created_at ASC"
    ))?;
    let rows = stmt
        .query_map(params![project_id.to_string()], issue_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_issue(conn: &Connection, id: &Uuid) -> Result<Option<ContinuityIssue>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM continuity_issues WHERE id = ?1"),
            params![id.to_string()],
            issue_from_row,
        )
        .optional()?;
    Ok(row)
}

fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContinuityIssue> {
    let id: String = row.get(0)?;
    let project_id: String = row.get(1)?;
    let entity_id: String = row.get(2)?;
    let severity: String = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(ContinuityIssue {
        id: col_uuid(0, &id)?,
        project_id: col_uuid(1, &project_id)?,
        entity_id: col_uuid(2, &entity_id)?,
        field: row.get(3)?,
        description: row.get(4)?,
        severity: col_enum(5, &severity)?,
        status: col_enum(6, &status)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}
