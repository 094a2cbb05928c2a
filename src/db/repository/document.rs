use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{col_uuid, fmt_ts, now_ts, parse_ts};
use crate::db::DatabaseError;
use crate::models::DocumentRecord;

/// Look up a document by `(project_id, rel_path)`, creating it if absent.
/// Re-appearing documents (previously marked missing) are revived.
pub fn ensure_document(
    conn: &Connection,
    project_id: &Uuid,
    rel_path: &str,
) -> Result<DocumentRecord, DatabaseError> {
    if let Some(mut doc) = get_document_by_path(conn, project_id, rel_path)? {
        if doc.missing {
            set_document_missing(conn, &doc.id, false)?;
            doc.missing = false;
        }
        return Ok(doc);
    }

    let title = std::path::Path::new(rel_path)
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or(rel_path)
        .to_string();

    let now = now_ts();
    let doc = DocumentRecord {
        id: Uuid::new_v4(),
        project_id: *project_id,
        rel_path: rel_path.to_string(),
        title,
        missing: false,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO documents (id, project_id, rel_path, title, missing, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![
            doc.id.to_string(),
            doc.project_id.to_string(),
            doc.rel_path,
            doc.title,
            fmt_ts(&now),
        ],
    )?;
    Ok(doc)
}

pub fn get_document(conn: &Connection, id: &Uuid) -> Result<Option<DocumentRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, project_id, rel_path, title, missing, created_at, updated_at
             FROM documents WHERE id = ?1",
            params![id.to_string()],
            document_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_document_by_path(
    conn: &Connection,
    project_id: &Uuid,
    rel_path: &str,
) -> Result<Option<DocumentRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, project_id, rel_path, title, missing, created_at, updated_at
             FROM documents WHERE project_id = ?1 AND rel_path = ?2",
            params![project_id.to_string(), rel_path],
            document_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_documents(
    conn: &Connection,
    project_id: &Uuid,
) -> Result<Vec<DocumentRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, project_id, rel_path, title, missing, created_at, updated_at
         FROM documents WHERE project_id = ?1 ORDER BY rel_path",
    )?;
    let rows = stmt
        .query_map(params![project_id.to_string()], document_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Flip the missing flag. Used by the unlink path (set) and re-ingestion
/// of a re-appeared file (clear).
pub fn set_document_missing(
    conn: &Connection,
    id: &Uuid,
    missing: bool,
) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET missing = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), missing as i32, fmt_ts(&now_ts())],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn document_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let id: String = row.get(0)?;
    let project_id: String = row.get(1)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(DocumentRecord {
        id: col_uuid(0, &id)?,
        project_id: col_uuid(1, &project_id)?,
        rel_path: row.get(2)?,
        title: row.get(3)?,
        missing: row.get::<_, i32>(4)? != 0,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}
