use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::col_uuid;
use crate::db::DatabaseError;
use crate::models::Chunk;

/// Look up or create the chunk covering `[start, end)` of a snapshot.
/// Chunks are unique per `(snapshot_id, start_offset, end_offset)`, which
/// keeps extraction re-runs from piling up duplicate excerpts.
pub fn ensure_chunk(
    conn: &Connection,
    document_id: &Uuid,
    snapshot_id: &Uuid,
    start_offset: i64,
    end_offset: i64,
) -> Result<Chunk, DatabaseError> {
    let existing = conn
        .query_row(
            "SELECT id, document_id FROM chunks
             WHERE snapshot_id = ?1 AND start_offset = ?2 AND end_offset = ?3",
            params![snapshot_id.to_string(), start_offset, end_offset],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok(Chunk {
            id: Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            document_id: *document_id,
            snapshot_id: *snapshot_id,
            start_offset,
            end_offset,
        });
    }

    let chunk = Chunk {
        id: Uuid::new_v4(),
        document_id: *document_id,
        snapshot_id: *snapshot_id,
        start_offset,
        end_offset,
    };
    conn.execute(
        "INSERT INTO chunks (id, document_id, snapshot_id, start_offset, end_offset)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            chunk.id.to_string(),
            chunk.document_id.to_string(),
            chunk.snapshot_id.to_string(),
            chunk.start_offset,
            chunk.end_offset,
        ],
    )?;
    Ok(chunk)
}

pub fn get_chunk(conn: &Connection, id: &Uuid) -> Result<Option<Chunk>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, document_id, snapshot_id, start_offset, end_offset FROM chunks WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let id: String = row.get(0)?;
                let document_id: String = row.get(1)?;
                let snapshot_id: String = row.get(2)?;
                Ok(Chunk {
                    id: col_uuid(0, &id)?,
                    document_id: col_uuid(1, &document_id)?,
                    snapshot_id: col_uuid(2, &snapshot_id)?,
                    start_offset: row.get(3)?,
                    end_offset: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::{
        document::ensure_document, project::ensure_project, snapshot::insert_snapshot,
    };

    #[test]
    fn ensure_chunk_deduplicates_by_span() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();
        let doc = ensure_document(&conn, &project.id, "ch.md").unwrap();
        let snap = insert_snapshot(&conn, &doc.id, "some text").unwrap().snapshot;

        let a = ensure_chunk(&conn, &doc.id, &snap.id, 0, 9).unwrap();
        let b = ensure_chunk(&conn, &doc.id, &snap.id, 0, 9).unwrap();
        assert_eq!(a.id, b.id);

        let c = ensure_chunk(&conn, &doc.id, &snap.id, 0, 4).unwrap();
        assert_ne!(a.id, c.id);
    }
}
