use rusqlite::{params, Connection};
use uuid::Uuid;

use super::col_uuid;
use crate::db::DatabaseError;
use crate::models::{Scene, SceneSpan};

/// Replace all scenes for a document with the spans from one segmentation
/// run. Replace-all keeps the scenes stage safely re-runnable.
pub fn replace_scenes(
    conn: &Connection,
    document_id: &Uuid,
    snapshot_id: &Uuid,
    spans: &[SceneSpan],
) -> Result<usize, DatabaseError> {
    conn.execute(
        "DELETE FROM scenes WHERE document_id = ?1",
        params![document_id.to_string()],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO scenes (id, document_id, snapshot_id, idx, start_offset, end_offset, heading)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (idx, span) in spans.iter().enumerate() {
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            document_id.to_string(),
            snapshot_id.to_string(),
            idx as i64,
            span.start_offset,
            span.end_offset,
            span.heading,
        ])?;
    }
    Ok(spans.len())
}

pub fn list_scenes(conn: &Connection, document_id: &Uuid) -> Result<Vec<Scene>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, snapshot_id, idx, start_offset, end_offset, heading
         FROM scenes WHERE document_id = ?1 ORDER BY idx",
    )?;
    let rows = stmt
        .query_map(params![document_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let document_id: String = row.get(1)?;
            let snapshot_id: String = row.get(2)?;
            Ok(Scene {
                id: col_uuid(0, &id)?,
                document_id: col_uuid(1, &document_id)?,
                snapshot_id: col_uuid(2, &snapshot_id)?,
                idx: row.get(3)?,
                start_offset: row.get(4)?,
                end_offset: row.get(5)?,
                heading: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::{
        document::ensure_document, project::ensure_project, snapshot::insert_snapshot,
    };

    #[test]
    fn replace_scenes_swaps_out_previous_run() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();
        let doc = ensure_document(&conn, &project.id, "ch.md").unwrap();
        let snap = insert_snapshot(&conn, &doc.id, "text").unwrap().snapshot;

        let first = vec![
            SceneSpan { start_offset: 0, end_offset: 10, heading: Some("One".into()) },
            SceneSpan { start_offset: 10, end_offset: 20, heading: None },
        ];
        replace_scenes(&conn, &doc.id, &snap.id, &first).unwrap();
        assert_eq!(list_scenes(&conn, &doc.id).unwrap().len(), 2);

        let second = vec![SceneSpan { start_offset: 0, end_offset: 20, heading: None }];
        replace_scenes(&conn, &doc.id, &snap.id, &second).unwrap();

        let scenes = list_scenes(&conn, &doc.id).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].end_offset, 20);
    }
}
