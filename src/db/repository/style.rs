use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{col_uuid, fmt_ts, parse_ts};
use crate::db::DatabaseError;
use crate::models::StyleMetrics;

/// Upsert the style metrics for a document (one row per document).
pub fn upsert_style_metrics(conn: &Connection, metrics: &StyleMetrics) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO style_metrics (document_id, snapshot_id, word_count, sentence_count, avg_sentence_len, dialogue_ratio, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(document_id) DO UPDATE SET
           snapshot_id = ?2, word_count = ?3, sentence_count = ?4,
           avg_sentence_len = ?5, dialogue_ratio = ?6, updated_at = ?7",
        params![
            metrics.document_id.to_string(),
            metrics.snapshot_id.to_string(),
            metrics.word_count,
            metrics.sentence_count,
            metrics.avg_sentence_len,
            metrics.dialogue_ratio,
            fmt_ts(&metrics.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_style_metrics(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<Option<StyleMetrics>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT document_id, snapshot_id, word_count, sentence_count, avg_sentence_len, dialogue_ratio, updated_at
             FROM style_metrics WHERE document_id = ?1",
            params![document_id.to_string()],
            |row| {
                let document_id: String = row.get(0)?;
                let snapshot_id: String = row.get(1)?;
                let updated_at: String = row.get(6)?;
                Ok(StyleMetrics {
                    document_id: col_uuid(0, &document_id)?,
                    snapshot_id: col_uuid(1, &snapshot_id)?,
                    word_count: row.get(2)?,
                    sentence_count: row.get(3)?,
                    avg_sentence_len: row.get(4)?,
                    dialogue_ratio: row.get(5)?,
                    updated_at: parse_ts(&updated_at),
                })
            },
        )
        .optional()?;
    Ok(row)
}
