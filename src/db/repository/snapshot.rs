//! Snapshot store: content-hash deduplicated, monotonically versioned
//! copies of a document's full text.

use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{col_uuid, fmt_ts, now_ts, parse_ts};
use crate::db::DatabaseError;
use crate::models::DocumentSnapshot;

/// Result of an insert attempt: `created` is false when the content hash
/// matched the latest snapshot and the existing row was returned.
#[derive(Debug, Clone)]
pub struct SnapshotInsert {
    pub snapshot: DocumentSnapshot,
    pub created: bool,
}

/// SHA-256 content hash, base64-encoded.
pub fn content_hash(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Insert a snapshot for `document_id` unless its hash matches the latest
/// existing snapshot, in which case the existing row is returned untouched
/// (idempotent ingestion). Versions strictly increase per document.
pub fn insert_snapshot(
    conn: &Connection,
    document_id: &Uuid,
    full_text: &str,
) -> Result<SnapshotInsert, DatabaseError> {
    let hash = content_hash(full_text);

    if let Some(latest) = latest_snapshot(conn, document_id)? {
        if latest.full_text_hash == hash {
            return Ok(SnapshotInsert {
                snapshot: latest,
                created: false,
            });
        }
    }

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM snapshots WHERE document_id = ?1",
        params![document_id.to_string()],
        |row| row.get(0),
    )?;

    let snapshot = DocumentSnapshot {
        id: Uuid::new_v4(),
        document_id: *document_id,
        version,
        full_text: full_text.to_string(),
        full_text_hash: hash,
        created_at: now_ts(),
    };
    conn.execute(
        "INSERT INTO snapshots (id, document_id, version, full_text, full_text_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            snapshot.id.to_string(),
            snapshot.document_id.to_string(),
            snapshot.version,
            snapshot.full_text,
            snapshot.full_text_hash,
            fmt_ts(&snapshot.created_at),
        ],
    )?;

    tracing::debug!(
        document_id = %document_id,
        version,
        "Snapshot created"
    );

    Ok(SnapshotInsert {
        snapshot,
        created: true,
    })
}

pub fn latest_snapshot(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<Option<DocumentSnapshot>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, document_id, version, full_text, full_text_hash, created_at
             FROM snapshots WHERE document_id = ?1
             ORDER BY version DESC LIMIT 1",
            params![document_id.to_string()],
            snapshot_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_snapshot(conn: &Connection, id: &Uuid) -> Result<Option<DocumentSnapshot>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, document_id, version, full_text, full_text_hash, created_at
             FROM snapshots WHERE id = ?1",
            params![id.to_string()],
            snapshot_from_row,
        )
        .optional()?;
    Ok(row)
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentSnapshot> {
    let id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let created_at: String = row.get(5)?;
    Ok(DocumentSnapshot {
        id: col_uuid(0, &id)?,
        document_id: col_uuid(1, &document_id)?,
        version: row.get(2)?,
        full_text: row.get(3)?,
        full_text_hash: row.get(4)?,
        created_at: parse_ts(&created_at),
    })
}
