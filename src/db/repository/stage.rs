use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{fmt_ts, now_ts};
use crate::db::DatabaseError;
use crate::models::{Stage, StageState};

/// Record the state of one `(document, stage)` pair. Each stage moves
/// `pending -> ok | failed` independently of the others.
pub fn set_stage_state(
    conn: &Connection,
    document_id: &Uuid,
    stage: Stage,
    state: StageState,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO pipeline_stages (document_id, stage, state, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(document_id, stage) DO UPDATE SET state = ?3, updated_at = ?4",
        params![
            document_id.to_string(),
            stage.as_str(),
            state.as_str(),
            fmt_ts(&now_ts()),
        ],
    )?;
    Ok(())
}

pub fn get_stage_state(
    conn: &Connection,
    document_id: &Uuid,
    stage: Stage,
) -> Result<Option<StageState>, DatabaseError> {
    let state: Option<String> = conn
        .query_row(
            "SELECT state FROM pipeline_stages WHERE document_id = ?1 AND stage = ?2",
            params![document_id.to_string(), stage.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    state.as_deref().map(StageState::from_str).transpose()
}
