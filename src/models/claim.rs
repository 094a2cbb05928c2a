use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ClaimStatus, EntityKind};

/// An entity the extraction stage has seen (character, location, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub kind: EntityKind,
    pub created_at: NaiveDateTime,
}

/// A versioned, evidence-backed assertion about an entity's field.
///
/// History per `(entity_id, field)` is append-only: confirming creates a
/// new row; old rows only ever transition their status to `superseded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub field: String,
    pub value: String,
    pub status: ClaimStatus,
    pub confidence: f64,
    pub supersedes_claim_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A document excerpt that evidence rows reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub snapshot_id: Uuid,
    pub start_offset: i64,
    pub end_offset: i64,
}

/// Links a claim to the excerpt substantiating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimEvidence {
    pub claim_id: Uuid,
    pub chunk_id: Uuid,
    pub quote_start: i64,
    pub quote_end: i64,
}
