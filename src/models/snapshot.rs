use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable, versioned copy of a document's full text.
///
/// Versions strictly increase per document; a new snapshot is created
/// only when the content hash changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i64,
    pub full_text: String,
    pub full_text_hash: String,
    pub created_at: NaiveDateTime,
}
