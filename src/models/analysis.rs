use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{IssueSeverity, IssueStatus};

/// A segmented scene within one snapshot of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: Uuid,
    pub document_id: Uuid,
    pub snapshot_id: Uuid,
    pub idx: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub heading: Option<String>,
}

/// Analyzer output for one segmented scene, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSpan {
    pub start_offset: i64,
    pub end_offset: i64,
    pub heading: Option<String>,
}

/// Per-document prose metrics, replaced on every style run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleMetrics {
    pub document_id: Uuid,
    pub snapshot_id: Uuid,
    pub word_count: i64,
    pub sentence_count: i64,
    pub avg_sentence_len: f64,
    pub dialogue_ratio: f64,
    pub updated_at: NaiveDateTime,
}

/// A detected contradiction between active claims on one entity field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityIssue {
    pub id: Uuid,
    pub project_id: Uuid,
    pub entity_id: Uuid,
    pub field: String,
    pub description: String,
    pub severity: IssueSeverity,
    pub status: IssueStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
