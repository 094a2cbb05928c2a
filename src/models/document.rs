use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A writing project rooted at a directory on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub root_path: String,
    pub name: String,
    pub created_at: NaiveDateTime,
}

/// A tracked document within a project, identified by its path relative
/// to the project root. Full text lives in `snapshots`, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub rel_path: String,
    pub title: String,
    /// Set when the file disappears from disk (unlink event).
    pub missing: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
