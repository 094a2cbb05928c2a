use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::JobStatus;

/// One row of the durable job queue.
///
/// A job's identity is its `dedupe_key`, not its payload: the queue keeps
/// at most one row per key and replaces the payload on re-enqueue.
/// Timing columns are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub project_id: Uuid,
    /// Raw `kind` column. Kept as stored so the run loop can classify an
    /// unrecognized kind distinctly from a malformed payload when it
    /// decodes at claim time.
    pub kind: String,
    /// Serialized `JobPayload` (tagged JSON). Decoded at claim time.
    pub payload: String,
    pub dedupe_key: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub next_run_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}
