pub mod payload;
pub mod ingest;
pub mod analyzers;
pub mod orchestrator;

pub use orchestrator::PipelineOrchestrator;
pub use payload::{JobPayload, PayloadError};

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

/// Errors raised by stage handlers. Inside the queue these mark the job
/// failed with backoff; they never poison the queue itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),
}
