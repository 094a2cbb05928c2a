//! Job payloads as a tagged union, validated at claim time.
//!
//! The queue persists `kind` + serialized payload; decoding distinguishes
//! an unknown job kind from a malformed payload so the two fail with
//! different errors.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::JobKind;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Unknown job kind: {0}")]
    UnknownKind(String),

    #[error("Malformed job payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    IngestDocument {
        project_id: Uuid,
        document_id: Uuid,
        root_path: PathBuf,
        rel_path: String,
    },
    RunScenes {
        project_id: Uuid,
        document_id: Uuid,
        snapshot_id: Uuid,
        root_path: PathBuf,
    },
    RunStyle {
        project_id: Uuid,
        document_id: Uuid,
        snapshot_id: Uuid,
        root_path: PathBuf,
    },
    RunExtraction {
        project_id: Uuid,
        document_id: Uuid,
        snapshot_id: Uuid,
        root_path: PathBuf,
        changed_start: usize,
        changed_end: usize,
    },
    RunContinuity {
        project_id: Uuid,
        document_id: Uuid,
        entity_ids: Vec<Uuid>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::IngestDocument { .. } => JobKind::IngestDocument,
            JobPayload::RunScenes { .. } => JobKind::RunScenes,
            JobPayload::RunStyle { .. } => JobKind::RunStyle,
            JobPayload::RunExtraction { .. } => JobKind::RunExtraction,
            JobPayload::RunContinuity { .. } => JobKind::RunContinuity,
        }
    }

    pub fn project_id(&self) -> Uuid {
        match self {
            JobPayload::IngestDocument { project_id, .. }
            | JobPayload::RunScenes { project_id, .. }
            | JobPayload::RunStyle { project_id, .. }
            | JobPayload::RunExtraction { project_id, .. }
            | JobPayload::RunContinuity { project_id, .. } => *project_id,
        }
    }

    pub fn document_id(&self) -> Uuid {
        match self {
            JobPayload::IngestDocument { document_id, .. }
            | JobPayload::RunScenes { document_id, .. }
            | JobPayload::RunStyle { document_id, .. }
            | JobPayload::RunExtraction { document_id, .. }
            | JobPayload::RunContinuity { document_id, .. } => *document_id,
        }
    }

    /// The job's logical identity. Ingest is keyed by file path (the
    /// watcher coalesces edits per path); stage jobs by
    /// `<stage>:<project>:<document>`.
    pub fn dedupe_key(&self) -> String {
        match self {
            JobPayload::IngestDocument {
                project_id,
                rel_path,
                ..
            } => format!("ingest:{project_id}:{rel_path}"),
            _ => format!(
                "{}:{}:{}",
                self.kind().stage(),
                self.project_id(),
                self.document_id()
            ),
        }
    }

    pub fn encode(&self) -> Result<String, PayloadError> {
        serde_json::to_string(self).map_err(|e| PayloadError::Malformed(e.to_string()))
    }

    /// Decode a stored payload against its `kind` column.
    pub fn decode(kind: &str, raw: &str) -> Result<JobPayload, PayloadError> {
        let expected =
            JobKind::from_str(kind).map_err(|_| PayloadError::UnknownKind(kind.to_string()))?;
        let payload: JobPayload =
            serde_json::from_str(raw).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        if payload.kind() != expected {
            return Err(PayloadError::Malformed(format!(
                "payload kind {} does not match job kind {}",
                payload.kind(),
                expected
            )));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenes_payload() -> JobPayload {
        JobPayload::RunScenes {
            project_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            snapshot_id: Uuid::new_v4(),
            root_path: PathBuf::from("/tmp/novel"),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let payload = scenes_payload();
        let raw = payload.encode().unwrap();
        let decoded = JobPayload::decode("run_scenes", &raw).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn unknown_kind_is_distinct_from_malformed() {
        let raw = scenes_payload().encode().unwrap();

        match JobPayload::decode("compile_epub", &raw) {
            Err(PayloadError::UnknownKind(kind)) => assert_eq!(kind, "compile_epub"),
            other => panic!("Expected UnknownKind, got: {other:?}"),
        }

        match JobPayload::decode("run_scenes", "{not json") {
            Err(PayloadError::Malformed(_)) => {}
            other => panic!("Expected Malformed, got: {other:?}"),
        }
    }

    #[test]
    fn kind_mismatch_is_malformed() {
        let raw = scenes_payload().encode().unwrap();
        assert!(matches!(
            JobPayload::decode("run_style", &raw),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn dedupe_keys_follow_stage_project_document_scheme() {
        let payload = scenes_payload();
        let key = payload.dedupe_key();
        assert_eq!(
            key,
            format!("scenes:{}:{}", payload.project_id(), payload.document_id())
        );

        let ingest = JobPayload::IngestDocument {
            project_id: payload.project_id(),
            document_id: payload.document_id(),
            root_path: PathBuf::from("/tmp/novel"),
            rel_path: "chapters/01.md".into(),
        };
        assert_eq!(
            ingest.dedupe_key(),
            format!("ingest:{}:chapters/01.md", payload.project_id())
        );
    }
}
