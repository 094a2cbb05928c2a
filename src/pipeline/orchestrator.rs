//! Stage dispatch for the document pipeline.
//!
//! One orchestrator serves a queue instance: it routes each decoded
//! payload to its stage handler, records per-(document, stage) state,
//! and returns follow-up jobs for the queue to enqueue — ingest fans out
//! to scenes/style/extraction, extraction fans in to one continuity job.
//!
//! Uses trait-based DI for all analyzers (SceneSegmenter, ClaimExtractor,
//! etc.) so the orchestrator remains fully testable with mocks.

use rusqlite::Connection;
use uuid::Uuid;

use super::analyzers::{
    ClaimConflictChecker, ClaimExtractor, ContinuityChecker, HeuristicSceneSegmenter,
    HeuristicStyleAnalyzer, PatternClaimExtractor, SceneSegmenter, StyleAnalyzer,
};
use super::{ingest, JobPayload, PipelineError};
use crate::db::repository::{
    chunk as chunk_repo, claim as claim_repo, continuity as continuity_repo, now_ts,
    scene as scene_repo, snapshot as snapshot_repo, stage as stage_repo, style as style_repo,
};
use crate::models::{
    Claim, ClaimEvidence, ClaimStatus, ContinuityIssue, IssueSeverity, IssueStatus, StageState,
    StyleMetrics,
};
use crate::queue::JobDispatch;
use crate::storage::StorageHandle;

pub struct PipelineOrchestrator {
    scenes: Box<dyn SceneSegmenter>,
    style: Box<dyn StyleAnalyzer>,
    extractor: Box<dyn ClaimExtractor>,
    continuity: Box<dyn ContinuityChecker>,
}

impl PipelineOrchestrator {
    pub fn new(
        scenes: Box<dyn SceneSegmenter>,
        style: Box<dyn StyleAnalyzer>,
        extractor: Box<dyn ClaimExtractor>,
        continuity: Box<dyn ContinuityChecker>,
    ) -> Self {
        Self {
            scenes,
            style,
            extractor,
            continuity,
        }
    }

    /// Orchestrator with the bundled heuristic analyzers.
    pub fn with_default_analyzers() -> Self {
        Self::new(
            Box::new(HeuristicSceneSegmenter),
            Box::new(HeuristicStyleAnalyzer::new()),
            Box::new(PatternClaimExtractor::new()),
            Box::new(ClaimConflictChecker),
        )
    }

    fn run_stage(
        &self,
        conn: &Connection,
        payload: &JobPayload,
    ) -> Result<Vec<JobPayload>, PipelineError> {
        match payload {
            JobPayload::IngestDocument {
                project_id,
                document_id,
                root_path,
                rel_path,
            } => {
                let outcome = ingest::run_ingest(conn, document_id, root_path, rel_path)?;

                // Fan out only when a new snapshot was actually created and
                // the changed range is non-null.
                let Some((changed_start, changed_end)) = outcome.changed else {
                    return Ok(vec![]);
                };
                Ok(vec![
                    JobPayload::RunScenes {
                        project_id: *project_id,
                        document_id: *document_id,
                        snapshot_id: outcome.snapshot_id,
                        root_path: root_path.clone(),
                    },
                    JobPayload::RunStyle {
                        project_id: *project_id,
                        document_id: *document_id,
                        snapshot_id: outcome.snapshot_id,
                        root_path: root_path.clone(),
                    },
                    JobPayload::RunExtraction {
                        project_id: *project_id,
                        document_id: *document_id,
                        snapshot_id: outcome.snapshot_id,
                        root_path: root_path.clone(),
                        changed_start,
                        changed_end,
                    },
                ])
            }

            JobPayload::RunScenes {
                document_id,
                snapshot_id,
                ..
            } => {
                let snap = snapshot_repo::get_snapshot(conn, snapshot_id)?
                    .ok_or(PipelineError::SnapshotNotFound(*snapshot_id))?;
                let spans = self.scenes.segment(&snap.full_text);
                let count = scene_repo::replace_scenes(conn, document_id, snapshot_id, &spans)?;
                tracing::info!(document_id = %document_id, scenes = count, "Scenes segmented");
                Ok(vec![])
            }

            JobPayload::RunStyle {
                document_id,
                snapshot_id,
                ..
            } => {
                let snap = snapshot_repo::get_snapshot(conn, snapshot_id)?
                    .ok_or(PipelineError::SnapshotNotFound(*snapshot_id))?;
                let stats = self.style.analyze(&snap.full_text);
                style_repo::upsert_style_metrics(
                    conn,
                    &StyleMetrics {
                        document_id: *document_id,
                        snapshot_id: *snapshot_id,
                        word_count: stats.word_count,
                        sentence_count: stats.sentence_count,
                        avg_sentence_len: stats.avg_sentence_len,
                        dialogue_ratio: stats.dialogue_ratio,
                        updated_at: now_ts(),
                    },
                )?;
                tracing::info!(document_id = %document_id, words = stats.word_count, "Style analyzed");
                Ok(vec![])
            }

            JobPayload::RunExtraction {
                project_id,
                document_id,
                snapshot_id,
                changed_start,
                changed_end,
                ..
            } => {
                let snap = snapshot_repo::get_snapshot(conn, snapshot_id)?
                    .ok_or(PipelineError::SnapshotNotFound(*snapshot_id))?;
                let extracted =
                    self.extractor
                        .extract(&snap.full_text, *changed_start, *changed_end);

                let mut touched: Vec<Uuid> = Vec::new();
                for found in &extracted {
                    let entity = claim_repo::ensure_entity(
                        conn,
                        project_id,
                        &found.entity_name,
                        found.entity_kind,
                    )?;

                    // Idempotent re-run: an identical active claim is reused
                    // instead of duplicated.
                    let claim_id = match claim_repo::find_active_claim(
                        conn,
                        &entity.id,
                        &found.field,
                        &found.value,
                    )? {
                        Some(existing) => existing.id,
                        None => {
                            let now = now_ts();
                            let claim = Claim {
                                id: Uuid::new_v4(),
                                entity_id: entity.id,
                                field: found.field.clone(),
                                value: found.value.clone(),
                                status: ClaimStatus::Inferred,
                                confidence: found.confidence,
                                supersedes_claim_id: None,
                                created_at: now,
                                updated_at: now,
                            };
                            claim_repo::insert_claim(conn, &claim)?;
                            claim.id
                        }
                    };

                    let (chunk_start, chunk_end) =
                        paragraph_bounds(&snap.full_text, found.quote_start, found.quote_end);
                    let chunk = chunk_repo::ensure_chunk(
                        conn,
                        document_id,
                        snapshot_id,
                        chunk_start as i64,
                        chunk_end as i64,
                    )?;
                    claim_repo::insert_evidence(
                        conn,
                        &ClaimEvidence {
                            claim_id,
                            chunk_id: chunk.id,
                            quote_start: found.quote_start as i64,
                            quote_end: found.quote_end as i64,
                        },
                    )?;

                    if !touched.contains(&entity.id) {
                        touched.push(entity.id);
                    }
                }

                tracing::info!(
                    document_id = %document_id,
                    claims = extracted.len(),
                    entities = touched.len(),
                    "Extraction complete"
                );

                // Fan in: exactly one continuity job, scoped to the entities
                // this run touched.
                Ok(vec![JobPayload::RunContinuity {
                    project_id: *project_id,
                    document_id: *document_id,
                    entity_ids: touched,
                }])
            }

            JobPayload::RunContinuity {
                project_id,
                entity_ids,
                ..
            } => {
                let mut found = 0usize;
                for entity_id in entity_ids {
                    let active = claim_repo::active_claims_for_entity(conn, entity_id)?;
                    for conflict in self.continuity.conflicts(&active) {
                        if continuity_repo::open_issue_exists(conn, entity_id, &conflict.field)? {
                            continue;
                        }
                        let now = now_ts();
                        continuity_repo::insert_issue(
                            conn,
                            &ContinuityIssue {
                                id: Uuid::new_v4(),
                                project_id: *project_id,
                                entity_id: *entity_id,
                                field: conflict.field.clone(),
                                description: format!(
                                    "Conflicting values for {}: {}",
                                    conflict.field,
                                    conflict.values.join(" vs ")
                                ),
                                severity: IssueSeverity::Medium,
                                status: IssueStatus::Open,
                                created_at: now,
                                updated_at: now,
                            },
                        )?;
                        found += 1;
                    }
                }
                tracing::info!(entities = entity_ids.len(), issues = found, "Continuity checked");
                Ok(vec![])
            }
        }
    }
}

impl JobDispatch for PipelineOrchestrator {
    fn dispatch(
        &self,
        storage: &StorageHandle,
        payload: &JobPayload,
    ) -> Result<Vec<JobPayload>, PipelineError> {
        let stage = payload.kind().stage();
        let document_id = payload.document_id();

        storage.with(|conn| {
            stage_repo::set_stage_state(conn, &document_id, stage, StageState::Pending)
                .map_err(PipelineError::from)
        })?;

        let result = storage.with(|conn| self.run_stage(conn, payload));

        let final_state = if result.is_ok() {
            StageState::Ok
        } else {
            StageState::Failed
        };
        if let Err(e) = storage.with(|conn| {
            stage_repo::set_stage_state(conn, &document_id, stage, final_state)
                .map_err(PipelineError::from)
        }) {
            tracing::warn!(document_id = %document_id, error = %e, "Failed to record stage state");
        }

        result
    }
}

/// Bounds of the paragraph containing `[start, end)`, delimited by blank
/// lines. Evidence chunks cover whole paragraphs so quotes keep context.
fn paragraph_bounds(text: &str, start: usize, end: usize) -> (usize, usize) {
    let start = start.min(text.len());
    let end = end.clamp(start, text.len());

    let para_start = text[..start].rfind("\n\n").map(|i| i + 2).unwrap_or(0);
    let para_end = text[end..]
        .find("\n\n")
        .map(|i| end + i)
        .unwrap_or(text.len());
    (para_start, para_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{document, project, scene as scene_repo_mod, stage};
    use crate::models::Stage;
    use std::path::PathBuf;

    struct Fixture {
        storage: StorageHandle,
        orchestrator: PipelineOrchestrator,
        project_id: Uuid,
        document_id: Uuid,
        root: tempfile::TempDir,
    }

    fn fixture_with_text(text: &str) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("ch01.md"), text).unwrap();

        let storage = StorageHandle::in_memory().unwrap();
        let (project_id, document_id) = storage
            .with(|conn| {
                let p = project::ensure_project(conn, root.path().to_str().unwrap())?;
                let d = document::ensure_document(conn, &p.id, "ch01.md")?;
                Ok::<_, crate::db::DatabaseError>((p.id, d.id))
            })
            .unwrap();

        Fixture {
            storage,
            orchestrator: PipelineOrchestrator::with_default_analyzers(),
            project_id,
            document_id,
            root,
        }
    }

    fn ingest_payload(f: &Fixture) -> JobPayload {
        JobPayload::IngestDocument {
            project_id: f.project_id,
            document_id: f.document_id,
            root_path: PathBuf::from(f.root.path()),
            rel_path: "ch01.md".into(),
        }
    }

    #[test]
    fn ingest_fans_out_three_stage_jobs_in_order() {
        let f = fixture_with_text("# One\nMara's eyes were green.\n");

        let follow_ups = f
            .orchestrator
            .dispatch(&f.storage, &ingest_payload(&f))
            .unwrap();

        assert_eq!(follow_ups.len(), 3);
        assert!(matches!(follow_ups[0], JobPayload::RunScenes { .. }));
        assert!(matches!(follow_ups[1], JobPayload::RunStyle { .. }));
        assert!(matches!(follow_ups[2], JobPayload::RunExtraction { .. }));

        // All three carry the same document and snapshot.
        let snap_ids: Vec<Uuid> = follow_ups
            .iter()
            .map(|p| match p {
                JobPayload::RunScenes { snapshot_id, .. }
                | JobPayload::RunStyle { snapshot_id, .. }
                | JobPayload::RunExtraction { snapshot_id, .. } => *snapshot_id,
                _ => unreachable!(),
            })
            .collect();
        assert!(snap_ids.iter().all(|id| *id == snap_ids[0]));
        assert!(follow_ups.iter().all(|p| p.document_id() == f.document_id));

        let state = f
            .storage
            .with(|conn| {
                stage::get_stage_state(conn, &f.document_id, Stage::Ingest)
                    .map_err(PipelineError::from)
            })
            .unwrap();
        assert_eq!(state, Some(StageState::Ok));
    }

    #[test]
    fn unchanged_reingest_does_not_fan_out() {
        let f = fixture_with_text("Stable text.");

        let first = f
            .orchestrator
            .dispatch(&f.storage, &ingest_payload(&f))
            .unwrap();
        assert_eq!(first.len(), 3);

        let second = f
            .orchestrator
            .dispatch(&f.storage, &ingest_payload(&f))
            .unwrap();
        assert!(second.is_empty(), "Unchanged hash must not re-trigger stages");
    }

    #[test]
    fn scenes_job_persists_segmentation() {
        let f = fixture_with_text("# One\nFirst scene.\n\n***\n\nSecond scene.\n");

        let follow_ups = f
            .orchestrator
            .dispatch(&f.storage, &ingest_payload(&f))
            .unwrap();
        f.orchestrator.dispatch(&f.storage, &follow_ups[0]).unwrap();

        let scenes = f
            .storage
            .with(|conn| {
                scene_repo_mod::list_scenes(conn, &f.document_id).map_err(PipelineError::from)
            })
            .unwrap();
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn extraction_fans_in_one_continuity_job_with_touched_entities() {
        let f = fixture_with_text("Mara's eyes were green. Tomas's hair was black.\n");

        let follow_ups = f
            .orchestrator
            .dispatch(&f.storage, &ingest_payload(&f))
            .unwrap();
        let continuity = f.orchestrator.dispatch(&f.storage, &follow_ups[2]).unwrap();

        assert_eq!(continuity.len(), 1);
        match &continuity[0] {
            JobPayload::RunContinuity { entity_ids, .. } => {
                assert_eq!(entity_ids.len(), 2, "Mara and Tomas were touched");
            }
            other => panic!("Expected RunContinuity, got: {other:?}"),
        }
    }

    #[test]
    fn extraction_rerun_does_not_duplicate_claims() {
        let f = fixture_with_text("Mara's eyes were green.\n");

        let follow_ups = f
            .orchestrator
            .dispatch(&f.storage, &ingest_payload(&f))
            .unwrap();
        f.orchestrator.dispatch(&f.storage, &follow_ups[2]).unwrap();
        // Queue redelivery after a crash: same job, same inputs.
        f.orchestrator.dispatch(&f.storage, &follow_ups[2]).unwrap();

        let count: i64 = f
            .storage
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM claims", [], |r| r.get(0))
                    .map_err(crate::db::DatabaseError::from)
                    .map_err(PipelineError::from)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn continuity_flags_conflicts_without_duplicating_issues() {
        let f = fixture_with_text("Mara's eyes were green. Later, Mara's eyes were grey.\n");

        let follow_ups = f
            .orchestrator
            .dispatch(&f.storage, &ingest_payload(&f))
            .unwrap();
        let continuity = f.orchestrator.dispatch(&f.storage, &follow_ups[2]).unwrap();

        f.orchestrator.dispatch(&f.storage, &continuity[0]).unwrap();
        f.orchestrator.dispatch(&f.storage, &continuity[0]).unwrap();

        let issues = f
            .storage
            .with(|conn| {
                crate::db::repository::continuity::list_open_issues(conn, &f.project_id)
                    .map_err(PipelineError::from)
            })
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "eyes");
        assert!(issues[0].description.contains("green"));
        assert!(issues[0].description.contains("grey"));
    }

    #[test]
    fn failed_stage_is_recorded_as_failed() {
        let f = fixture_with_text("irrelevant");

        let payload = JobPayload::RunScenes {
            project_id: f.project_id,
            document_id: f.document_id,
            snapshot_id: Uuid::new_v4(),
            root_path: PathBuf::from(f.root.path()),
        };
        let result = f.orchestrator.dispatch(&f.storage, &payload);
        assert!(matches!(result, Err(PipelineError::SnapshotNotFound(_))));

        let state = f
            .storage
            .with(|conn| {
                stage::get_stage_state(conn, &f.document_id, Stage::Scenes)
                    .map_err(PipelineError::from)
            })
            .unwrap();
        assert_eq!(state, Some(StageState::Failed));
    }

    #[test]
    fn paragraph_bounds_cover_the_containing_paragraph() {
        let text = "First para.\n\nSecond para with Mara.\n\nThird.";
        let quote = text.find("Mara").unwrap();
        let (start, end) = paragraph_bounds(text, quote, quote + 4);
        assert_eq!(&text[start..end], "Second para with Mara.");
    }
}
