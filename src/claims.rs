//! Claim confirmation.
//!
//! Confirmation runs synchronously in the caller, never through the job
//! queue: the author is looking at the claim and expects the answer now.
//! History stays append-only — confirming writes a new `confirmed` row
//! and flips everything else on that `(entity, field)` to `superseded`.

use thiserror::Error;
use uuid::Uuid;

use crate::db::repository::{audit, claim as claim_repo, now_ts};
use crate::db::DatabaseError;
use crate::models::{Claim, ClaimEvidence, ClaimStatus};
use crate::storage::StorageHandle;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Claim not found: {0}")]
    ClaimNotFound(Uuid),

    #[error("Claim {0} has no supporting evidence and cannot be confirmed")]
    UnevidencedClaim(Uuid),
}

/// Confirm `value` for `(entity, field)` as author-verified truth,
/// backed by the evidence already attached to `source_claim_id`.
///
/// Requires at least one evidence row on the source claim. Writes a new
/// claim with status `confirmed` and confidence 1.0, copies the source's
/// evidence onto it verbatim, and supersedes every other claim on the
/// same `(entity, field)` — the source included.
pub fn confirm_claim(
    storage: &StorageHandle,
    entity_id: &Uuid,
    field: &str,
    value: &str,
    source_claim_id: &Uuid,
) -> Result<Claim, ClaimError> {
    storage.with(|conn| {
        let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;

        let source = claim_repo::get_claim(&tx, source_claim_id)?
            .ok_or(ClaimError::ClaimNotFound(*source_claim_id))?;

        let evidence = claim_repo::evidence_for_claim(&tx, source_claim_id)?;
        if evidence.is_empty() {
            return Err(ClaimError::UnevidencedClaim(*source_claim_id));
        }

        let now = now_ts();
        let confirmed = Claim {
            id: Uuid::new_v4(),
            entity_id: *entity_id,
            field: field.to_string(),
            value: value.to_string(),
            status: ClaimStatus::Confirmed,
            confidence: 1.0,
            supersedes_claim_id: Some(source.id),
            created_at: now,
            updated_at: now,
        };
        claim_repo::insert_claim(&tx, &confirmed)?;

        for row in &evidence {
            claim_repo::insert_evidence(
                &tx,
                &ClaimEvidence {
                    claim_id: confirmed.id,
                    chunk_id: row.chunk_id,
                    quote_start: row.quote_start,
                    quote_end: row.quote_end,
                },
            )?;
        }

        let superseded =
            claim_repo::supersede_other_claims(&tx, entity_id, field, &confirmed.id)?;

        if let Some(entity) = claim_repo::get_entity(&tx, entity_id)? {
            audit::log_event(
                &tx,
                &entity.project_id,
                "info",
                "claim_confirmed",
                &serde_json::json!({
                    "claim_id": confirmed.id.to_string(),
                    "source_claim_id": source.id.to_string(),
                    "field": field,
                    "superseded": superseded,
                }),
            )?;
        }

        tx.commit().map_err(DatabaseError::from)?;

        tracing::info!(
            claim_id = %confirmed.id,
            source = %source.id,
            field = field,
            superseded = superseded,
            "Claim confirmed"
        );
        Ok(confirmed)
    })
}
