//! Claim and evidence rows.
//!
//! Claims are append-only: rows are inserted, never deleted, and the only
//! in-place update permitted is the status transition to `superseded`
//! (see `claims::confirm_claim` for the one writer allowed to do that).

use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{col_enum, col_uuid, fmt_ts, now_ts, parse_ts};
use crate::db::DatabaseError;
use crate::models::{Claim, ClaimEvidence, ClaimStatus, Entity, EntityKind};

const CLAIM_COLUMNS: &str =
    "id, entity_id, field, value, status, confidence, supersedes_claim_id, created_at, updated_at";

// ── Entities ─────────────────────────────────────────────

/// Look up an entity by name within a project, creating it on first sight.
pub fn ensure_entity(
    conn: &Connection,
    project_id: &Uuid,
    name: &str,
    kind: EntityKind,
) -> Result<Entity, DatabaseError> {
    let existing = conn
        .query_row(
            "SELECT id, kind, created_at FROM entities WHERE project_id = ?1 AND name = ?2",
            params![project_id.to_string(), name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    if let Some((id, kind_str, created_at)) = existing {
        return Ok(Entity {
            id: Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            project_id: *project_id,
            name: name.to_string(),
            kind: EntityKind::from_str(&kind_str)?,
            created_at: parse_ts(&created_at),
        });
    }

    let entity = Entity {
        id: Uuid::new_v4(),
        project_id: *project_id,
        name: name.to_string(),
        kind,
        created_at: now_ts(),
    };
    conn.execute(
        "INSERT INTO entities (id, project_id, name, kind, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entity.id.to_string(),
            entity.project_id.to_string(),
            entity.name,
            entity.kind.as_str(),
            fmt_ts(&entity.created_at),
        ],
    )?;
    Ok(entity)
}

pub fn get_entity(conn: &Connection, id: &Uuid) -> Result<Option<Entity>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, project_id, name, kind, created_at FROM entities WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let id: String = row.get(0)?;
                let project_id: String = row.get(1)?;
                let kind: String = row.get(3)?;
                let created_at: String = row.get(4)?;
                Ok(Entity {
                    id: col_uuid(0, &id)?,
                    project_id: col_uuid(1, &project_id)?,
                    name: row.get(2)?,
                    kind: col_enum(3, &kind)?,
                    created_at: parse_ts(&created_at),
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ── Claims ───────────────────────────────────────────────

pub fn insert_claim(conn: &Connection, claim: &Claim) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO claims (id, entity_id, field, value, status, confidence, supersedes_claim_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            claim.id.to_string(),
            claim.entity_id.to_string(),
            claim.field,
            claim.value,
            claim.status.as_str(),
            claim.confidence,
            claim.supersedes_claim_id.map(|id| id.to_string()),
            fmt_ts(&claim.created_at),
            fmt_ts(&claim.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_claim(conn: &Connection, id: &Uuid) -> Result<Option<Claim>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE id = ?1"),
            params![id.to_string()],
            claim_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Full history for one `(entity, field)`, oldest first.
pub fn claims_for_entity_field(
    conn: &Connection,
    entity_id: &Uuid,
    field: &str,
) -> Result<Vec<Claim>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLAIM_COLUMNS} FROM claims
         WHERE entity_id = ?1 AND field = ?2 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map(params![entity_id.to_string(), field], claim_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every non-superseded claim on an entity, across all fields.
pub fn active_claims_for_entity(
    conn: &Connection,
    entity_id: &Uuid,
) -> Result<Vec<Claim>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLAIM_COLUMNS} FROM claims
         WHERE entity_id = ?1 AND status != 'superseded'
         ORDER BY field ASC, created_at ASC"
    ))?;
    let rows = stmt
        .query_map(params![entity_id.to_string()], claim_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Find an active (non-superseded) claim asserting exactly this value.
/// Used by extraction to keep re-runs idempotent.
pub fn find_active_claim(
    conn: &Connection,
    entity_id: &Uuid,
    field: &str,
    value: &str,
) -> Result<Option<Claim>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {CLAIM_COLUMNS} FROM claims
                 WHERE entity_id = ?1 AND field = ?2 AND value = ?3 AND status != 'superseded'
                 ORDER BY created_at ASC LIMIT 1"
            ),
            params![entity_id.to_string(), field, value],
            claim_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Mark every claim for `(entity, field)` other than `keep_id` superseded.
/// Returns the number of rows transitioned.
pub fn supersede_other_claims(
    conn: &Connection,
    entity_id: &Uuid,
    field: &str,
    keep_id: &Uuid,
) -> Result<usize, DatabaseError> {
    let superseded = conn.execute(
        "UPDATE claims SET status = 'superseded', updated_at = ?4
         WHERE entity_id = ?1 AND field = ?2 AND id != ?3 AND status != 'superseded'",
        params![
            entity_id.to_string(),
            field,
            keep_id.to_string(),
            fmt_ts(&now_ts()),
        ],
    )?;
    Ok(superseded)
}

// ── Evidence ─────────────────────────────────────────────

pub fn insert_evidence(conn: &Connection, evidence: &ClaimEvidence) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO claim_evidence (claim_id, chunk_id, quote_start, quote_end)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            evidence.claim_id.to_string(),
            evidence.chunk_id.to_string(),
            evidence.quote_start,
            evidence.quote_end,
        ],
    )?;
    Ok(())
}

pub fn evidence_for_claim(
    conn: &Connection,
    claim_id: &Uuid,
) -> Result<Vec<ClaimEvidence>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT claim_id, chunk_id, quote_start, quote_end FROM claim_evidence
         WHERE claim_id = ?1 ORDER BY chunk_id, quote_start",
    )?;
    let rows = stmt
        .query_map(params![claim_id.to_string()], |row| {
            let claim_id: String = row.get(0)?;
            let chunk_id: String = row.get(1)?;
            Ok(ClaimEvidence {
                claim_id: col_uuid(0, &claim_id)?,
                chunk_id: col_uuid(1, &chunk_id)?,
                quote_start: row.get(2)?,
                quote_end: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn evidence_count(conn: &Connection, claim_id: &Uuid) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM claim_evidence WHERE claim_id = ?1",
        params![claim_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn claim_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    let id: String = row.get(0)?;
    let entity_id: String = row.get(1)?;
    let status: String = row.get(4)?;
    let supersedes: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(Claim {
        id: col_uuid(0, &id)?,
        entity_id: col_uuid(1, &entity_id)?,
        field: row.get(2)?,
        value: row.get(3)?,
        status: col_enum(4, &status)?,
        confidence: row.get(5)?,
        supersedes_claim_id: supersedes.as_deref().map(|s| col_uuid(6, s)).transpose()?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::project::ensure_project;

    fn inferred_claim(entity_id: Uuid, field: &str, value: &str) -> Claim {
        let now = now_ts();
        Claim {
            id: Uuid::new_v4(),
            entity_id,
            field: field.into(),
            value: value.into(),
            status: ClaimStatus::Inferred,
            confidence: 0.6,
            supersedes_claim_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn ensure_entity_reuses_by_name() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();

        let a = ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).unwrap();
        let b = ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn supersede_leaves_only_the_kept_claim_active() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();
        let entity = ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).unwrap();

        let old = inferred_claim(entity.id, "eyes", "green");
        let newer = inferred_claim(entity.id, "eyes", "grey");
        insert_claim(&conn, &old).unwrap();
        insert_claim(&conn, &newer).unwrap();

        let superseded = supersede_other_claims(&conn, &entity.id, "eyes", &newer.id).unwrap();
        assert_eq!(superseded, 1);

        let history = claims_for_entity_field(&conn, &entity.id, "eyes").unwrap();
        assert_eq!(history.len(), 2, "History is append-only");
        assert_eq!(
            get_claim(&conn, &old.id).unwrap().unwrap().status,
            ClaimStatus::Superseded
        );
        assert_eq!(
            get_claim(&conn, &newer.id).unwrap().unwrap().status,
            ClaimStatus::Inferred
        );
    }

    #[test]
    fn evidence_requires_existing_chunk() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();
        let entity = ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).unwrap();
        let claim = inferred_claim(entity.id, "eyes", "green");
        insert_claim(&conn, &claim).unwrap();

        // FK violation is the invariant-enforcement mechanism here.
        let dangling = ClaimEvidence {
            claim_id: claim.id,
            chunk_id: Uuid::new_v4(),
            quote_start: 0,
            quote_end: 5,
        };
        assert!(insert_evidence(&conn, &dangling).is_err());
    }

    #[test]
    fn evidence_keeps_distinct_quote_ranges_in_one_chunk() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();
        let entity = ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).unwrap();
        let claim = inferred_claim(entity.id, "eyes", "green");
        insert_claim(&conn, &claim).unwrap();

        let doc = crate::db::repository::document::ensure_document(
            &conn,
            &project.id,
            "chapters/01.md",
        )
        .unwrap();
        let snapshot = crate::db::repository::snapshot::insert_snapshot(
            &conn,
            &doc.id,
            "Her green eyes narrowed. Green, he thought again.",
        )
        .unwrap()
        .snapshot;
        let chunk =
            crate::db::repository::chunk::ensure_chunk(&conn, &doc.id, &snapshot.id, 0, 49)
                .unwrap();

        for (start, end) in [(4, 14), (25, 30), (25, 30)] {
            insert_evidence(
                &conn,
                &ClaimEvidence {
                    claim_id: claim.id,
                    chunk_id: chunk.id,
                    quote_start: start,
                    quote_end: end,
                },
            )
            .unwrap();
        }

        let evidence = evidence_for_claim(&conn, &claim.id).unwrap();
        assert_eq!(evidence.len(), 2, "Only the exact duplicate is dropped");
        assert_eq!(evidence[0].quote_start, 4);
        assert_eq!(evidence[1].quote_start, 25);
    }

    #[test]
    fn unknown_entity_kind_in_db_is_an_error_not_other() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();
        let entity = ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).unwrap();

        conn.execute(
            "UPDATE entities SET kind = 'dragon' WHERE id = ?1",
            params![entity.id.to_string()],
        )
        .unwrap();

        assert!(get_entity(&conn, &entity.id).is_err());
        assert!(ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).is_err());
    }

    #[test]
    fn find_active_claim_ignores_superseded_rows() {
        let conn = open_memory_database().unwrap();
        let project = ensure_project(&conn, "/tmp/novel").unwrap();
        let entity = ensure_entity(&conn, &project.id, "Mara", EntityKind::Character).unwrap();

        let claim = inferred_claim(entity.id, "eyes", "green");
        insert_claim(&conn, &claim).unwrap();
        assert!(find_active_claim(&conn, &entity.id, "eyes", "green")
            .unwrap()
            .is_some());

        let replacement = inferred_claim(entity.id, "eyes", "grey");
        insert_claim(&conn, &replacement).unwrap();
        supersede_other_claims(&conn, &entity.id, "eyes", &replacement.id).unwrap();

        assert!(find_active_claim(&conn, &entity.id, "eyes", "green")
            .unwrap()
            .is_none());
    }
}
