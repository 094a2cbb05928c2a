//! Queue table operations.
//!
//! The queue guarantees at most one row per dedupe key. All timing columns
//! are epoch milliseconds supplied by the caller so tests can drive the
//! clock explicitly.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{col_enum, col_uuid};
use crate::db::DatabaseError;
use crate::models::{Job, JobKind, JobStatus};

const JOB_COLUMNS: &str =
    "id, project_id, kind, payload, dedupe_key, status, attempts, next_run_at, created_at, updated_at";

/// Insert or replace the job row for `dedupe_key`. Returns the row id.
///
/// - No existing row: insert `queued`, `attempts=0`, `next_run_at=now`.
/// - Existing `running` row: the in-flight job is now stale — replace the
///   payload, increment `attempts`, reset to `queued` with
///   `next_run_at=now` so the newer payload is reprocessed.
/// - Existing `queued`/`failed` row: replace the payload only; attempts
///   and the retry schedule are left alone.
pub fn upsert_job(
    conn: &Connection,
    project_id: &Uuid,
    kind: JobKind,
    payload: &str,
    dedupe_key: &str,
    now: i64,
) -> Result<i64, DatabaseError> {
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, status FROM jobs WHERE dedupe_key = ?1",
            params![dedupe_key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO jobs (project_id, kind, payload, dedupe_key, status, attempts, next_run_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?5, ?5)",
                params![project_id.to_string(), kind.as_str(), payload, dedupe_key, now],
            )?;
            Ok(conn.last_insert_rowid())
        }
        Some((id, status)) if status == JobStatus::Running.as_str() => {
            conn.execute(
                "UPDATE jobs SET payload = ?2, attempts = attempts + 1,
                 status = 'queued', next_run_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![id, payload, now],
            )?;
            Ok(id)
        }
        Some((id, _)) => {
            conn.execute(
                "UPDATE jobs SET payload = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, payload, now],
            )?;
            Ok(id)
        }
    }
}

/// Claim the next eligible job: smallest `next_run_at <= now` among
/// `queued`/`failed` rows, tie-break earliest `created_at` then id.
/// Marks it `running` and increments `attempts`.
pub fn claim_next(conn: &Connection, now: i64) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status IN ('queued', 'failed') AND next_run_at <= ?1
                 ORDER BY next_run_at ASC, created_at ASC, id ASC
                 LIMIT 1"
            ),
            params![now],
            job_from_row,
        )
        .optional()?;

    let Some(mut job) = row else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?2
         WHERE id = ?1",
        params![job.id, now],
    )?;

    job.status = JobStatus::Running;
    job.attempts += 1;
    job.updated_at = now;
    Ok(Some(job))
}

/// Delete a completed job. Success is terminal; no history is retained.
pub fn complete(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
    Ok(())
}

/// Mark a job failed with a caller-computed backoff deadline. The attempt
/// increment already happened at claim time.
pub fn fail(conn: &Connection, id: i64, next_run_at: i64, now: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status = 'failed', next_run_at = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, next_run_at, now],
    )?;
    Ok(())
}

/// Delete a job only if it is still `queued`. Running jobs cannot be
/// cancelled.
pub fn cancel(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM jobs WHERE id = ?1 AND status = 'queued'",
        params![id],
    )?;
    Ok(deleted > 0)
}

/// Force all `running` rows back to `queued`. Called once at queue start
/// to recover jobs a crashed process left in flight.
pub fn reset_running(conn: &Connection, now: i64) -> Result<usize, DatabaseError> {
    let reset = conn.execute(
        "UPDATE jobs SET status = 'queued', updated_at = ?1 WHERE status = 'running'",
        params![now],
    )?;
    Ok(reset)
}

/// Count of outstanding (queued or failed) jobs.
pub fn depth(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'failed')",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Read-only view of a project's queued jobs, in claim order.
pub fn list_queued(conn: &Connection, project_id: &Uuid) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs
         WHERE project_id = ?1 AND status = 'queued'
         ORDER BY next_run_at ASC, created_at ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map(params![project_id.to_string()], job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_job(conn: &Connection, id: i64) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_job_by_key(conn: &Connection, dedupe_key: &str) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE dedupe_key = ?1"),
            params![dedupe_key],
            job_from_row,
        )
        .optional()?;
    Ok(row)
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let project_id: String = row.get(1)?;
    let status: String = row.get(5)?;
    Ok(Job {
        id: row.get(0)?,
        project_id: col_uuid(1, &project_id)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        dedupe_key: row.get(4)?,
        status: col_enum(5, &status)?,
        attempts: row.get(6)?,
        next_run_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn pid() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn upsert_inserts_new_row_queued() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        let id = upsert_job(&conn, &project, JobKind::RunScenes, "{}", "scenes:a", 100).unwrap();
        let job = get_job(&conn, id).unwrap().unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.next_run_at, 100);
        assert_eq!(job.dedupe_key, "scenes:a");
    }

    #[test]
    fn upsert_on_running_row_increments_attempts_and_requeues() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        upsert_job(&conn, &project, JobKind::RunScenes, "\"old\"", "k", 100).unwrap();
        let claimed = claim_next(&conn, 100).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);

        // Stale-in-flight supersession: newer payload replaces the old.
        let id = upsert_job(&conn, &project, JobKind::RunScenes, "\"new\"", "k", 200).unwrap();
        assert_eq!(id, claimed.id, "Same dedupe key, same row");

        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.payload, "\"new\"");
        assert_eq!(job.next_run_at, 200);

        // A subsequent claim processes the new payload, never the old.
        let reclaimed = claim_next(&conn, 200).unwrap().unwrap();
        assert_eq!(reclaimed.payload, "\"new\"");
    }

    #[test]
    fn upsert_on_queued_row_replaces_payload_without_attempt_bump() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        let id = upsert_job(&conn, &project, JobKind::RunStyle, "\"a\"", "k", 100).unwrap();
        let same = upsert_job(&conn, &project, JobKind::RunStyle, "\"b\"", "k", 200).unwrap();
        assert_eq!(id, same);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1, "At most one row per dedupe key");

        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.attempts, 0);
        assert_eq!(job.payload, "\"b\"");
    }

    #[test]
    fn claim_orders_by_next_run_at_then_created_at() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        upsert_job(&conn, &project, JobKind::RunScenes, "{}", "later", 50).unwrap();
        conn.execute("UPDATE jobs SET next_run_at = 300 WHERE dedupe_key = 'later'", [])
            .unwrap();
        upsert_job(&conn, &project, JobKind::RunScenes, "{}", "sooner", 60).unwrap();
        conn.execute("UPDATE jobs SET next_run_at = 100 WHERE dedupe_key = 'sooner'", [])
            .unwrap();

        // Smallest next_run_at wins regardless of enqueue order.
        let first = claim_next(&conn, 500).unwrap().unwrap();
        assert_eq!(first.dedupe_key, "sooner");
        let second = claim_next(&conn, 500).unwrap().unwrap();
        assert_eq!(second.dedupe_key, "later");
    }

    #[test]
    fn claim_skips_future_jobs() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        let id = upsert_job(&conn, &project, JobKind::RunScenes, "{}", "k", 100).unwrap();
        fail(&conn, id, 1_000, 100).unwrap();

        assert!(claim_next(&conn, 999).unwrap().is_none());
        let job = claim_next(&conn, 1_000).unwrap().unwrap();
        assert_eq!(job.id, id);
    }

    #[test]
    fn fail_preserves_attempts() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        upsert_job(&conn, &project, JobKind::RunScenes, "{}", "k", 100).unwrap();
        let claimed = claim_next(&conn, 100).unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);

        fail(&conn, claimed.id, 2_100, 100).unwrap();
        let job = get_job(&conn, claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1, "Increment already happened at claim");
        assert_eq!(job.next_run_at, 2_100);
    }

    #[test]
    fn complete_deletes_row() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        let id = upsert_job(&conn, &project, JobKind::RunScenes, "{}", "k", 100).unwrap();
        complete(&conn, id).unwrap();
        assert!(get_job(&conn, id).unwrap().is_none());
        assert_eq!(depth(&conn).unwrap(), 0);
    }

    #[test]
    fn cancel_only_removes_queued_rows() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        let id = upsert_job(&conn, &project, JobKind::RunScenes, "{}", "k", 100).unwrap();
        assert!(cancel(&conn, id).unwrap());
        assert!(!cancel(&conn, id).unwrap(), "Already gone");

        let id2 = upsert_job(&conn, &project, JobKind::RunScenes, "{}", "k2", 100).unwrap();
        claim_next(&conn, 100).unwrap().unwrap();
        assert!(!cancel(&conn, id2).unwrap(), "Running jobs cannot be cancelled");
    }

    #[test]
    fn reset_running_requeues_crashed_jobs() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        upsert_job(&conn, &project, JobKind::RunScenes, "{}", "k", 100).unwrap();
        let claimed = claim_next(&conn, 100).unwrap().unwrap();

        // Simulate a crash: row left running, then recovery on restart.
        let reset = reset_running(&conn, 200).unwrap();
        assert_eq!(reset, 1);

        let job = get_job(&conn, claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(claim_next(&conn, 200).unwrap().is_some(), "Claimable again");
    }

    #[test]
    fn depth_counts_queued_and_failed() {
        let conn = open_memory_database().unwrap();
        let project = pid();

        upsert_job(&conn, &project, JobKind::RunScenes, "{}", "a", 100).unwrap();
        let b = upsert_job(&conn, &project, JobKind::RunStyle, "{}", "b", 100).unwrap();
        fail(&conn, b, 500, 100).unwrap();
        upsert_job(&conn, &project, JobKind::RunExtraction, "{}", "c", 100).unwrap();
        claim_next(&conn, 100).unwrap();

        // one queued + one failed; the running one is excluded
        assert_eq!(depth(&conn).unwrap(), 2);
    }

    #[test]
    fn list_queued_is_scoped_to_project() {
        let conn = open_memory_database().unwrap();
        let p1 = pid();
        let p2 = pid();

        upsert_job(&conn, &p1, JobKind::RunScenes, "{}", "a", 100).unwrap();
        upsert_job(&conn, &p2, JobKind::RunScenes, "{}", "b", 100).unwrap();

        let listed = list_queued(&conn, &p1).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].dedupe_key, "a");
    }

    #[test]
    fn unrecognized_kind_is_returned_as_stored() {
        let conn = open_memory_database().unwrap();

        // A kind written by a newer (or corrupted) schema must reach the
        // run loop verbatim so it can be failed as unknown, not reshaped
        // into some known kind.
        conn.execute(
            "INSERT INTO jobs (project_id, kind, payload, dedupe_key, status, attempts, next_run_at, created_at, updated_at)
             VALUES (?1, 'compile_epub', '{}', 'epub:x', 'queued', 0, 100, 100, 100)",
            params![pid().to_string()],
        )
        .unwrap();

        let job = claim_next(&conn, 200).unwrap().unwrap();
        assert_eq!(job.kind, "compile_epub");
    }

    #[test]
    fn corrupt_project_id_is_an_error_not_a_default() {
        let conn = open_memory_database().unwrap();

        conn.execute(
            "INSERT INTO jobs (project_id, kind, payload, dedupe_key, status, attempts, next_run_at, created_at, updated_at)
             VALUES ('not-a-uuid', 'run_scenes', '{}', 'scenes:x', 'queued', 0, 100, 100, 100)",
            [],
        )
        .unwrap();

        assert!(claim_next(&conn, 200).is_err());
    }
}
