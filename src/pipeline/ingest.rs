//! Ingest stage: read the file from disk, snapshot it (hash-deduplicated),
//! and compute the changed character range against the previous snapshot.

use std::path::Path;

use rusqlite::Connection;
use uuid::Uuid;

use super::PipelineError;
use crate::db::repository::{document, snapshot};

/// Outcome of one ingest run. `changed` is `None` when the content hash
/// was unchanged — no downstream stage needs to run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub snapshot_id: Uuid,
    pub snapshot_version: i64,
    pub created: bool,
    pub changed: Option<(usize, usize)>,
}

/// Byte range `[start, end)` in `new` that differs from `old`, computed
/// as common-prefix / common-suffix trim on char boundaries. `None` when
/// the texts are identical; a pure deletion yields an empty range at the
/// deletion point.
pub fn changed_range(old: &str, new: &str) -> Option<(usize, usize)> {
    if old == new {
        return None;
    }

    let old_b = old.as_bytes();
    let new_b = new.as_bytes();

    let mut prefix = 0;
    let max_prefix = old_b.len().min(new_b.len());
    while prefix < max_prefix && old_b[prefix] == new_b[prefix] {
        prefix += 1;
    }
    while prefix > 0 && !new.is_char_boundary(prefix) {
        prefix -= 1;
    }

    let mut suffix = 0;
    let max_suffix = (old_b.len() - prefix).min(new_b.len() - prefix);
    while suffix < max_suffix && old_b[old_b.len() - 1 - suffix] == new_b[new_b.len() - 1 - suffix] {
        suffix += 1;
    }
    while suffix > 0 && !new.is_char_boundary(new_b.len() - suffix) {
        suffix -= 1;
    }

    Some((prefix, new_b.len() - suffix))
}

/// Run ingest for one document: read, snapshot, diff. Safe to re-run —
/// an unchanged file is a no-op thanks to the hash-deduplicated insert.
pub fn run_ingest(
    conn: &Connection,
    document_id: &Uuid,
    root_path: &Path,
    rel_path: &str,
) -> Result<IngestOutcome, PipelineError> {
    let full_text = std::fs::read_to_string(root_path.join(rel_path))?;

    let previous = snapshot::latest_snapshot(conn, document_id)?;
    let inserted = snapshot::insert_snapshot(conn, document_id, &full_text)?;

    // The file is demonstrably present again.
    if let Some(doc) = document::get_document(conn, document_id)? {
        if doc.missing {
            document::set_document_missing(conn, document_id, false)?;
        }
    }

    let changed = if !inserted.created {
        None
    } else {
        match &previous {
            Some(prev) => changed_range(&prev.full_text, &full_text),
            None => Some((0, full_text.len())),
        }
    };

    tracing::info!(
        document_id = %document_id,
        version = inserted.snapshot.version,
        created = inserted.created,
        changed = ?changed,
        "Ingest complete"
    );

    Ok(IngestOutcome {
        snapshot_id: inserted.snapshot.id,
        snapshot_version: inserted.snapshot.version,
        created: inserted.created,
        changed,
    })
}
