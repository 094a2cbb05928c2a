//! Filesystem watcher feeding the ingest queue.
//!
//! `notify` delivers raw events on its own thread; they are forwarded
//! into tokio over a bounded channel and debounced per path, so a burst
//! of editor saves collapses into one ingest job per document. Unlinks
//! skip the debounce and mark the document missing immediately.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{PROJECT_DATA_DIR, WATCH_DEBOUNCE_MS};
use crate::db::repository::document;
use crate::pipeline::JobPayload;
use crate::queue::DurableQueue;
use crate::storage::StorageHandle;

const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Is this a file the pipeline cares about?
pub(crate) fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DOCUMENT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Paths under the project data directory are ours; watching them would
/// loop the watcher back onto its own database writes.
fn is_internal(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == PROJECT_DATA_DIR)
}

type PendingMap = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

pub struct DocumentWatcher {
    // Held only to keep the native watcher registered until stop.
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
    pending: PendingMap,
}

impl DocumentWatcher {
    pub fn start(
        root: &Path,
        project_id: Uuid,
        storage: StorageHandle,
        queue: Arc<DurableQueue>,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel::<notify::Event>(256);

        let mut watcher = notify::recommended_watcher(move |res| match res {
            Ok(event) => {
                // Dropped events on a full channel are fine: whatever
                // changed will surface again on the next save.
                let _ = tx.blocking_send(event);
            }
            Err(e) => tracing::warn!(error = %e, "Watcher backend error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::debug!(root = %root.display(), "Watching project root");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let forwarder = tokio::spawn(forward_events(
            rx,
            root.to_path_buf(),
            project_id,
            storage,
            queue,
            pending.clone(),
        ));

        Ok(Self {
            _watcher: watcher,
            forwarder,
            pending,
        })
    }

    /// Unregister the native watcher and cancel pending debounce timers.
    pub fn stop(self) {
        drop(self._watcher);
        self.forwarder.abort();
        for (_, timer) in lock_pending(&self.pending).drain() {
            timer.abort();
        }
    }
}

async fn forward_events(
    mut rx: mpsc::Receiver<notify::Event>,
    root: PathBuf,
    project_id: Uuid,
    storage: StorageHandle,
    queue: Arc<DurableQueue>,
    pending: PendingMap,
) {
    while let Some(event) = rx.recv().await {
        for path in &event.paths {
            if is_internal(path) || !is_document(path) {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            let rel = rel.to_string_lossy().into_owned();

            if path.exists() {
                schedule_ingest(&root, project_id, &storage, &queue, &pending, rel);
            } else {
                handle_unlink(project_id, &storage, &queue, &pending, &root, rel);
            }
        }
    }
}

/// (Re)arm the debounce timer for one document. A newer event on the
/// same path replaces the older timer, so only the final save in a burst
/// reaches the queue.
fn schedule_ingest(
    root: &Path,
    project_id: Uuid,
    storage: &StorageHandle,
    queue: &Arc<DurableQueue>,
    pending: &PendingMap,
    rel: String,
) {
    let mut timers = lock_pending(pending);
    if let Some(old) = timers.remove(&rel) {
        old.abort();
    }

    let timer = tokio::spawn({
        let root = root.to_path_buf();
        let storage = storage.clone();
        let queue = queue.clone();
        let pending = pending.clone();
        let rel = rel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(WATCH_DEBOUNCE_MS)).await;
            lock_pending(&pending).remove(&rel);

            let enqueued = storage
                .with(|conn| document::ensure_document(conn, &project_id, &rel))
                .map_err(crate::queue::QueueError::from)
                .and_then(|doc| {
                    queue.enqueue(&JobPayload::IngestDocument {
                        project_id,
                        document_id: doc.id,
                        root_path: root,
                        rel_path: rel.clone(),
                    })
                });
            match enqueued {
                Ok(job_id) => tracing::debug!(rel_path = %rel, job_id, "Change debounced, ingest queued"),
                Err(e) => tracing::warn!(rel_path = %rel, error = %e, "Failed to queue ingest"),
            }
        }
    });
    timers.insert(rel, timer);
}

/// A deleted file is flagged missing right away; any debounce timer or
/// queued ingest for it is dropped.
fn handle_unlink(
    project_id: Uuid,
    storage: &StorageHandle,
    queue: &Arc<DurableQueue>,
    pending: &PendingMap,
    root: &Path,
    rel: String,
) {
    if let Some(timer) = lock_pending(pending).remove(&rel) {
        timer.abort();
    }

    let result = storage.with(|conn| {
        let Some(doc) = document::get_document_by_path(conn, &project_id, &rel)? else {
            return Ok::<_, crate::db::DatabaseError>(None);
        };
        if !doc.missing {
            document::set_document_missing(conn, &doc.id, true)?;
        }
        Ok(Some(doc.id))
    });

    match result {
        Ok(Some(document_id)) => {
            tracing::info!(rel_path = %rel, "Document removed, marked missing");
            let stale_ingest = JobPayload::IngestDocument {
                project_id,
                document_id,
                root_path: root.to_path_buf(),
                rel_path: rel,
            };
            if let Err(e) = queue.cancel(&stale_ingest) {
                tracing::warn!(error = %e, "Failed to cancel stale ingest");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(rel_path = %rel, error = %e, "Failed to mark document missing"),
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
