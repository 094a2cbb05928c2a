//! Project session lifecycle.
//!
//! A process holds at most one open project. [`SessionManager`] owns that
//! slot: `ensure_session` on the already-open root is a no-op, on a
//! different root it tears the old session down completely before the
//! new one comes up. Teardown is idempotent and never fails — errors are
//! logged and swallowed so shutdown cannot wedge on a broken disk.

mod watcher;

pub use watcher::DocumentWatcher;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config;
use crate::db::repository::{document, project};
use crate::db::DatabaseError;
use crate::pipeline::{JobPayload, PipelineOrchestrator};
use crate::queue::{DurableQueue, JobTicket, QueueError};
use crate::storage::StorageHandle;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Project root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// One open project: storage, queue worker, and filesystem watcher.
pub struct Session {
    root: PathBuf,
    project_id: Uuid,
    storage: StorageHandle,
    queue: Arc<DurableQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<DocumentWatcher>>,
}

impl Session {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    /// Queue an ingest for one document and get a ticket to await it.
    pub fn enqueue_ingest(&self, rel_path: &str) -> Result<JobTicket, SessionError> {
        let doc = self
            .storage
            .with(|conn| document::ensure_document(conn, &self.project_id, rel_path))?;
        let ticket = self.queue.enqueue_awaited(&JobPayload::IngestDocument {
            project_id: self.project_id,
            document_id: doc.id,
            root_path: self.root.clone(),
            rel_path: rel_path.to_string(),
        })?;
        Ok(ticket)
    }

    /// Stop the watcher, drain the worker, close storage. Safe to call
    /// more than once; errors are logged, never returned.
    pub async fn teardown(&self) {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.stop();
        }
        self.queue.shutdown();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Queue worker did not shut down cleanly");
            }
        }
        self.storage.close();
        tracing::info!(root = %self.root.display(), "Session closed");
    }
}

pub struct SessionManager {
    current: Mutex<Option<Arc<Session>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Open the project at `root`, reusing the live session when the
    /// root matches and replacing it (old session torn down first) when
    /// it does not.
    pub async fn ensure_session(&self, root: &Path) -> Result<Arc<Session>, SessionError> {
        if !root.is_dir() {
            return Err(SessionError::NotADirectory(root.to_path_buf()));
        }
        let root = root.canonicalize()?;

        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            if session.root == root {
                return Ok(session.clone());
            }
        }
        if let Some(previous) = current.take() {
            tracing::info!(
                old = %previous.root.display(),
                new = %root.display(),
                "Switching project root"
            );
            previous.teardown().await;
        }

        let session = Arc::new(open_session(&root)?);
        *current = Some(session.clone());
        Ok(session)
    }

    pub async fn current(&self) -> Option<Arc<Session>> {
        self.current.lock().await.clone()
    }

    /// Tear down the open session, if any.
    pub async fn close(&self) {
        if let Some(session) = self.current.lock().await.take() {
            session.teardown().await;
        }
    }
}

fn open_session(root: &Path) -> Result<Session, SessionError> {
    let db_path = config::project_db_path(root);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let storage = StorageHandle::open(&db_path)?;

    let project = storage.with(|conn| project::ensure_project(conn, &root.to_string_lossy()))?;

    let orchestrator = Arc::new(PipelineOrchestrator::with_default_analyzers());
    let queue = DurableQueue::open(storage.clone(), project.id, orchestrator)?;
    let worker = tokio::spawn(queue.clone().run());
    let watcher = DocumentWatcher::start(root, project.id, storage.clone(), queue.clone())?;

    scan_project(&storage, &queue, &project.id, root)?;

    tracing::info!(root = %root.display(), project_id = %project.id, "Session opened");
    Ok(Session {
        root: root.to_path_buf(),
        project_id: project.id,
        storage,
        queue,
        worker: Mutex::new(Some(worker)),
        watcher: Mutex::new(Some(watcher)),
    })
}

/// Startup reconciliation: queue an ingest for every document on disk
/// and flag known documents whose file is gone.
fn scan_project(
    storage: &StorageHandle,
    queue: &Arc<DurableQueue>,
    project_id: &Uuid,
    root: &Path,
) -> Result<(), SessionError> {
    let mut on_disk = BTreeSet::new();
    collect_documents(root, root, &mut on_disk)?;

    for rel_path in &on_disk {
        let doc = storage.with(|conn| document::ensure_document(conn, project_id, rel_path))?;
        queue.enqueue(&JobPayload::IngestDocument {
            project_id: *project_id,
            document_id: doc.id,
            root_path: root.to_path_buf(),
            rel_path: rel_path.clone(),
        })?;
    }

    let known = storage.with(|conn| document::list_documents(conn, project_id))?;
    for doc in known {
        if !doc.missing && !on_disk.contains(&doc.rel_path) {
            storage.with(|conn| document::set_document_missing(conn, &doc.id, true))?;
            tracing::info!(rel_path = %doc.rel_path, "Document gone since last session");
        }
    }

    tracing::debug!(documents = on_disk.len(), "Initial scan complete");
    Ok(())
}

fn collect_documents(
    root: &Path,
    dir: &Path,
    out: &mut BTreeSet<String>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        // Dotted entries cover the project data dir too.
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_documents(root, &path, out)?;
        } else if watcher::is_document(&path) {
            if let Ok(rel) = path.strip_prefix(root) {
                out.insert(rel.to_string_lossy().into_owned());
            }
        }
    }
    Ok(())
}
