//! Shared storage handle for one open project.
//!
//! A `StorageHandle` wraps the project's single SQLite connection behind a
//! mutex so the queue run loop and synchronous request handlers can share
//! it. `close()` takes the connection out; any use afterwards fails with
//! `DatabaseError::HandleClosed` rather than silently succeeding.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::db::{self, DatabaseError};

#[derive(Clone)]
pub struct StorageHandle {
    inner: Arc<Mutex<Option<Connection>>>,
}

impl StorageHandle {
    /// Open (and migrate) the project database at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = db::open_database(path)?;
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = db::open_memory_database()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Run `f` against the connection. Errors with `HandleClosed` after
    /// `close()`. The lock is held for the duration of `f`; callers must
    /// not hold it across await points.
    pub fn with<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        let guard = self.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(E::from(DatabaseError::HandleClosed)),
        }
    }

    /// Close the handle. Idempotent; the connection is dropped here and
    /// every later `with` call fails loudly.
    pub fn close(&self) {
        let mut guard = self.lock();
        if let Some(conn) = guard.take() {
            // rusqlite returns the connection on close failure; either way
            // the handle is unusable afterwards.
            if let Err((_conn, e)) = conn.close() {
                tracing::warn!(error = %e, "Storage handle close reported an error");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A poisoned lock means a panic mid-statement; the connection is
        // still structurally valid for shutdown paths.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_runs_against_open_connection() {
        let storage = StorageHandle::in_memory().unwrap();
        let count: i64 = storage
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
                    .map_err(DatabaseError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn use_after_close_fails_loudly() {
        let storage = StorageHandle::in_memory().unwrap();
        storage.close();
        assert!(storage.is_closed());

        let result: Result<i64, DatabaseError> = storage.with(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get(0))
                .map_err(DatabaseError::from)
        });
        match result {
            Err(DatabaseError::HandleClosed) => {}
            other => panic!("Expected HandleClosed, got: {other:?}"),
        }
    }

    #[test]
    fn close_is_idempotent() {
        let storage = StorageHandle::in_memory().unwrap();
        storage.close();
        storage.close();
        assert!(storage.is_closed());
    }

    #[test]
    fn clones_share_the_same_connection() {
        let storage = StorageHandle::in_memory().unwrap();
        let clone = storage.clone();
        storage.close();
        assert!(clone.is_closed());
    }
}
