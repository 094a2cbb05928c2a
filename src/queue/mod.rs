//! Durable job queue.
//!
//! Jobs live in the `jobs` table, so a crash loses nothing: rows left
//! `running` by a dead process are reset to `queued` on the next open and
//! picked up again. One worker loop per queue claims jobs in scheduling
//! order, dispatches them, and enqueues whatever follow-up jobs the
//! handler returns after the finished job is deleted.
//!
//! Enqueueing wakes the loop through a `Notify` instead of waiting out
//! the poll interval; the interval remains as a fallback for jobs parked
//! in the future by retry backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::config::{BACKOFF_BASE_MS, BACKOFF_CAP_MS, QUEUE_POLL_INTERVAL_MS};
use crate::db::repository::{audit, job as job_repo, now_ms};
use crate::db::DatabaseError;
use crate::pipeline::payload::PayloadError;
use crate::pipeline::{JobPayload, PipelineError};
use crate::storage::StorageHandle;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Job failed after {attempts} attempt(s): {reason}")]
    JobFailed { attempts: i64, reason: String },

    #[error("Job was cancelled before it ran")]
    Cancelled,

    #[error("Queue shut down before the job finished")]
    QueueClosed,
}

/// Terminal (or retry) outcome broadcast to everyone awaiting a job id.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed,
    Failed { attempts: i64, reason: String },
    Cancelled,
}

/// Handle returned by [`DurableQueue::enqueue_awaited`]. Awaiting it
/// resolves when the job completes, fails an attempt, or is cancelled.
pub struct JobTicket {
    pub job_id: i64,
    receiver: broadcast::Receiver<JobOutcome>,
}

impl JobTicket {
    pub async fn wait(mut self) -> Result<(), QueueError> {
        loop {
            match self.receiver.recv().await {
                Ok(JobOutcome::Completed) => return Ok(()),
                Ok(JobOutcome::Failed { attempts, reason }) => {
                    return Err(QueueError::JobFailed { attempts, reason })
                }
                Ok(JobOutcome::Cancelled) => return Err(QueueError::Cancelled),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(QueueError::QueueClosed),
            }
        }
    }
}

/// Stage handlers implement this; the queue stays ignorant of pipeline
/// semantics beyond "dispatch and collect follow-ups".
pub trait JobDispatch: Send + Sync {
    fn dispatch(
        &self,
        storage: &StorageHandle,
        payload: &JobPayload,
    ) -> Result<Vec<JobPayload>, PipelineError>;
}

pub struct DurableQueue {
    storage: StorageHandle,
    project_id: Uuid,
    dispatcher: Arc<dyn JobDispatch>,
    wake: Notify,
    shutdown: AtomicBool,
    // Broadcast senders keyed by job row id. Lock ordering: this mutex
    // is always taken BEFORE touching storage, on both the enqueue and
    // the completion path, so a waiter registered against a job id can
    // never miss that job's outcome.
    waiters: Mutex<HashMap<i64, broadcast::Sender<JobOutcome>>>,
}

impl DurableQueue {
    /// Open a queue over an existing storage handle, resetting any jobs a
    /// previous process left `running`.
    pub fn open(
        storage: StorageHandle,
        project_id: Uuid,
        dispatcher: Arc<dyn JobDispatch>,
    ) -> Result<Arc<Self>, QueueError> {
        let recovered = storage.with(|conn| job_repo::reset_running(conn, now_ms()))?;
        if recovered > 0 {
            tracing::info!(jobs = recovered, "Recovered in-flight jobs from previous run");
        }
        Ok(Arc::new(Self {
            storage,
            project_id,
            dispatcher,
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
            waiters: Mutex::new(HashMap::new()),
        }))
    }

    /// Enqueue a job, coalescing on its dedupe key, and wake the worker.
    pub fn enqueue(&self, payload: &JobPayload) -> Result<i64, QueueError> {
        let _waiters = self.lock_waiters();
        let job_id = self.persist(payload)?;
        drop(_waiters);
        self.wake.notify_one();
        Ok(job_id)
    }

    /// Enqueue a job and get a ticket that resolves on its next outcome.
    /// Tickets for the same job id share one broadcast channel.
    pub fn enqueue_awaited(&self, payload: &JobPayload) -> Result<JobTicket, QueueError> {
        let mut waiters = self.lock_waiters();
        let job_id = self.persist(payload)?;
        let receiver = waiters
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(8).0)
            .subscribe();
        drop(waiters);
        self.wake.notify_one();
        Ok(JobTicket { job_id, receiver })
    }

    /// Cancel the job with this payload's dedupe key. Only `queued` rows
    /// can be cancelled; a `running` job is past the point of no return
    /// and a `failed` one is awaiting retry. Returns whether a row went.
    pub fn cancel(&self, payload: &JobPayload) -> Result<bool, QueueError> {
        let mut waiters = self.lock_waiters();
        let cancelled_id = self.storage.with(|conn| {
            let Some(job) = job_repo::get_job_by_key(conn, &payload.dedupe_key())? else {
                return Ok::<_, DatabaseError>(None);
            };
            Ok(job_repo::cancel(conn, job.id)?.then_some(job.id))
        })?;

        if let Some(id) = cancelled_id {
            if let Some(sender) = waiters.remove(&id) {
                let _ = sender.send(JobOutcome::Cancelled);
            }
        }
        drop(waiters);
        Ok(cancelled_id.is_some())
    }

    /// Queued plus failed-awaiting-retry rows. Running jobs are excluded:
    /// depth answers "how much is still waiting", not "how busy are we".
    pub fn depth(&self) -> Result<i64, QueueError> {
        Ok(self.storage.with(job_repo::depth)?)
    }

    /// Ask the worker loop to stop after its current job.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Worker loop. Runs until [`shutdown`](Self::shutdown); drains waiters
    /// with `QueueClosed` on exit by dropping their senders.
    pub async fn run(self: Arc<Self>) {
        tracing::debug!(project_id = %self.project_id, "Queue worker started");
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match self.step() {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(QUEUE_POLL_INTERVAL_MS)) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue step failed");
                    tokio::time::sleep(Duration::from_millis(QUEUE_POLL_INTERVAL_MS)).await;
                }
            }
        }
        self.lock_waiters().clear();
        tracing::debug!(project_id = %self.project_id, "Queue worker stopped");
    }

    /// Claim and run at most one job. Returns whether a job was claimed.
    fn step(&self) -> Result<bool, QueueError> {
        let Some(job) = self.storage.with(|conn| job_repo::claim_next(conn, now_ms()))? else {
            return Ok(false);
        };

        tracing::debug!(
            job_id = job.id,
            kind = %job.kind,
            attempts = job.attempts,
            "Job claimed"
        );
        self.storage.with(|conn| {
            audit::log_event(
                conn,
                &self.project_id,
                "info",
                "job_started",
                &serde_json::json!({ "job_id": job.id, "kind": job.kind.as_str(), "attempts": job.attempts }),
            )
        })?;

        let result = JobPayload::decode(job.kind.as_str(), &job.payload)
            .map_err(PipelineError::from)
            .and_then(|payload| self.dispatcher.dispatch(&self.storage, &payload));

        match result {
            Ok(follow_ups) => self.finish_ok(job.id, &follow_ups)?,
            Err(e) => self.finish_err(job.id, job.attempts, &e)?,
        }
        Ok(true)
    }

    fn finish_ok(&self, job_id: i64, follow_ups: &[JobPayload]) -> Result<(), QueueError> {
        let mut waiters = self.lock_waiters();
        let sender = self.storage.with(|conn| {
            job_repo::complete(conn, job_id)?;
            for follow_up in follow_ups {
                job_repo::upsert_job(
                    conn,
                    &follow_up.project_id(),
                    follow_up.kind(),
                    &follow_up.encode()?,
                    &follow_up.dedupe_key(),
                    now_ms(),
                )?;
            }
            audit::log_event(
                conn,
                &self.project_id,
                "info",
                "job_finished",
                &serde_json::json!({ "job_id": job_id, "follow_ups": follow_ups.len() }),
            )?;
            Ok::<_, QueueError>(waiters.remove(&job_id))
        })?;
        drop(waiters);

        if let Some(sender) = sender {
            let _ = sender.send(JobOutcome::Completed);
        }
        if !follow_ups.is_empty() {
            self.wake.notify_one();
        }
        Ok(())
    }

    fn finish_err(
        &self,
        job_id: i64,
        attempts: i64,
        error: &PipelineError,
    ) -> Result<(), QueueError> {
        let delay = backoff_delay_ms(attempts);
        tracing::warn!(
            job_id = job_id,
            attempts = attempts,
            retry_in_ms = delay,
            error = %error,
            "Job failed, scheduling retry"
        );

        let waiters = self.lock_waiters();
        self.storage.with(|conn| {
            let now = now_ms();
            job_repo::fail(conn, job_id, now + delay, now)?;
            audit::log_event(
                conn,
                &self.project_id,
                "warn",
                "job_failed",
                &serde_json::json!({
                    "job_id": job_id,
                    "attempts": attempts,
                    "error": error.to_string(),
                }),
            )
        })?;
        // Sender stays registered: the job is still alive and a later
        // retry can still complete it for anyone who subscribes again.
        if let Some(sender) = waiters.get(&job_id) {
            let _ = sender.send(JobOutcome::Failed {
                attempts,
                reason: error.to_string(),
            });
        }
        Ok(())
    }

    fn persist(&self, payload: &JobPayload) -> Result<i64, QueueError> {
        let job_id = self.storage.with(|conn| {
            let id = job_repo::upsert_job(
                conn,
                &payload.project_id(),
                payload.kind(),
                &payload.encode()?,
                &payload.dedupe_key(),
                now_ms(),
            )?;
            audit::log_event(
                conn,
                &self.project_id,
                "info",
                "job_enqueued",
                &serde_json::json!({ "job_id": id, "kind": payload.kind().as_str() }),
            )?;
            Ok::<_, QueueError>(id)
        })?;
        tracing::debug!(job_id, kind = %payload.kind(), "Job enqueued");
        Ok(job_id)
    }

    fn lock_waiters(&self) -> MutexGuard<'_, HashMap<i64, broadcast::Sender<JobOutcome>>> {
        match self.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Capped exponential retry delay: 1s, 2s, 4s, ... up to 30s. There is
/// no retry ceiling; a persistently failing job keeps retrying at the
/// cap until its document changes and supersedes the payload.
fn backoff_delay_ms(attempts: i64) -> i64 {
    let exponent = attempts.clamp(0, 16) as u32;
    (BACKOFF_BASE_MS << exponent).min(BACKOFF_CAP_MS)
}
