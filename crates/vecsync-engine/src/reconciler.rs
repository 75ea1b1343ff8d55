//! Turns file events into commits.
//!
//! A dispatcher task assigns every event a sequence number and appends it to
//! its path's queue. Each non-empty queue is drained by one task, so events
//! for a path run strictly in order, while a semaphore bounds how many paths
//! do extraction and embedding at once. Jobs overtaken by a newer event for
//! the same path are skipped; an in-flight job that loses the race is
//! rejected at commit time by its stale sequence number.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use vecsync_embeddings::EmbeddingPipeline;
use vecsync_types::{FileEvent, FileEventKind, PathStatus, ReconcilerSettings};

use crate::chunker::Chunker;
use crate::coordinator::{CommitOutcome, Coordinator};
use crate::error::{EngineError, ExtractionError};
use crate::extract::ExtractorRegistry;
use crate::state::{CommitBatch, PreparedChunk, RemovalReason};
use crate::status::StatusBoard;

/// Worker and retry parameters.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Paths processed concurrently
    pub workers: usize,
    /// Events buffered before `submit` waits
    pub queue_capacity: usize,
    /// Attempts per event before a path is marked failed
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_settings(&ReconcilerSettings::default())
    }
}

impl ReconcilerConfig {
    pub fn from_settings(settings: &ReconcilerSettings) -> Self {
        Self {
            workers: settings.workers.max(1),
            queue_capacity: settings.queue_capacity.max(1),
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    seq: u64,
    event: FileEvent,
}

/// Result of one successful attempt.
enum Attempt {
    Committed(CommitOutcome, usize),
    /// Content hash matches the indexed version
    Unchanged(usize),
    /// File no longer exists
    Vanished,
}

struct Shared {
    coordinator: Arc<Coordinator>,
    pipeline: Arc<EmbeddingPipeline>,
    extractors: ExtractorRegistry,
    chunker: Chunker,
    status: Arc<StatusBoard>,
    config: ReconcilerConfig,
    queues: Mutex<HashMap<PathBuf, VecDeque<Job>>>,
    permits: Semaphore,
    tracker: TaskTracker,
    cancel: CancellationToken,
    /// Events submitted and not yet finished
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn finish(&self, n: usize) {
        if n > 0 && self.pending.fetch_sub(n, Ordering::AcqRel) == n {
            self.idle.notify_waiters();
        }
    }

    fn is_current(&self, job: &Job) -> bool {
        self.coordinator
            .sequences()
            .is_current(&job.event.path, job.seq)
    }

    /// Status writes from stale jobs would clobber a newer pending state.
    fn set_status(&self, job: &Job, status: PathStatus) {
        if self.is_current(job) {
            self.status.set(&job.event.path, status);
        }
    }
}

/// Cloneable entry point for submitting events.
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<FileEvent>,
    shared: Arc<Shared>,
}

impl ReconcilerHandle {
    /// Queue an event. Waits when the queue is full.
    pub async fn submit(&self, event: FileEvent) -> Result<(), EngineError> {
        if self.shared.cancel.is_cancelled() {
            return Err(EngineError::Shutdown);
        }
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(event).await.is_err() {
            self.shared.finish(1);
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }

    /// Events accepted and not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Resolve once every submitted event has been processed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// The running reconciler: dispatcher task plus per-path drain tasks.
pub struct Reconciler {
    handle: ReconcilerHandle,
    dispatcher: JoinHandle<()>,
}

impl Reconciler {
    pub fn spawn(
        coordinator: Arc<Coordinator>,
        pipeline: Arc<EmbeddingPipeline>,
        extractors: ExtractorRegistry,
        chunker: Chunker,
        status: Arc<StatusBoard>,
        config: ReconcilerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            coordinator,
            pipeline,
            extractors,
            chunker,
            status,
            permits: Semaphore::new(config.workers),
            config,
            queues: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let dispatcher = tokio::spawn(dispatch_loop(shared.clone(), rx));
        info!(
            workers = shared.config.workers,
            max_attempts = shared.config.max_attempts,
            "Reconciler started"
        );
        Self {
            handle: ReconcilerHandle { tx, shared },
            dispatcher,
        }
    }

    pub fn handle(&self) -> ReconcilerHandle {
        self.handle.clone()
    }

    /// Stop taking events, let in-flight jobs finish and drop queued ones.
    pub async fn shutdown(self) {
        let shared = self.handle.shared.clone();
        shared.cancel.cancel();
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "Reconciler dispatcher failed");
        }
        shared.tracker.close();
        shared.tracker.wait().await;
        info!("Reconciler stopped");
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut rx: mpsc::Receiver<FileEvent>) {
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(event) => dispatch(&shared, event),
                None => break,
            },
        }
    }

    rx.close();
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    shared.finish(dropped);
    debug!(dropped, "Dispatcher stopped");
}

fn dispatch(shared: &Arc<Shared>, event: FileEvent) {
    let events = event.expand();
    // One submission may expand into two jobs
    shared
        .pending
        .fetch_add(events.len().saturating_sub(1), Ordering::AcqRel);

    for event in events {
        let path = event.path.clone();
        let seq = shared.coordinator.sequences().assign(&path);
        shared.status.mark_pending(&path);
        debug!(path = %path.display(), seq, kind = ?event.kind, "Event queued");

        let start_drain = {
            let mut queues = shared.queues.lock();
            let queue = queues.entry(path.clone()).or_default();
            queue.push_back(Job { seq, event });
            queue.len() == 1
        };
        if start_drain {
            shared.tracker.spawn(drain(shared.clone(), path));
        }
    }
}

/// Process a path's queue in order. The job being processed stays at the
/// front so that `dispatch` never starts a second drain for the path.
async fn drain(shared: Arc<Shared>, path: PathBuf) {
    loop {
        let job = {
            let queues = shared.queues.lock();
            queues.get(&path).and_then(|q| q.front().cloned())
        };
        let Some(job) = job else { return };

        if shared.cancel.is_cancelled() {
            let dropped = shared.queues.lock().remove(&path).map_or(0, |q| q.len());
            shared.finish(dropped);
            return;
        }

        if shared.is_current(&job) {
            match shared.permits.acquire().await {
                Ok(_permit) => process(&shared, &job).await,
                Err(_) => warn!(path = %path.display(), "Worker pool closed"),
            }
        } else {
            debug!(path = %path.display(), seq = job.seq, "Skipping superseded event");
        }

        let done = {
            let mut queues = shared.queues.lock();
            match queues.get_mut(&path) {
                Some(queue) => {
                    queue.pop_front();
                    if queue.is_empty() {
                        queues.remove(&path);
                        true
                    } else {
                        false
                    }
                }
                None => true,
            }
        };
        shared.finish(1);
        if done {
            return;
        }
    }
}

async fn process(shared: &Shared, job: &Job) {
    match job.event.kind {
        FileEventKind::Deleted => remove(shared, job).await,
        FileEventKind::Created | FileEventKind::Modified | FileEventKind::Renamed { .. } => {
            upsert_with_retry(shared, job).await
        }
    }
}

async fn remove(shared: &Shared, job: &Job) {
    let path = &job.event.path;
    let batch = CommitBatch::remove(path.clone(), RemovalReason::Deleted);
    match shared.coordinator.commit(job.seq, batch).await {
        Ok(CommitOutcome::Superseded) => {}
        Ok(outcome) => {
            info!(path = %path.display(), ?outcome, "Document removed");
            shared.set_status(job, PathStatus::deleted());
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to remove document");
            shared.set_status(job, PathStatus::failed(1, e.to_string()));
        }
    }
}

async fn upsert_with_retry(shared: &Shared, job: &Job) {
    let path = &job.event.path;
    let mut backoff = ExponentialBackoff {
        initial_interval: shared.config.initial_backoff,
        max_interval: shared.config.max_backoff,
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        debug!(path = %path.display(), attempt = attempts, "Indexing file");

        let err = match upsert(shared, job).await {
            Ok(Attempt::Committed(CommitOutcome::Superseded, _)) => return,
            Ok(Attempt::Committed(_, chunks)) => {
                info!(path = %path.display(), chunks, "Document indexed");
                shared.set_status(
                    job,
                    PathStatus {
                        attempts,
                        ..PathStatus::indexed(chunks)
                    },
                );
                return;
            }
            Ok(Attempt::Unchanged(chunks)) => {
                debug!(path = %path.display(), "Content unchanged");
                shared.set_status(job, PathStatus::indexed(chunks));
                return;
            }
            Ok(Attempt::Vanished) => return remove(shared, job).await,
            Err(e) if e.is_not_found() => return remove(shared, job).await,
            Err(e) => e,
        };

        if !shared.is_current(job) {
            debug!(path = %path.display(), error = %err, "Dropping failed attempt for superseded event");
            return;
        }
        if !err.is_retryable() || attempts >= shared.config.max_attempts {
            return exclude(shared, job, attempts, err).await;
        }

        match backoff.next_backoff() {
            Some(delay) => {
                warn!(
                    path = %path.display(),
                    attempt = attempts,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Indexing failed, retrying"
                );
                tokio::select! {
                    _ = shared.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => return exclude(shared, job, attempts, err).await,
        }
    }
}

/// Give up on a path: drop whatever it had in the index and report it failed.
async fn exclude(shared: &Shared, job: &Job, attempts: u32, err: EngineError) {
    let path = &job.event.path;
    error!(path = %path.display(), attempts, error = %err, "Indexing failed permanently");

    let message = err.to_string();
    let batch = CommitBatch::remove(path.clone(), RemovalReason::excluded(attempts, message.clone()));
    if let Err(e) = shared.coordinator.commit(job.seq, batch).await {
        error!(path = %path.display(), error = %e, "Failed to exclude document");
    }
    shared.set_status(job, PathStatus::failed(attempts, message));
}

async fn upsert(shared: &Shared, job: &Job) -> Result<Attempt, EngineError> {
    let path = &job.event.path;
    if !shared.extractors.supports(path) {
        return Err(ExtractionError::Unsupported(path.clone()).into());
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Attempt::Vanished),
        Err(e) => return Err(ExtractionError::from_io(path.clone(), e).into()),
    };
    let content_hash = blake3::hash(&bytes).to_hex().to_string();

    let existing = shared.coordinator.read(|s| {
        s.document(path)
            .filter(|d| d.content_hash == content_hash)
            .map(|d| d.chunks.len())
    });
    if let Some(chunks) = existing {
        return Ok(Attempt::Unchanged(chunks));
    }

    let modified_at = tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from);

    let text = {
        let extractors = shared.extractors.clone();
        let path = path.clone();
        tokio::task::spawn_blocking(move || extractors.extract(&path))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))??
    };

    let chunks = shared.chunker.chunk(&text);
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = shared.pipeline.embed(texts).await?;

    let prepared: Vec<PreparedChunk> = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| PreparedChunk {
            offset: chunk.offset,
            start: chunk.start,
            end: chunk.end,
            vector: embedding.into_values(),
        })
        .collect();
    let count = prepared.len();

    let batch = CommitBatch::replace(path.clone(), content_hash, modified_at, prepared);
    let outcome = shared.coordinator.commit(job.seq, batch).await?;
    Ok(Attempt::Committed(outcome, count))
}

/// Paths with queued or running jobs.
#[cfg(test)]
fn active_paths(handle: &ReconcilerHandle) -> Vec<PathBuf> {
    handle.shared.queues.lock().keys().cloned().collect()
}
