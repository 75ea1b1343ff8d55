//! Batching embedding pipeline.
//!
//! Callers submit the chunk texts of one document and await their vectors.
//! A single background task gathers submissions from all callers into a batch
//! and invokes the model once the batch reaches `batch_size` texts or the
//! oldest submission has waited `batch_timeout`, whichever comes first.
//!
//! A model failure fails the whole batch: every caller with texts in it
//! receives the error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::EmbeddingError;
use crate::model::{validate_batch, Embedding, EmbeddingModel, ModelInfo};

/// Batching parameters.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Flush once this many texts are pending; also the maximum texts per model call
    pub batch_size: usize,
    /// Flush once the oldest pending submission has waited this long
    pub batch_timeout: Duration,
    /// Upper bound on a single model call
    pub request_timeout: Duration,
    /// Submissions buffered before `embed` applies backpressure
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            batch_timeout: Duration::from_millis(50),
            request_timeout: Duration::from_secs(30),
            queue_capacity: 256,
        }
    }
}

struct Submission {
    texts: Vec<String>,
    reply: oneshot::Sender<Result<Vec<Embedding>, EmbeddingError>>,
}

/// Handle to the batching task.
pub struct EmbeddingPipeline {
    model: Arc<dyn EmbeddingModel>,
    tx: mpsc::Sender<Submission>,
    request_timeout: Duration,
    worker: JoinHandle<()>,
}

impl EmbeddingPipeline {
    /// Spawn the batching task on the current runtime.
    pub fn spawn(model: Arc<dyn EmbeddingModel>, config: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let request_timeout = config.request_timeout;
        let worker = tokio::spawn(run_batcher(model.clone(), config, rx));
        Self {
            model,
            tx,
            request_timeout,
            worker,
        }
    }

    pub fn info(&self) -> &ModelInfo {
        self.model.info()
    }

    /// Embed texts through the batcher. Returns one vector per text, in order.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submission { texts, reply })
            .await
            .map_err(|_| EmbeddingError::PipelineClosed)?;
        rx.await.map_err(|_| EmbeddingError::PipelineClosed)?
    }

    /// Embed a query directly, bypassing the batcher so it never waits on a
    /// batch timeout.
    pub async fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let texts = [text.to_string()];
        let mut out = call_model(self.model.as_ref(), &texts, self.request_timeout).await?;
        out.pop()
            .ok_or_else(|| EmbeddingError::Malformed("empty response for query".into()))
    }

    /// Stop accepting submissions and wait for pending batches to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Embedding batcher task failed");
        }
    }
}

async fn run_batcher(
    model: Arc<dyn EmbeddingModel>,
    config: PipelineConfig,
    mut rx: mpsc::Receiver<Submission>,
) {
    let batch_size = config.batch_size.max(1);
    let mut pending: Vec<Submission> = Vec::new();
    let mut pending_texts = 0usize;
    let mut deadline = Instant::now();

    loop {
        let closed = if pending.is_empty() {
            match rx.recv().await {
                Some(sub) => {
                    deadline = Instant::now() + config.batch_timeout;
                    pending_texts += sub.texts.len();
                    pending.push(sub);
                    false
                }
                None => true,
            }
        } else {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(sub) => {
                        pending_texts += sub.texts.len();
                        pending.push(sub);
                        false
                    }
                    None => true,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    flush(model.as_ref(), &config, batch_size, std::mem::take(&mut pending)).await;
                    pending_texts = 0;
                    false
                }
            }
        };

        if pending_texts >= batch_size || (closed && !pending.is_empty()) {
            flush(model.as_ref(), &config, batch_size, std::mem::take(&mut pending)).await;
            pending_texts = 0;
        }

        if closed {
            debug!("Embedding batcher stopped");
            return;
        }
    }
}

/// Run one batch through the model and hand each submitter its slice.
async fn flush(
    model: &dyn EmbeddingModel,
    config: &PipelineConfig,
    batch_size: usize,
    batch: Vec<Submission>,
) {
    if batch.is_empty() {
        return;
    }

    let texts: Vec<String> = batch.iter().flat_map(|s| s.texts.iter().cloned()).collect();
    debug!(
        submissions = batch.len(),
        texts = texts.len(),
        "Flushing embedding batch"
    );

    let mut vectors = Vec::with_capacity(texts.len());
    let mut failure = None;
    for slice in texts.chunks(batch_size) {
        match call_model(model, slice, config.request_timeout).await {
            Ok(mut out) => vectors.append(&mut out),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    if let Some(err) = failure {
        warn!(error = %err, texts = texts.len(), "Embedding batch failed");
        for sub in batch {
            let _ = sub.reply.send(Err(err.clone()));
        }
        return;
    }

    let mut rest = vectors.into_iter();
    for sub in batch {
        let mine: Vec<Embedding> = rest.by_ref().take(sub.texts.len()).collect();
        // Receiver may have been dropped by a superseded caller
        let _ = sub.reply.send(Ok(mine));
    }
}

async fn call_model(
    model: &dyn EmbeddingModel,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Embedding>, EmbeddingError> {
    let out = tokio::time::timeout(timeout, model.embed_batch(texts))
        .await
        .map_err(|_| EmbeddingError::Timeout(timeout))??;
    validate_batch(model.info(), texts.len(), &out)?;
    Ok(out)
}
