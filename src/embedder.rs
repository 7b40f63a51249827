//! Embedding provider adapter.
//!
//! The engine consumes a single capability from its embedding collaborator:
//! turn a batch of texts into fixed-dimension vectors. `EmbeddingAdapter`
//! wraps whatever provider the host injects and owns the operational
//! policy: request batching, transient-failure retries with exponential
//! back-off, per-call timeouts, cancellation, unit-normalization, and
//! pinning the vector dimension at the first successful call.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{EMBED_BATCH_SIZE, EngineConfig};
use crate::error::{RagError, RagResult};

// ---------------------------------------------------------------------------
// Capability surface
// ---------------------------------------------------------------------------

/// Provider-side failure classification. Transient failures (network hiccup,
/// 429, 5xx) are retried; permanent ones surface immediately.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("transient embedding failure: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("permanent embedding failure: {0}")]
    Permanent(#[source] anyhow::Error),
}

/// External embedding capability. Outputs must preserve input order and all
/// share one dimension for the life of the provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct EmbeddingAdapter {
    provider: Arc<dyn Embedder>,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    call_timeout: Duration,
    /// Dimension pinned at the first successful call; 0 while unpinned.
    dim: AtomicUsize,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn Embedder>, config: &EngineConfig) -> Self {
        Self {
            provider,
            batch_size: EMBED_BATCH_SIZE,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            call_timeout: Duration::from_millis(config.embed_timeout_ms),
            dim: AtomicUsize::new(0),
        }
    }

    /// Override the provider request cap (defaults to [`EMBED_BATCH_SIZE`]).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Dimension observed on the first successful call, if any yet.
    pub fn dim(&self) -> Option<usize> {
        match self.dim.load(Ordering::Acquire) {
            0 => None,
            d => Some(d),
        }
    }

    /// Embed `texts` in order, splitting into provider-sized requests with at
    /// most one request in flight. Returned vectors are unit-normalized.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: Option<&CancellationToken>,
    ) -> RagResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for request in texts.chunks(self.batch_size) {
            let vectors = self.call_with_retry(request, cancel).await?;
            if vectors.len() != request.len() {
                return Err(RagError::EmbeddingFailed(anyhow!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    request.len()
                )));
            }
            for mut vector in vectors {
                self.check_dimension(&vector)?;
                normalize(&mut vector);
                out.push(vector);
            }
        }
        Ok(out)
    }

    /// Embed a single query text.
    pub async fn embed_query(
        &self,
        text: &str,
        cancel: Option<&CancellationToken>,
    ) -> RagResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()], cancel).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailed(anyhow!("provider returned no vector")))
    }

    async fn call_with_retry(
        &self,
        request: &[String],
        cancel: Option<&CancellationToken>,
    ) -> RagResult<Vec<Vec<f32>>> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(RagError::Cancelled);
            }

            match self.call_once(request, cancel).await {
                CallOutcome::Done(vectors) => return Ok(vectors),
                CallOutcome::Fatal(err) => return Err(err),
                CallOutcome::Retryable(err) => {
                    if attempt < self.max_retries {
                        let delay = self.retry_delay * 2u32.pow(attempt);
                        warn!(
                            attempt = attempt + 1,
                            retries = self.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Transient embedding failure, retrying: {err:#}"
                        );
                        self.wait_before_retry(delay, cancel).await?;
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(RagError::EmbeddingFailed(
            last_err.unwrap_or_else(|| anyhow!("embedding failed")),
        ))
    }

    /// One provider call guarded by the per-call timeout and the caller's
    /// cancellation token. Timeouts count as transient.
    async fn call_once(
        &self,
        request: &[String],
        cancel: Option<&CancellationToken>,
    ) -> CallOutcome {
        let call = tokio::time::timeout(self.call_timeout, self.provider.embed(request));
        let outcome = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return CallOutcome::Fatal(RagError::Cancelled),
                outcome = call => outcome,
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(vectors)) => CallOutcome::Done(vectors),
            Ok(Err(EmbedError::Transient(err))) => CallOutcome::Retryable(err),
            Ok(Err(EmbedError::Permanent(err))) => {
                CallOutcome::Fatal(RagError::EmbeddingFailed(err))
            }
            Err(_) => CallOutcome::Retryable(anyhow!(
                "embedding call timed out after {:?}",
                self.call_timeout
            )),
        }
    }

    async fn wait_before_retry(
        &self,
        delay: Duration,
        cancel: Option<&CancellationToken>,
    ) -> RagResult<()> {
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(RagError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> RagResult<()> {
        if vector.is_empty() {
            return Err(RagError::EmbeddingFailed(anyhow!(
                "provider returned an empty vector"
            )));
        }
        match self
            .dim
            .compare_exchange(0, vector.len(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(pinned) if pinned == vector.len() => Ok(()),
            Err(pinned) => Err(RagError::DimensionMismatch {
                expected: pinned,
                actual: vector.len(),
            }),
        }
    }
}

enum CallOutcome {
    Done(Vec<Vec<f32>>),
    Retryable(anyhow::Error),
    Fatal(RagError),
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in fallback provider
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embedder hashing whitespace tokens into a
/// fixed number of buckets. Not semantically meaningful, but dependency-free
/// and stable, which makes it a workable stand-in when no real provider is
/// wired up (and the workhorse for tests).
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(batch
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dim];
                for token in text.split_whitespace() {
                    use std::hash::{DefaultHasher, Hash, Hasher};
                    let mut hasher = DefaultHasher::new();
                    token.to_lowercase().hash(&mut hasher);
                    vector[(hasher.finish() as usize) % self.dim] += 1.0;
                }
                vector
            })
            .collect())
    }
}
