use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

/// Maximum batch size sent to the embedding provider in a single request.
pub const EMBED_BATCH_SIZE: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Max characters per chunk.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, must be strictly less than `chunk_size`.
    pub chunk_overlap: usize,
    /// k for top-k retrieval and the upper bound on returned documents.
    pub max_retrieved_docs: usize,
    /// Matches scoring strictly below this are dropped. Range [0, 1].
    pub min_relevance_score: f32,
    /// Retries for transient embedder failures.
    pub max_retries: u32,
    /// Initial retry back-off, doubled each attempt.
    pub retry_delay_ms: u64,
    /// Per-call embedder timeout.
    pub embed_timeout_ms: u64,
    /// Directory scanned for system knowledge bases (`*.txt`).
    pub kb_dir: PathBuf,
    /// Persisted engine state file.
    pub state_path: PathBuf,
    /// Whether `remove_kb` may target system knowledge bases. A removed
    /// system KB reappears when a later process re-scans the KB directory.
    pub allow_remove_system_kb: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_retrieved_docs: 5,
            min_relevance_score: 0.7,
            max_retries: 3,
            retry_delay_ms: 5000,
            embed_timeout_ms: 60_000,
            kb_dir: PathBuf::from("docs"),
            state_path: PathBuf::from("rag-state.json"),
            allow_remove_system_kb: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: env_parse("RAG_CHUNK_SIZE", defaults.chunk_size),
            chunk_overlap: env_parse("RAG_CHUNK_OVERLAP", defaults.chunk_overlap),
            max_retrieved_docs: env_parse("RAG_MAX_RETRIEVED_DOCS", defaults.max_retrieved_docs),
            min_relevance_score: env_parse(
                "RAG_MIN_RELEVANCE_SCORE",
                defaults.min_relevance_score,
            ),
            max_retries: env_parse("RAG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_parse("RAG_RETRY_DELAY_MS", defaults.retry_delay_ms),
            embed_timeout_ms: env_parse("RAG_EMBED_TIMEOUT_MS", defaults.embed_timeout_ms),
            kb_dir: std::env::var("RAG_KB_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.kb_dir),
            state_path: std::env::var("RAG_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_path),
            allow_remove_system_kb: env_parse(
                "RAG_ALLOW_REMOVE_SYSTEM_KB",
                defaults.allow_remove_system_kb,
            ),
        }
    }

    /// Reject configurations the retrieval pipeline cannot honor.
    pub fn validate(&self) -> RagResult<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidArgument(
                "chunk_size must be positive".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidArgument(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_retrieved_docs == 0 {
            return Err(RagError::InvalidArgument(
                "max_retrieved_docs must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_relevance_score) {
            return Err(RagError::InvalidArgument(format!(
                "min_relevance_score ({}) must be within [0, 1]",
                self.min_relevance_score
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
