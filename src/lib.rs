//! Knowledge-base retrieval engine for a conversational assistant.
//!
//! Given a natural-language query, the engine finds the most semantically
//! relevant chunks across one or more knowledge bases, ranks them with
//! normalized cosine scores, and renders a grounded context block for an
//! LLM prompt.
//!
//! The host process is the composition root: it builds one [`RagEngine`]
//! with an [`EngineConfig`], an [`Embedder`] implementation for its
//! embedding provider, and a [`Splitter`] (usually [`RecursiveSplitter`]),
//! then drives everything through the facade:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rag_engine::{EngineConfig, HashEmbedder, QueryOptions, RagEngine, RecursiveSplitter};
//!
//! # async fn run() -> rag_engine::RagResult<()> {
//! let engine = RagEngine::load(
//!     EngineConfig::from_env(),
//!     Arc::new(HashEmbedder::new(256)),
//!     Arc::new(RecursiveSplitter),
//! )
//! .await?;
//!
//! engine.add_kb("docs/agent-article.txt").await?;
//! let result = engine.query("What is an agent?", QueryOptions::default()).await?;
//! println!("{}", result.context);
//! # Ok(())
//! # }
//! ```

mod builder;
mod chunker;
mod config;
mod embedder;
mod engine;
mod error;
mod events;
mod index;
mod loader;
mod planner;
mod registry;
mod state;

pub use chunker::{RecursiveSplitter, SplitPiece, Splitter};
pub use config::{EMBED_BATCH_SIZE, EngineConfig};
pub use embedder::{EmbedError, Embedder, EmbeddingAdapter, HashEmbedder};
pub use engine::{AddedKb, EngineStatus, QueryOptions, RagEngine};
pub use error::{RagError, RagResult};
pub use events::{EventBus, RagEvent, Subscription};
pub use index::{Chunk, VectorIndex};
pub use planner::{Match, QueryMetadata, QueryResult, Reference};
pub use registry::{KbOrigin, KbSummary, KnowledgeBase};
pub use state::{EngineMode, PersistedState, StateStore};
