use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Retrieval engine is disabled")]
    Disabled,

    #[error("No active knowledge base")]
    NoActiveKb,

    #[error("No knowledge base loaded")]
    NoKbLoaded,

    #[error("No relevant content above threshold")]
    NoRelevantContent,

    #[error("Knowledge base not found: {0}")]
    NotFound(String),

    #[error("Knowledge base already exists: {0}")]
    AlreadyExists(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(#[source] anyhow::Error),
}

pub type RagResult<T> = Result<T, RagError>;
