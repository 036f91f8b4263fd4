//! Error kinds surfaced by the pipeline.
//!
//! Every public operation returns [`Result`]; nothing in the core panics
//! or aborts the process on a failed model call or store lookup.

use thiserror::Error;

/// Errors produced by chunking, indexing, retrieval, and generation.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid parameters (chunk sizes, `k`, store ids). Raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `load` was called for a store id with no completed build.
    #[error("vector index '{store_id}' not found")]
    IndexNotFound { store_id: String },

    /// The embedding backend failed (transport, timeout, malformed response).
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// The chat backend failed (transport, timeout, malformed response).
    #[error("generation service error: {0}")]
    GenerationService(String),

    /// A vector's length disagrees with the index's recorded dimension.
    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The durable store failed.
    #[error("vector store error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RagError {
    pub fn config(msg: impl Into<String>) -> Self {
        RagError::Configuration(msg.into())
    }

    pub fn storage<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        RagError::Storage(err.into())
    }

    /// Short machine-readable code, used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Configuration(_) => "configuration",
            RagError::IndexNotFound { .. } => "index_not_found",
            RagError::EmbeddingService(_) => "embedding_service",
            RagError::GenerationService(_) => "generation_service",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::Storage(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
