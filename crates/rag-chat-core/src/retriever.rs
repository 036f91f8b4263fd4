//! Similarity retriever: embed the query, ask the index for the top `k`.
//!
//! No re-ranking, metadata filtering, or deduplication is applied.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievedPassage;

/// Number of passages retrieved per query.
pub const DEFAULT_K: usize = 3;

#[derive(Clone)]
pub struct Retriever {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl Retriever {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            k: DEFAULT_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(RagError::config("retrieval k must be >= 1"));
        }
        self.k = k;
        Ok(self)
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Most similar passages to `query_text`, best first, at most `k`.
    pub async fn retrieve(&self, query_text: &str) -> Result<Vec<RetrievedPassage>> {
        let query_vec = self.embedder.embed(query_text).await?;
        let passages = self.index.query(&query_vec, self.k).await?;
        debug!(
            store_id = self.index.store_id(),
            k = self.k,
            hits = passages.len(),
            "retrieved passages"
        );
        Ok(passages)
    }
}
