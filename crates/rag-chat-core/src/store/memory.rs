//! In-memory [`VectorStore`] for tests and ephemeral sessions.
//!
//! Indexes live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every record of the index.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{IndexMeta, ScoredRecord, VectorRecord};

use super::{validate_store_id, IndexWriter, VectorStore};

struct StoredIndex {
    meta: IndexMeta,
    records: Vec<VectorRecord>,
}

type Indexes = Arc<RwLock<HashMap<String, StoredIndex>>>;

/// Process-local store. Cloning shares the same underlying indexes.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    indexes: Indexes,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> RagError {
    RagError::storage("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn exists(&self, store_id: &str) -> Result<bool> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        Ok(indexes.contains_key(store_id))
    }

    async fn begin_build(&self, store_id: &str) -> Result<Box<dyn IndexWriter>> {
        validate_store_id(store_id)?;
        Ok(Box::new(MemoryWriter {
            indexes: self.indexes.clone(),
            store_id: store_id.to_string(),
            staged: Vec::new(),
        }))
    }

    async fn open(&self, store_id: &str) -> Result<IndexMeta> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        indexes
            .get(store_id)
            .map(|idx| idx.meta.clone())
            .ok_or_else(|| RagError::IndexNotFound {
                store_id: store_id.to_string(),
            })
    }

    async fn search(
        &self,
        store_id: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        let index = indexes.get(store_id).ok_or_else(|| RagError::IndexNotFound {
            store_id: store_id.to_string(),
        })?;

        let mut scored: Vec<ScoredRecord> = index
            .records
            .iter()
            .map(|r| ScoredRecord {
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(query_vec, &r.embedding),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn drop_index(&self, store_id: &str) -> Result<bool> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        Ok(indexes.remove(store_id).is_some())
    }
}

struct MemoryWriter {
    indexes: Indexes,
    store_id: String,
    staged: Vec<VectorRecord>,
}

#[async_trait]
impl IndexWriter for MemoryWriter {
    async fn append(&mut self, records: &[VectorRecord]) -> Result<()> {
        self.staged.extend_from_slice(records);
        Ok(())
    }

    async fn commit(self: Box<Self>, meta: &IndexMeta) -> Result<()> {
        if meta.store_id != self.store_id {
            return Err(RagError::config(format!(
                "commit for '{}' on a writer opened for '{}'",
                meta.store_id, self.store_id
            )));
        }
        let this = *self;
        let mut indexes = this.indexes.write().map_err(|_| poisoned())?;
        indexes.insert(
            this.store_id,
            StoredIndex {
                meta: meta.clone(),
                records: this.staged,
            },
        );
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
