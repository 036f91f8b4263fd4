//! Vector index lifecycle: build, load, reuse, and query.
//!
//! An index is identified by a free-text store id. [`IndexManager::get_or_build`]
//! loads an existing index for that id or builds one from the given chunks.
//! This is a cache keyed by *name*, not by content: if the corpus changes but
//! the store id does not, the old index is served. The corpus fingerprint
//! recorded at build time lets us notice (and log) that drift, and
//! [`content_store_id`] offers content-addressed ids for callers who want
//! rebuilds on change.
//!
//! Builds are staged through [`IndexWriter`](crate::store::IndexWriter) and
//! only become loadable after commit, so an interrupted build is never served
//! as complete. Builds and exists-checks for the same id are serialized
//! through [`BuildLocks`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkMetadata, IndexMeta, Metric, ScoredRecord, VectorRecord};
use crate::store::{validate_store_id, IndexWriter, VectorStore};

/// Number of chunks sent to the embedder per call during a build.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Read-only handle to a completed index.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    meta: IndexMeta,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex").field("meta", &self.meta).finish()
    }
}

impl VectorIndex {
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn store_id(&self) -> &str {
        &self.meta.store_id
    }

    pub fn len(&self) -> usize {
        self.meta.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.meta.record_count == 0
    }

    /// Nearest records to `query_vec`, most similar first, at most `k`.
    ///
    /// # Errors
    ///
    /// - [`RagError::Configuration`] if `k == 0`.
    /// - [`RagError::DimensionMismatch`] if the vector length differs from
    ///   the dimension the index was built with.
    pub async fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Err(RagError::config("k must be a positive integer"));
        }
        if query_vec.len() != self.meta.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.meta.dims,
                actual: query_vec.len(),
            });
        }
        self.store.search(&self.meta.store_id, query_vec, k).await
    }
}

/// Per-store-id async locks.
#[derive(Default)]
pub struct BuildLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BuildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, store_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(store_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Builds, loads, and drops indexes in one [`VectorStore`].
pub struct IndexManager {
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    locks: BuildLocks,
}

impl IndexManager {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            locks: BuildLocks::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embed every chunk and persist the records under `store_id`,
    /// replacing any previous build with that id.
    pub async fn build(
        &self,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        store_id: &str,
    ) -> Result<VectorIndex> {
        validate_store_id(store_id)?;
        let _guard = self.locks.acquire(store_id).await;
        self.build_locked(chunks, embedder, store_id).await
    }

    /// Reconstruct a handle from durable storage. Never embeds.
    pub async fn load(&self, store_id: &str) -> Result<VectorIndex> {
        validate_store_id(store_id)?;
        let meta = self.store.open(store_id).await?;
        info!(
            store_id,
            records = meta.record_count,
            model = %meta.model,
            dims = meta.dims,
            "loaded vector index"
        );
        Ok(VectorIndex {
            store: self.store.clone(),
            meta,
        })
    }

    /// [`load`](Self::load), then check that `embedder` can query the index.
    pub async fn load_for(&self, store_id: &str, embedder: &dyn Embedder) -> Result<VectorIndex> {
        let index = self.load(store_id).await?;
        let meta = index.meta();
        if meta.dims != embedder.dims() {
            return Err(RagError::DimensionMismatch {
                expected: meta.dims,
                actual: embedder.dims(),
            });
        }
        if meta.model != embedder.model_name() {
            warn!(
                store_id,
                index_model = %meta.model,
                embedder_model = %embedder.model_name(),
                "embedding model differs from the one used to build the index"
            );
        }
        Ok(index)
    }

    /// Load `store_id` if it exists, otherwise build it from `chunks`.
    ///
    /// On reuse, the embedder's dimension must match the stored index; a
    /// different model name or corpus fingerprint only produces a warning.
    pub async fn get_or_build(
        &self,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        store_id: &str,
    ) -> Result<VectorIndex> {
        validate_store_id(store_id)?;
        let _guard = self.locks.acquire(store_id).await;

        if !self.store.exists(store_id).await? {
            info!(store_id, "creating vector index");
            return self.build_locked(chunks, embedder, store_id).await;
        }

        let index = self.load_for(store_id, embedder).await?;
        let meta = index.meta();
        if !chunks.is_empty() && meta.corpus_fingerprint != corpus_fingerprint(chunks) {
            warn!(
                store_id,
                "corpus changed since this index was built; serving the existing index \
                 (rebuild or use content-keyed store ids to refresh)"
            );
        }
        Ok(index)
    }

    pub async fn drop_index(&self, store_id: &str) -> Result<bool> {
        validate_store_id(store_id)?;
        let _guard = self.locks.acquire(store_id).await;
        self.store.drop_index(store_id).await
    }

    async fn build_locked(
        &self,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        store_id: &str,
    ) -> Result<VectorIndex> {
        let mut writer = self.store.begin_build(store_id).await?;

        let written = self.write_records(writer.as_mut(), chunks, embedder).await;
        let dims = match written {
            Ok(dims) => dims,
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    warn!(store_id, error = %abort_err, "failed to discard partial build");
                }
                return Err(e);
            }
        };

        let meta = IndexMeta {
            store_id: store_id.to_string(),
            model: embedder.model_name().to_string(),
            dims,
            metric: Metric::Cosine,
            record_count: chunks.len(),
            corpus_fingerprint: corpus_fingerprint(chunks),
            created_at: chrono::Utc::now().timestamp(),
        };
        writer.commit(&meta).await?;

        info!(
            store_id,
            records = meta.record_count,
            model = %meta.model,
            dims,
            "finished creating vector index"
        );
        Ok(VectorIndex {
            store: self.store.clone(),
            meta,
        })
    }

    /// Embed and append in batches; returns the vector dimension.
    async fn write_records(
        &self,
        writer: &mut dyn IndexWriter,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
    ) -> Result<usize> {
        let dims = embedder.dims();

        for (n, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::EmbeddingService(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            let mut records = Vec::with_capacity(batch.len());
            for (chunk, embedding) in batch.iter().zip(vectors) {
                if embedding.len() != dims {
                    return Err(RagError::DimensionMismatch {
                        expected: dims,
                        actual: embedding.len(),
                    });
                }
                records.push(VectorRecord {
                    text: chunk.text.clone(),
                    metadata: ChunkMetadata::from(chunk),
                    embedding,
                });
            }
            writer.append(&records).await?;
            debug!(batch = n, size = batch.len(), "embedded batch");
        }

        Ok(dims)
    }
}

/// SHA-256 over the ordered chunk hashes.
pub fn corpus_fingerprint(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for c in chunks {
        hasher.update(c.hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// `"{name}-{first 12 hex chars of the corpus fingerprint}"`.
///
/// Using this as the store id makes [`IndexManager::get_or_build`] rebuild
/// whenever the chunked corpus changes.
pub fn content_store_id(name: &str, chunks: &[Chunk]) -> String {
    let fp = corpus_fingerprint(chunks);
    format!("{}-{}", name, &fp[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{split_document, ChunkingParams};
    use crate::models::Document;
    use crate::store::memory::InMemoryStore;
    use crate::testing::{FailingEmbedder, HashEmbedder};

    fn chunks_of(texts: &[&str]) -> Vec<Chunk> {
        let docs: Vec<Document> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Document::new(format!("doc{}", i), *t))
            .collect();
        crate::chunk::split_documents(&docs, &ChunkingParams::default()).unwrap()
    }

    fn manager() -> IndexManager {
        IndexManager::new(Arc::new(InMemoryStore::new())).with_batch_size(2)
    }

    #[tokio::test]
    async fn test_load_missing_is_index_not_found() {
        let err = manager().load("nope").await.unwrap_err();
        assert!(matches!(err, RagError::IndexNotFound { store_id } if store_id == "nope"));
    }

    #[tokio::test]
    async fn test_get_or_build_embeds_once() {
        let mgr = manager();
        let embedder = HashEmbedder::new(64);
        let chunks = chunks_of(&[
            "Moby Dick is a novel by Herman Melville.",
            "The Pequod is a whaling ship.",
            "Ishmael narrates the story.",
        ]);

        let first = mgr.get_or_build(&chunks, &embedder, "chroma_db").await.unwrap();
        let embedded = embedder.texts_embedded();
        assert_eq!(embedded, 3);

        let second = mgr.get_or_build(&chunks, &embedder, "chroma_db").await.unwrap();
        assert_eq!(embedder.texts_embedded(), embedded);
        assert_eq!(first.meta(), second.meta());

        let q = embedder.embed("who wrote moby dick").await.unwrap();
        let a = first.query(&q, 3).await.unwrap();
        let b = second.query(&q, 3).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].text, "Moby Dick is a novel by Herman Melville.");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_build_embeds_once() {
        let mgr = Arc::new(manager());
        let embedder = Arc::new(HashEmbedder::new(32));
        let texts: Vec<String> = (0..20)
            .map(|i| format!("Passage number {} about the voyage of the Pequod.", i))
            .collect();
        let docs: Vec<Document> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Document::new(format!("doc{}", i), t.as_str()))
            .collect();
        let chunks = Arc::new(crate::chunk::split_documents(&docs, &ChunkingParams::default()).unwrap());
        assert_eq!(chunks.len(), 20);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                let embedder = embedder.clone();
                let chunks = chunks.clone();
                tokio::spawn(async move {
                    mgr.get_or_build(&chunks, embedder.as_ref(), "chroma_db").await
                })
            })
            .collect();

        let mut metas = Vec::new();
        for handle in handles {
            metas.push(handle.await.unwrap().unwrap().meta().clone());
        }

        assert_eq!(embedder.texts_embedded(), 20);
        assert!(metas.iter().all(|m| m == &metas[0]));
        assert_eq!(metas[0].record_count, 20);
    }

    #[tokio::test]
    async fn test_query_cardinality() {
        let mgr = manager();
        let embedder = HashEmbedder::new(32);
        let chunks = chunks_of(&["one fish", "two fish", "red fish", "blue fish"]);
        let index = mgr.build(&chunks, &embedder, "fish").await.unwrap();
        let q = embedder.embed("fish").await.unwrap();

        assert_eq!(index.query(&q, 3).await.unwrap().len(), 3);
        assert_eq!(index.query(&q, 10).await.unwrap().len(), 4);

        let hits = index.query(&q, 4).await.unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(matches!(
            index.query(&q, 0).await,
            Err(RagError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let mgr = manager();
        let embedder = HashEmbedder::new(8);
        let index = mgr
            .build(&chunks_of(&["whales"]), &embedder, "dims")
            .await
            .unwrap();
        let err = index.query(&[1.0, 0.0], 1).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 8,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_get_or_build_rejects_other_dimension() {
        let mgr = manager();
        let chunks = chunks_of(&["whales"]);
        mgr.get_or_build(&chunks, &HashEmbedder::new(8), "dims")
            .await
            .unwrap();
        let err = mgr
            .get_or_build(&chunks, &HashEmbedder::new(16), "dims")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_failed_build_leaves_nothing_loadable() {
        let mgr = manager();
        let chunks = chunks_of(&["a", "b", "c", "d", "e"]);
        let embedder = FailingEmbedder::after_batches(1, 8);
        let err = mgr.build(&chunks, &embedder, "partial").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(_)));
        assert!(!mgr.store().exists("partial").await.unwrap());
        assert!(matches!(
            mgr.load("partial").await,
            Err(RagError::IndexNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_corpus_builds_empty_index() {
        let mgr = manager();
        let embedder = HashEmbedder::new(8);
        let index = mgr.build(&[], &embedder, "empty").await.unwrap();
        assert!(index.is_empty());
        let q = embedder.embed("anything").await.unwrap();
        assert!(index.query(&q, 3).await.unwrap().is_empty());
    }

    #[test]
    fn test_content_store_id_tracks_corpus() {
        let a = chunks_of(&["version one"]);
        let b = chunks_of(&["version two"]);
        assert_eq!(content_store_id("db", &a), content_store_id("db", &a));
        assert_ne!(content_store_id("db", &a), content_store_id("db", &b));
        assert!(content_store_id("db", &a).starts_with("db-"));
        assert_eq!(content_store_id("db", &a).len(), "db-".len() + 12);
    }

    #[test]
    fn test_fingerprint_sensitive_to_order() {
        let doc = Document::new("d", "alpha beta gamma delta");
        let params = ChunkingParams::new(6, 0).unwrap();
        let mut chunks = split_document(&doc, &params).unwrap();
        let before = corpus_fingerprint(&chunks);
        chunks.reverse();
        assert_ne!(before, corpus_fingerprint(&chunks));
    }
}
