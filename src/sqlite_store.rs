//! SQLite-backed [`VectorStore`].
//!
//! Each store id is one database file, `<root>/<store_id>.sqlite`, holding an
//! `index_meta` row and the ordered `records` table. Embeddings are stored as
//! little-endian `f32` BLOBs and searched by brute-force cosine similarity.
//!
//! # Build atomicity
//!
//! A build writes into a staging file, `<root>/.<store_id>.<uuid>.building`.
//! Only after the metadata row is written and the pool is closed is the
//! staging file renamed over the final path. A crash at any earlier point
//! leaves at most an orphaned staging file, which `exists` and `open` never
//! look at. Store ids cannot start with `.`, so staging names never collide
//! with a final file.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use rag_chat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use rag_chat_core::models::{ChunkMetadata, IndexMeta, Metric, ScoredRecord, VectorRecord};
use rag_chat_core::store::{validate_store_id, IndexWriter, VectorStore};
use rag_chat_core::{RagError, Result};

use crate::db;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE index_meta (
        store_id TEXT NOT NULL,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        metric TEXT NOT NULL,
        record_count INTEGER NOT NULL,
        corpus_fingerprint TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE records (
        ordinal INTEGER PRIMARY KEY,
        source TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        start_char INTEGER NOT NULL,
        end_char INTEGER NOT NULL,
        hash TEXT NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
];

type Pools = Arc<Mutex<HashMap<String, SqlitePool>>>;

/// Durable store rooted at a directory.
#[derive(Clone)]
pub struct SqliteVectorStore {
    root: PathBuf,
    /// Read-only pools for committed indexes, opened lazily.
    pools: Pools,
}

impl SqliteVectorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pools: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self, store_id: &str) -> PathBuf {
        self.root.join(format!("{}.sqlite", store_id))
    }

    async fn read_pool(&self, store_id: &str) -> Result<SqlitePool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(store_id) {
            return Ok(pool.clone());
        }

        let path = self.index_path(store_id);
        if !path.is_file() {
            return Err(RagError::IndexNotFound {
                store_id: store_id.to_string(),
            });
        }
        let pool = db::connect_read_only(&path)
            .await
            .map_err(RagError::storage)?;
        pools.insert(store_id.to_string(), pool.clone());
        Ok(pool)
    }
}

/// Close and forget the cached read pool for `store_id`, if any.
async fn close_cached(pools: &mut HashMap<String, SqlitePool>, store_id: &str) {
    if let Some(pool) = pools.remove(store_id) {
        pool.close().await;
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_usize(n: i64) -> Result<usize> {
    usize::try_from(n).map_err(|_| RagError::storage(format!("negative count in store: {}", n)))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn exists(&self, store_id: &str) -> Result<bool> {
        validate_store_id(store_id)?;
        Ok(self.index_path(store_id).is_file())
    }

    async fn begin_build(&self, store_id: &str) -> Result<Box<dyn IndexWriter>> {
        validate_store_id(store_id)?;
        let staging = self
            .root
            .join(format!(".{}.{}.building", store_id, uuid::Uuid::new_v4()));

        let pool = db::connect(&staging).await.map_err(RagError::storage)?;
        for ddl in SCHEMA {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .map_err(RagError::storage)?;
        }

        Ok(Box::new(SqliteWriter {
            pool,
            staging,
            final_path: self.index_path(store_id),
            store_id: store_id.to_string(),
            next_ordinal: 0,
            pools: self.pools.clone(),
        }))
    }

    async fn open(&self, store_id: &str) -> Result<IndexMeta> {
        validate_store_id(store_id)?;
        let pool = self.read_pool(store_id).await?;

        let row = sqlx::query(
            "SELECT store_id, model, dims, metric, record_count, corpus_fingerprint, created_at
             FROM index_meta LIMIT 1",
        )
        .fetch_optional(&pool)
        .await
        .map_err(RagError::storage)?
        .ok_or_else(|| RagError::storage(format!("index '{}' has no metadata row", store_id)))?;

        let metric: String = row.get("metric");
        Ok(IndexMeta {
            store_id: row.get("store_id"),
            model: row.get("model"),
            dims: to_usize(row.get("dims"))?,
            metric: Metric::parse(&metric).ok_or_else(|| {
                RagError::storage(format!("unsupported metric '{}' in '{}'", metric, store_id))
            })?,
            record_count: to_usize(row.get("record_count"))?,
            corpus_fingerprint: row.get("corpus_fingerprint"),
            created_at: row.get("created_at"),
        })
    }

    async fn search(
        &self,
        store_id: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        validate_store_id(store_id)?;
        let pool = self.read_pool(store_id).await?;

        // Fetch all vectors and compute cosine similarity in Rust
        let rows = sqlx::query(
            "SELECT source, chunk_index, start_char, end_char, hash, text, embedding
             FROM records ORDER BY ordinal",
        )
        .fetch_all(&pool)
        .await
        .map_err(RagError::storage)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
            scored.push(ScoredRecord {
                text: row.get("text"),
                metadata: ChunkMetadata {
                    source: row.get("source"),
                    chunk_index: to_usize(row.get("chunk_index"))?,
                    start_char: to_usize(row.get("start_char"))?,
                    end_char: to_usize(row.get("end_char"))?,
                    hash: row.get("hash"),
                },
                score,
            });
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn drop_index(&self, store_id: &str) -> Result<bool> {
        validate_store_id(store_id)?;
        let mut pools = self.pools.lock().await;
        close_cached(&mut pools, store_id).await;
        match tokio::fs::remove_file(self.index_path(store_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RagError::storage(e)),
        }
    }
}

struct SqliteWriter {
    pool: SqlitePool,
    staging: PathBuf,
    final_path: PathBuf,
    store_id: String,
    next_ordinal: i64,
    pools: Pools,
}

impl SqliteWriter {
    async fn discard(self) -> Result<()> {
        self.pool.close().await;
        match tokio::fs::remove_file(&self.staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RagError::storage(e)),
        }
    }
}

#[async_trait]
impl IndexWriter for SqliteWriter {
    async fn append(&mut self, records: &[VectorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(RagError::storage)?;

        for record in records {
            sqlx::query(
                "INSERT INTO records (ordinal, source, chunk_index, start_char, end_char, hash, text, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(self.next_ordinal)
            .bind(&record.metadata.source)
            .bind(to_i64(record.metadata.chunk_index))
            .bind(to_i64(record.metadata.start_char))
            .bind(to_i64(record.metadata.end_char))
            .bind(&record.metadata.hash)
            .bind(&record.text)
            .bind(vec_to_blob(&record.embedding))
            .execute(&mut *tx)
            .await
            .map_err(RagError::storage)?;
            self.next_ordinal += 1;
        }

        tx.commit().await.map_err(RagError::storage)?;
        Ok(())
    }

    async fn commit(self: Box<Self>, meta: &IndexMeta) -> Result<()> {
        let this = *self;
        if meta.store_id != this.store_id {
            let err = RagError::config(format!(
                "commit for '{}' on a writer opened for '{}'",
                meta.store_id, this.store_id
            ));
            this.discard().await?;
            return Err(err);
        }

        let inserted = sqlx::query(
            "INSERT INTO index_meta (store_id, model, dims, metric, record_count, corpus_fingerprint, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.store_id)
        .bind(&meta.model)
        .bind(to_i64(meta.dims))
        .bind(meta.metric.as_str())
        .bind(to_i64(meta.record_count))
        .bind(&meta.corpus_fingerprint)
        .bind(meta.created_at)
        .execute(&this.pool)
        .await;
        if let Err(e) = inserted {
            this.discard().await?;
            return Err(RagError::storage(e));
        }

        this.pool.close().await;

        // Hold the pool map across eviction and rename so `read_pool` cannot
        // reopen the old file in between.
        let mut pools = this.pools.lock().await;
        close_cached(&mut pools, &this.store_id).await;
        tokio::fs::rename(&this.staging, &this.final_path)
            .await
            .map_err(RagError::storage)?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.discard().await
    }
}
