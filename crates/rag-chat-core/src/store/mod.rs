//! Durable vector storage abstraction.
//!
//! The [`VectorStore`] trait is the narrow interface the index lifecycle
//! needs from a persistence backend: existence check by store id, an
//! append-only staged build that becomes visible only on commit, metadata
//! lookup, and k-nearest-neighbor search.
//!
//! Implementations must be `Send + Sync`; a built index is read-only and may
//! be queried from many tasks at once.

pub mod memory;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{IndexMeta, ScoredRecord, VectorRecord};

/// Pluggable persistence for vector indexes, keyed by store id.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`exists`](VectorStore::exists) | Is there a *completed* build for this id? |
/// | [`begin_build`](VectorStore::begin_build) | Start a staged, append-only build |
/// | [`open`](VectorStore::open) | Read the metadata of a completed build |
/// | [`search`](VectorStore::search) | Top-k cosine similarity search |
/// | [`drop_index`](VectorStore::drop_index) | Delete a stored index |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns true only if a build for `store_id` was committed.
    async fn exists(&self, store_id: &str) -> Result<bool>;

    /// Start writing a new index. Nothing becomes visible to
    /// [`exists`](VectorStore::exists) or [`open`](VectorStore::open)
    /// until [`IndexWriter::commit`] succeeds.
    async fn begin_build(&self, store_id: &str) -> Result<Box<dyn IndexWriter>>;

    /// Metadata of a completed build, or [`RagError::IndexNotFound`].
    async fn open(&self, store_id: &str) -> Result<IndexMeta>;

    /// Records ordered by descending cosine similarity, at most `k` of them.
    async fn search(&self, store_id: &str, query_vec: &[f32], k: usize)
        -> Result<Vec<ScoredRecord>>;

    /// Remove a stored index. Returns false if there was nothing to remove.
    async fn drop_index(&self, store_id: &str) -> Result<bool>;
}

/// Staged writer returned by [`VectorStore::begin_build`].
///
/// Dropping a writer without committing discards the staged records.
#[async_trait]
pub trait IndexWriter: Send {
    /// Append records in order. Ordinals continue across calls.
    async fn append(&mut self, records: &[VectorRecord]) -> Result<()>;

    /// Publish the staged records under `meta.store_id`, replacing any
    /// previous build with the same id.
    async fn commit(self: Box<Self>, meta: &IndexMeta) -> Result<()>;

    /// Discard the staged records.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Store ids double as file names in durable backends, so they are limited
/// to ASCII letters, digits, `_`, `-`, and `.` (not leading).
pub fn validate_store_id(store_id: &str) -> Result<()> {
    if store_id.is_empty() {
        return Err(RagError::config("store id must not be empty"));
    }
    if store_id.starts_with('.') {
        return Err(RagError::config(format!(
            "store id '{}' must not start with '.'",
            store_id
        )));
    }
    if !store_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(RagError::config(format!(
            "store id '{}' may only contain letters, digits, '_', '-' and '.'",
            store_id
        )));
    }
    Ok(())
}
