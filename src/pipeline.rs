//! Wiring from a [`Config`] to a ready [`RagChain`].
//!
//! ```text
//! corpus ─▶ chunks ─▶ store id ─▶ get_or_build (SQLite) ─▶ Retriever ┐
//!                                                                     ├─▶ RagChain
//! [chat] ─▶ ChatModel ─────────▶ QueryRewriter + AnswerSynthesizer ───┘
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use rag_chat_core::chat::ChatModel;
use rag_chat_core::chunk::split_documents;
use rag_chat_core::embedding::Embedder;
use rag_chat_core::index::{content_store_id, IndexManager, VectorIndex};
use rag_chat_core::models::Chunk;
use rag_chat_core::orchestrator::RagChain;
use rag_chat_core::retriever::Retriever;
use rag_chat_core::rewriter::QueryRewriter;
use rag_chat_core::synthesizer::AnswerSynthesizer;

use crate::chat::create_chat_model;
use crate::config::Config;
use crate::corpus::load_corpus;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteVectorStore;

/// Load the corpus and split it with the configured chunking parameters.
pub fn load_chunks(config: &Config) -> Result<Vec<Chunk>> {
    let params = config.chunking_params()?;
    let docs = load_corpus(&config.corpus)?;
    let chunks = split_documents(&docs, &params)?;
    info!(
        documents = docs.len(),
        chunks = chunks.len(),
        chunk_size = params.chunk_size,
        chunk_overlap = params.chunk_overlap,
        "split corpus"
    );
    Ok(chunks)
}

/// Store id for this corpus: `store.name`, or a content-derived id when
/// `store.key_by_content` is set.
pub fn resolve_store_id(config: &Config, chunks: &[Chunk]) -> String {
    if config.store.key_by_content {
        content_store_id(&config.store.name, chunks)
    } else {
        config.store.name.clone()
    }
}

pub fn index_manager(config: &Config) -> IndexManager {
    IndexManager::new(Arc::new(SqliteVectorStore::new(&config.store.root)))
        .with_batch_size(config.embedding.batch_size)
}

/// Load the index if it exists, otherwise build it. With `rebuild`, any
/// existing index under the store id is replaced.
pub async fn prepare_index(
    config: &Config,
    manager: &IndexManager,
    embedder: &dyn Embedder,
    rebuild: bool,
) -> Result<VectorIndex> {
    let chunks = load_chunks(config)?;
    let store_id = resolve_store_id(config, &chunks);

    let prepared = if rebuild {
        manager.build(&chunks, embedder, &store_id).await
    } else {
        manager.get_or_build(&chunks, embedder, &store_id).await
    };
    prepared.with_context(|| format!("Failed to prepare vector index '{}'", store_id))
}

/// Open an existing index without embedding anything. When an `embedder`
/// is given it must match the index's dimension.
///
/// With `key_by_content` the id depends on the corpus, so the corpus is
/// read and chunked to derive it.
pub async fn open_index(
    config: &Config,
    manager: &IndexManager,
    embedder: Option<&dyn Embedder>,
) -> Result<VectorIndex> {
    let store_id = if config.store.key_by_content {
        resolve_store_id(config, &load_chunks(config)?)
    } else {
        config.store.name.clone()
    };
    let opened = match embedder {
        Some(embedder) => manager.load_for(&store_id, embedder).await,
        None => manager.load(&store_id).await,
    };
    opened.with_context(|| {
        format!("Failed to open vector index '{}' (run `ragchat index` first)", store_id)
    })
}

pub fn retriever(
    config: &Config,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
) -> Result<Retriever> {
    Ok(Retriever::new(index, embedder).with_k(config.retrieval.k)?)
}

pub fn assemble_chain(
    config: &Config,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
) -> Result<RagChain> {
    Ok(RagChain::new(
        QueryRewriter::new(chat.clone()),
        retriever(config, index, embedder)?,
        AnswerSynthesizer::new(chat),
    ))
}

/// Everything the `ask`, `chat`, and `serve` commands need.
pub async fn build_chain(config: &Config) -> Result<RagChain> {
    let embedder = create_embedder(&config.embedding)?;
    let chat = create_chat_model(&config.chat)?;
    let manager = index_manager(config);
    let index = prepare_index(config, &manager, embedder.as_ref(), false).await?;
    assemble_chain(config, index, embedder, chat)
}
