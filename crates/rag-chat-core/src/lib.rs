//! # rag-chat core
//!
//! Provider-agnostic logic for a retrieval-augmented chat pipeline: data
//! models, chunking, the vector index lifecycle, retrieval, history-aware
//! query rewriting, answer synthesis, and the per-turn orchestrator.
//!
//! This crate contains no HTTP, SQL, or filesystem I/O. Embedding and chat
//! backends plug in through the [`embedding::Embedder`] and
//! [`chat::ChatModel`] traits; durable storage through [`store::VectorStore`].
//!
//! ```text
//! utterance + history
//!        │
//!        ▼
//!  QueryRewriter ──▶ Retriever ──▶ AnswerSynthesizer ──▶ answer
//!   (ChatModel)     (Embedder +      (ChatModel)
//!                   VectorIndex)
//! ```

pub mod chat;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod rewriter;
pub mod store;
pub mod synthesizer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{RagError, Result};
