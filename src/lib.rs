//! # rag-chat
//!
//! Conversational retrieval-augmented question answering over a local text
//! corpus. This crate is the application shell around `rag-chat-core`:
//! configuration, the durable SQLite vector store, HTTP embedding and chat
//! providers, corpus loading, the `ragchat` CLI, and the JSON server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌────────────┐
//! │  Corpus  │──▶│ Chunk+Embed │──▶│   SQLite   │
//! │ file/dir │   │   (core)    │   │ one file / │
//! └──────────┘   └─────────────┘   │  store id  │
//!                                  └─────┬──────┘
//!                       ┌────────────────┤
//!                       ▼                ▼
//!                 ┌──────────┐     ┌──────────┐
//!                 │   CLI    │     │   HTTP   │
//!                 │(ragchat) │     │  server  │
//!                 └──────────┘     └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`corpus`] | File / directory corpus loader |
//! | [`db`] | SQLite connection helpers |
//! | [`sqlite_store`] | Durable `VectorStore` with atomic builds |
//! | [`embedding`] | OpenAI, Ollama, and local embedders |
//! | [`chat`] | OpenAI and Ollama chat models |
//! | [`pipeline`] | Config → ready `RagChain` |
//! | [`server`] | JSON HTTP server |

pub mod chat;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
