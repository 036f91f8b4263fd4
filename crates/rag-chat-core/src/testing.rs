//! Deterministic embedder and chat doubles. Compiled for this crate's unit
//! tests and, with the `test-util` feature, for downstream integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chat::{ChatModel, ChatRequest};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::models::Turn;

/// Bag-of-words embedder: each lowercase word increments one hashed bucket.
pub struct HashEmbedder {
    model: String,
    dims: usize,
    texts: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self::named("hash-bow", dims)
    }

    pub fn named(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
            texts: AtomicUsize::new(0),
        }
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut h: u32 = 2166136261;
            for b in word.to_lowercase().bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
            v[h as usize % self.dims] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

/// Succeeds for `ok_batches` calls, then fails every call.
pub struct FailingEmbedder {
    inner: HashEmbedder,
    ok_batches: usize,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn after_batches(ok_batches: usize, dims: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dims),
            ok_batches,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n >= self.ok_batches {
            return Err(RagError::EmbeddingService("connection reset".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// A recorded generation call.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub system: String,
    pub history: Vec<Turn>,
    pub input: String,
}

/// Replays queued responses in order and records every request.
pub struct ScriptedChat {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<Recorded>>,
}

impl ScriptedChat {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// No queued responses: every call fails unless `push_error` adds one.
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn push_error(&self, msg: &str) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(RagError::GenerationService(msg.to_string())));
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ChatRequest<'_>) -> Result<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(Recorded {
            system: request.system.to_string(),
            history: request.history.to_vec(),
            input: request.input.to_string(),
        });
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(RagError::GenerationService("no scripted response".into())))
    }
}
