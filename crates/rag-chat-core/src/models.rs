//! Core data models flowing through the pipeline.
//!
//! Documents are chunked into [`Chunk`]s, chunks are embedded into
//! [`VectorRecord`]s, and queries come back as [`ScoredRecord`]s. A
//! conversation is a caller-owned [`ConversationHistory`] of [`Turn`]s.

use serde::{Deserialize, Serialize};

/// Raw text plus the identifier of where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Source identifier (file path, URL, or any caller-chosen label).
    pub source: String,
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// A bounded substring of a [`Document`].
///
/// Offsets are in characters (Unicode scalar values), half-open
/// `[start_char, end_char)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Metadata carried alongside each stored vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub hash: String,
}

impl From<&Chunk> for ChunkMetadata {
    fn from(c: &Chunk) -> Self {
        Self {
            source: c.source.clone(),
            chunk_index: c.chunk_index,
            start_char: c.start_char,
            end_char: c.end_char,
            hash: c.hash.clone(),
        }
    }
}

/// A persisted (text, metadata, embedding) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// A record returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query vector, in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Ordered retrieval output consumed by the answer synthesizer.
pub type RetrievedPassage = ScoredRecord;

/// Similarity metric used by an index. Only cosine is implemented; the value
/// is persisted so a store's metric is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Metric::Cosine),
            _ => None,
        }
    }
}

/// Identity of a built index: what produced the vectors and how to compare them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub store_id: String,
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
    pub record_count: usize,
    /// SHA-256 over the chunk texts the index was built from.
    pub corpus_fingerprint: String,
    /// Build completion time, Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Append-only conversation log owned by the caller of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record one completed exchange: the user's utterance, then the answer.
    pub fn push_exchange(&mut self, utterance: &str, answer: &str) {
        self.turns.push(Turn::user(utterance));
        self.turns.push(Turn::assistant(answer));
    }
}

impl From<Vec<Turn>> for ConversationHistory {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}
