//! Recursive, overlap-aware text chunker.
//!
//! Splits a [`Document`] into [`Chunk`]s of at most `chunk_size` characters,
//! where each chunk after the first begins exactly `chunk_overlap` characters
//! before the previous chunk ended.
//!
//! # Algorithm
//!
//! 1. Compute the advance budget `chunk_size - chunk_overlap`: the amount of
//!    new text each chunk may contribute.
//! 2. Cut the text at the first separator (in priority order) that occurs in
//!    it, keeping each separator attached to the piece it terminates.
//! 3. Any piece still longer than the budget is cut again with the remaining,
//!    lower-priority separators. The empty separator (or running out of
//!    separators) hard-cuts every `budget` characters.
//! 4. The piece ends form a sorted list of breakpoints, no two further apart
//!    than the budget. Each chunk extends from its start to the furthest
//!    breakpoint within `chunk_size`; the next chunk starts `chunk_overlap`
//!    characters before that.
//!
//! Because breakpoints are never more than a budget apart, every chunk ends
//! on a natural boundary and advances past the previous chunk's end. No
//! character is dropped: chunk 0 followed by every later chunk minus its
//! leading overlap reproduces the document.
//!
//! Lengths and offsets are counted in `char`s, so multi-byte text never
//! splits inside a code point.
//!
//! # Example
//!
//! ```rust
//! use rag_chat_core::chunk::{split_document, ChunkingParams};
//! use rag_chat_core::models::Document;
//!
//! let doc = Document::new("moby.txt", "Call me Ishmael.");
//! let chunks = split_document(&doc, &ChunkingParams::default()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Call me Ishmael.");
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Separators tried in order: paragraph, line, sentence, word, character.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " ", ""];

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Chunk sizing policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

impl ChunkingParams {
    /// Build validated params with the default separator list.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let params = Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::config("chunk_size must be > 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Split a single document into ordered, overlapping chunks.
///
/// Returns an empty vector for an empty document and exactly one chunk for a
/// document no longer than `chunk_size`.
///
/// # Errors
///
/// [`RagError::Configuration`] if `chunk_size == 0` or
/// `chunk_overlap >= chunk_size`.
pub fn split_document(doc: &Document, params: &ChunkingParams) -> Result<Vec<Chunk>> {
    params.validate()?;

    if doc.text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, plus a trailing sentinel at text.len().
    let byte_at: Vec<usize> = doc
        .text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(doc.text.len()))
        .collect();
    let total = byte_at.len() - 1;

    if total <= params.chunk_size {
        return Ok(vec![make_chunk(&doc.source, 0, 0, total, &doc.text)]);
    }

    let budget = params.chunk_size - params.chunk_overlap;
    let mut breakpoints = Vec::new();
    collect_breakpoints(&doc.text, 0, &params.separators, budget, &mut breakpoints);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    loop {
        let limit = start + params.chunk_size;
        let end = if limit >= total {
            total
        } else {
            let pos = breakpoints.partition_point(|&b| b <= limit);
            match pos.checked_sub(1).map(|i| breakpoints[i]) {
                Some(b) if b > prev_end => b,
                _ => limit,
            }
        };

        let text = &doc.text[byte_at[start]..byte_at[end]];
        chunks.push(make_chunk(&doc.source, chunks.len(), start, end, text));

        if end >= total {
            break;
        }
        prev_end = end;
        start = end.saturating_sub(params.chunk_overlap).max(start + 1);
    }

    Ok(chunks)
}

/// Split every document in corpus order.
pub fn split_documents(docs: &[Document], params: &ChunkingParams) -> Result<Vec<Chunk>> {
    let mut out = Vec::new();
    for doc in docs {
        out.extend(split_document(doc, params)?);
    }
    Ok(out)
}

/// Push the end offset (in chars, absolute) of every piece of `text`.
///
/// Guarantees consecutive breakpoints are at most `max_piece` apart.
fn collect_breakpoints(
    text: &str,
    base: usize,
    separators: &[String],
    max_piece: usize,
    out: &mut Vec<usize>,
) {
    let len = text.chars().count();
    if len <= max_piece {
        out.push(base + len);
        return;
    }

    let chosen = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(sep.as_str()));

    let (idx, sep) = match chosen {
        Some((idx, sep)) if !sep.is_empty() => (idx, sep),
        _ => {
            hard_breakpoints(base, len, max_piece, out);
            return;
        }
    };

    let rest = &separators[idx + 1..];
    let mut offset = base;
    for piece in text.split_inclusive(sep.as_str()) {
        let n = piece.chars().count();
        if n <= max_piece {
            out.push(offset + n);
        } else {
            collect_breakpoints(piece, offset, rest, max_piece, out);
        }
        offset += n;
    }
}

fn hard_breakpoints(base: usize, len: usize, step: usize, out: &mut Vec<usize>) {
    let mut at = step;
    while at < len {
        out.push(base + at);
        at += step;
    }
    out.push(base + len);
}

fn make_chunk(source: &str, index: usize, start: usize, end: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        source: source.to_string(),
        chunk_index: index,
        start_char: start,
        end_char: end,
        text: text.to_string(),
        hash,
    }
}
