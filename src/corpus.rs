//! Corpus loading.
//!
//! `[corpus].path` may name a single file (loaded as one document) or a
//! directory, which is walked and filtered by the include/exclude globs.
//! Documents come back sorted by their relative path so chunk order, and
//! therefore the corpus fingerprint, is stable across runs.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use rag_chat_core::models::Document;

use crate::config::CorpusConfig;

pub fn load_corpus(config: &CorpusConfig) -> Result<Vec<Document>> {
    let root = &config.path;
    if !root.exists() {
        bail!("Corpus path does not exist: {}", root.display());
    }

    if root.is_file() {
        let text = std::fs::read_to_string(root)
            .with_context(|| format!("Failed to read corpus file: {}", root.display()))?;
        let source = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        return Ok(vec![Document::new(source, text)]);
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut docs = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_text(path)? {
            Some(text) => docs.push(Document::new(rel_str, text)),
            None => warn!(path = %path.display(), "skipping file that is not valid UTF-8"),
        }
    }

    docs.sort_by(|a, b| a.source.cmp(&b.source));
    debug!(root = %root.display(), documents = docs.len(), "loaded corpus");
    Ok(docs)
}

/// `Ok(None)` for files that are not UTF-8; other I/O errors propagate.
fn read_text(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read corpus file: {}", path.display())),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
