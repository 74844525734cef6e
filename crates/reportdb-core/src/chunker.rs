//! Token-window chunking of normalized report blocks.
//!
//! Each block is encoded once with the shared [`TokenCounter`] and cut into
//! windows of `max_tokens`, advancing by `max_tokens - overlap_tokens`. A
//! block that fits in one window (typically a converted table or an image
//! description) becomes exactly one chunk and is never merged with its
//! neighbours. Consecutive text blocks of the same page are joined with
//! newlines and windowed as one page text.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};
use crate::traits::TokenCounter;
use crate::types::{Chunk, ChunkKind, SourceDocument};

/// How far a window edge may move to land on a decodable token boundary.
/// Byte-level merges can straddle characters, so allow a few tokens of slack.
pub const MAX_BOUNDARY_SNAP: usize = 8;

pub struct Chunker {
    counter: Arc<dyn TokenCounter>,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(counter: Arc<dyn TokenCounter>, max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(Error::InvalidConfig("max_tokens must be greater than zero".into()));
        }
        if overlap_tokens >= max_tokens {
            return Err(Error::InvalidConfig(format!(
                "overlap_tokens ({overlap_tokens}) must be smaller than max_tokens ({max_tokens})"
            )));
        }
        Ok(Self { counter, max_tokens, overlap_tokens })
    }

    pub fn from_settings(counter: Arc<dyn TokenCounter>, settings: &ChunkingSettings) -> Result<Self> {
        Self::new(counter, settings.max_tokens, settings.overlap_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    pub fn stride(&self) -> usize {
        self.max_tokens - self.overlap_tokens
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Lazily chunk one block. Ids are numbered from `#0001`.
    pub fn chunk<'a>(&'a self, doc: &'a SourceDocument) -> Result<ChunkIter<'a>> {
        self.chunk_numbered(doc, 1)
    }

    fn chunk_numbered<'a>(&'a self, doc: &'a SourceDocument, first_ordinal: usize) -> Result<ChunkIter<'a>> {
        if doc.source.document_id.trim().is_empty() {
            return Err(Error::InvalidInput("source document_id must not be empty".into()));
        }
        let blank = doc.text.trim().is_empty();
        let tokens: Arc<[u32]> = if blank { Arc::from(Vec::new()) } else { Arc::from(self.counter.encode(&doc.text)) };
        let next_start = if tokens.is_empty() { None } else { Some(0) };
        Ok(ChunkIter { chunker: self, doc, tokens, next_start, ordinal: first_ordinal })
    }

    /// Chunk a whole corpus. Text blocks are first merged per page (see
    /// [`merge_page_text`]). Ordinals run per `document_id` across its
    /// blocks, so ids stay unique when a report arrives as many blocks.
    pub fn chunk_corpus(&self, docs: &[SourceDocument]) -> Result<Vec<Chunk>> {
        let blocks = merge_page_text(docs);
        let mut next_ordinal: HashMap<&str, usize> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for block in &blocks {
            let doc: &SourceDocument = block;
            let first = *next_ordinal.get(doc.source.document_id.as_str()).unwrap_or(&1);
            let mut produced = 0usize;
            for chunk in self.chunk_numbered(doc, first)? {
                let chunk = chunk?;
                if !seen.insert(chunk.id.clone()) {
                    return Err(Error::InvalidInput(format!("duplicate chunk id {}", chunk.id)));
                }
                out.push(chunk);
                produced += 1;
            }
            next_ordinal.insert(doc.source.document_id.as_str(), first + produced);
            debug!(source = %doc.source, kind = doc.kind.as_str(), chunks = produced, "chunked block");
        }
        info!(blocks = docs.len(), merged = blocks.len(), chunks = out.len(), max_tokens = self.max_tokens, overlap = self.overlap_tokens, "chunked corpus");
        Ok(out)
    }

    /// Decode `tokens[start..end]`, nudging the edges inward when they
    /// split a multi-byte character.
    fn decode_window(&self, tokens: &[u32], start: usize, end: usize) -> Result<(usize, usize, String)> {
        for ds in 0..=MAX_BOUNDARY_SNAP {
            let s = start + ds;
            if s >= end {
                break;
            }
            for de in 0..=MAX_BOUNDARY_SNAP {
                let e = end - de;
                if e <= s {
                    break;
                }
                if let Ok(text) = self.counter.decode(&tokens[s..e]) {
                    return Ok((s, e, text));
                }
            }
        }
        Err(Error::InvalidInput(format!("no decodable token window near {start}..{end}")))
    }
}

/// Join runs of consecutive `Text` blocks that share `(document_id, page)`
/// into one block, keeping the first block's source. Tables and images are
/// passed through untouched.
pub fn merge_page_text(docs: &[SourceDocument]) -> Vec<Cow<'_, SourceDocument>> {
    let mut out: Vec<Cow<'_, SourceDocument>> = Vec::with_capacity(docs.len());
    for doc in docs {
        if let Some(prev) = out.last_mut() {
            let same_page = prev.kind == ChunkKind::Text
                && doc.kind == ChunkKind::Text
                && prev.source.document_id == doc.source.document_id
                && prev.source.page == doc.source.page;
            if same_page {
                if !doc.text.trim().is_empty() {
                    let merged = prev.to_mut();
                    if merged.text.trim().is_empty() {
                        merged.text.clone_from(&doc.text);
                    } else {
                        merged.text.push('\n');
                        merged.text.push_str(&doc.text);
                    }
                }
                continue;
            }
        }
        out.push(Cow::Borrowed(doc));
    }
    out
}

/// Restartable iterator over the chunks of one block; cloning it replays
/// the remaining windows.
#[derive(Clone)]
pub struct ChunkIter<'a> {
    chunker: &'a Chunker,
    doc: &'a SourceDocument,
    tokens: Arc<[u32]>,
    next_start: Option<usize>,
    ordinal: usize,
}

impl ChunkIter<'_> {
    pub fn total_tokens(&self) -> usize {
        self.tokens.len()
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let n = self.tokens.len();
        let end = (start + self.chunker.max_tokens).min(n);
        let (s, e, text) = match self.chunker.decode_window(&self.tokens, start, end) {
            Ok(window) => window,
            Err(err) => {
                self.next_start = None;
                return Some(Err(err));
            }
        };
        self.next_start = if e >= n { None } else { Some(e.saturating_sub(self.chunker.overlap_tokens).max(s + 1)) };
        let chunk = Chunk {
            id: format!("{}#{:04}", self.doc.source.document_id, self.ordinal),
            text,
            source: self.doc.source.clone(),
            kind: self.doc.kind,
            token_count: e - s,
            token_offset: s,
        };
        self.ordinal += 1;
        Some(Ok(chunk))
    }
}
