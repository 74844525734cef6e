//! Domain types shared by the chunker, both indexes and the retrieval engine.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChunkId = String;

/// Where a piece of text came from.
///
/// - `document_id`: stable report identity (never empty)
/// - `page`: 1-based page in the source PDF, when known
/// - `section`: heading or caption the block sits under
/// - `institution`: publisher code of the report (e.g. `kb`, `hd`, `khi`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub document_id: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
}

impl Source {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), page: None, section: None, institution: None }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.document_id)?;
        if let Some(page) = self.page {
            write!(f, " p.{page}")?;
        }
        if let Some(section) = &self.section {
            write!(f, " §{section}")?;
        }
        Ok(())
    }
}

/// What the upstream extractor turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[default]
    Text,
    Table,
    Image,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Table => "table",
            ChunkKind::Image => "image",
        }
    }
}

/// One normalized block handed over by the document/table/image pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source: Source,
    #[serde(default)]
    pub kind: ChunkKind,
    pub text: String,
}

impl SourceDocument {
    pub fn new(source: Source, kind: ChunkKind, text: impl Into<String>) -> Self {
        Self { source, kind, text: text.into() }
    }
}

/// An immutable, independently indexed piece of a source block.
///
/// `token_offset` is the position of the chunk's first token inside the
/// token stream of the block it was cut from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub source: Source,
    pub kind: ChunkKind,
    pub token_count: usize,
    pub token_offset: usize,
}

/// Retrieval method that produced a ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Dense,
    Sparse,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Dense => "dense",
            Method::Sparse => "sparse",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hit from a single retrieval method. `rank` is 1-based; `score` is
/// method specific, higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub rank: usize,
}

/// A chunk together with its fused relevance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub fused_score: f64,
}

/// Why a result carries no chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyReason {
    /// Nothing has been built yet, or the corpus has no chunks.
    EmptyCorpus,
    /// Every method ran and none matched.
    NoCandidates,
}

/// What the chat/generation layer receives for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The query actually searched (after optional rewriting).
    pub query: String,
    pub chunks: Vec<ScoredChunk>,
    /// Deduplicated sources of `chunks`, in first-seen order.
    pub citations: Vec<Source>,
    /// True when a method failed and the result comes from the others.
    pub degraded: bool,
    pub failed_methods: Vec<Method>,
    pub empty_reason: Option<EmptyReason>,
}

impl RetrievalResult {
    pub fn empty(query: impl Into<String>, reason: EmptyReason) -> Self {
        Self {
            query: query.into(),
            chunks: Vec::new(),
            citations: Vec::new(),
            degraded: false,
            failed_methods: Vec::new(),
            empty_reason: Some(reason),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.chunk.id.as_str()).collect()
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the chat history the caller passes along with a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_display_includes_known_parts() {
        let s = Source::new("kb_2024").with_page(12).with_section("전세 시장");
        assert_eq!(s.to_string(), "kb_2024 p.12 §전세 시장");
        assert_eq!(Source::new("hd").to_string(), "hd");
    }

    #[test]
    fn source_document_deserializes_with_defaults() {
        let doc: SourceDocument =
            serde_json::from_str(r#"{"source":{"document_id":"khi"},"text":"hello"}"#).expect("json");
        assert_eq!(doc.kind, ChunkKind::Text);
        assert_eq!(doc.source.page, None);
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&ChunkKind::Table).expect("json");
        assert_eq!(json, "\"table\"");
    }
}
