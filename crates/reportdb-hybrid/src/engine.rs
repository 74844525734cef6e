//! Hybrid retrieval over immutable index snapshots.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use reportdb_core::config::{RetrievalSettings, Settings};
use reportdb_core::error::{Error, Result};
use reportdb_core::traits::{EmbedProvider, QueryRewriter};
use reportdb_core::types::{Chunk, ConversationTurn, EmptyReason, Method, RetrievalResult, ScoredChunk, SourceDocument};
use reportdb_core::{Chunker, Cl100kTokenizer};
use reportdb_text::KeywordIndex;
use reportdb_vector::EmbeddingStore;

use crate::fusion::fuse;
use crate::snapshot::{IndexSnapshot, SnapshotInfo};

/// Per-corpus build mutexes. Share one registry between every engine that
/// may build the same corpus.
pub type BuildLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

pub fn new_build_locks() -> BuildLocks {
    Arc::new(DashMap::new())
}

/// Conversation state supplied by the caller for one query.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: String,
    pub history: Vec<ConversationTurn>,
    /// Ask the configured rewriter to turn the query into a standalone one.
    pub rewrite_query: bool,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), ..Self::default() }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_rewrite(mut self, rewrite: bool) -> Self {
        self.rewrite_query = rewrite;
        self
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
    }
}

pub struct RetrievalEngine {
    corpus_id: String,
    chunker: Chunker,
    store: EmbeddingStore,
    options: RetrievalSettings,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    rewrite_timeout: Duration,
    locks: BuildLocks,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    versions: AtomicU64,
}

impl RetrievalEngine {
    pub fn new(
        corpus_id: impl Into<String>,
        chunker: Chunker,
        store: EmbeddingStore,
        options: RetrievalSettings,
        locks: BuildLocks,
    ) -> Self {
        Self {
            corpus_id: corpus_id.into(),
            chunker,
            store,
            options,
            rewriter: None,
            rewrite_timeout: Duration::from_secs(30),
            locks,
            snapshot: RwLock::new(None),
            versions: AtomicU64::new(0),
        }
    }

    /// Engine for `settings.data.corpus_id` with the cl100k chunker and a
    /// cache-backed embedding store.
    pub fn from_settings(settings: &Settings, provider: Arc<dyn EmbedProvider>, locks: BuildLocks) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::from_settings(Arc::new(Cl100kTokenizer::new()?), &settings.chunking)?;
        let store = EmbeddingStore::from_settings(provider, settings);
        let mut engine = Self::new(settings.data.corpus_id.clone(), chunker, store, settings.retrieval.clone(), locks);
        engine.rewrite_timeout = settings.provider.timeout();
        Ok(engine)
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn snapshot_info(&self) -> Option<SnapshotInfo> {
        self.snapshot().map(|s| s.info())
    }

    /// Drop the published snapshot; queries report an empty corpus until the
    /// next build.
    pub fn invalidate(&self) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!(corpus = %self.corpus_id, "snapshot invalidated");
    }

    pub async fn ingest(&self, documents: &[SourceDocument]) -> Result<SnapshotInfo> {
        let chunks = self.chunker.chunk_corpus(documents)?;
        self.build(chunks).await
    }

    /// Build both indexes and publish them as the new snapshot. Builds of the
    /// same corpus are serialized; queries keep using the old snapshot until
    /// the swap.
    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<SnapshotInfo> {
        let lock = self
            .locks
            .entry(self.corpus_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut seen = HashSet::with_capacity(chunks.len());
        if let Some(dup) = chunks.iter().find(|c| !seen.insert(c.id.as_str())) {
            return Err(Error::InvalidInput(format!("duplicate chunk id {}", dup.id)));
        }

        let keyword_chunks = chunks.clone();
        let keyword_task = tokio::task::spawn_blocking(move || KeywordIndex::build(&keyword_chunks));
        let (dense, sparse) = tokio::join!(self.store.build(&chunks), keyword_task);
        let sparse = sparse.map_err(|e| Error::Operation(format!("keyword index task failed: {e}")))??;
        let dense = dense?;

        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(IndexSnapshot::new(version, chunks, dense, sparse)?);
        let info = snapshot.info();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        info!(corpus = %self.corpus_id, version, chunks = info.chunk_count, embedder = %info.embedder_id, "published snapshot");
        Ok(info)
    }

    pub async fn retrieve(&self, query_text: &str, top_k: usize, session: Option<&SessionContext>) -> Result<RetrievalResult> {
        if top_k > self.options.max_top_k {
            return Err(Error::InvalidInput(format!("top_k must be at most {}, got {top_k}", self.options.max_top_k)));
        }
        if query_text.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".into()));
        }
        if top_k == 0 {
            return Ok(RetrievalResult {
                query: query_text.to_string(),
                chunks: vec![],
                citations: vec![],
                degraded: false,
                failed_methods: vec![],
                empty_reason: None,
            });
        }
        let Some(snapshot) = self.snapshot().filter(|s| !s.is_empty()) else {
            debug!(corpus = %self.corpus_id, "query against empty corpus");
            return Ok(RetrievalResult::empty(query_text, EmptyReason::EmptyCorpus));
        };

        let query = self.effective_query(query_text, session).await;
        let pool = top_k.saturating_mul(self.options.candidate_pool_multiplier.max(1));
        let keyword_task = {
            let snapshot = Arc::clone(&snapshot);
            let query = query.clone();
            tokio::task::spawn_blocking(move || snapshot.sparse.search(&query, pool))
        };
        let (dense, sparse) = tokio::join!(self.store.search(&snapshot.dense, &query, pool), keyword_task);
        let sparse = sparse.map_err(|e| Error::Operation(format!("keyword search task failed: {e}"))).and_then(|hits| hits);

        let mut lists = Vec::with_capacity(2);
        let mut failed_methods = Vec::new();
        match (dense, sparse) {
            (Err(dense_err), Err(sparse_err)) => {
                warn!(dense = %dense_err, sparse = %sparse_err, "both retrieval methods failed");
                return Err(dense_err);
            }
            (dense, sparse) => {
                for (method, outcome) in [(Method::Dense, dense), (Method::Sparse, sparse)] {
                    match outcome {
                        Ok(list) => lists.push((method, list)),
                        Err(e) => {
                            warn!(method = %method, error = %e, "retrieval method failed; continuing degraded");
                            failed_methods.push(method);
                        }
                    }
                }
            }
        }
        debug!(
            pool,
            dense = lists.iter().find(|(m, _)| *m == Method::Dense).map_or(0, |(_, l)| l.len()),
            sparse = lists.iter().find(|(m, _)| *m == Method::Sparse).map_or(0, |(_, l)| l.len()),
            "candidates"
        );

        let fused = fuse(&lists, top_k, self.options.rrf_constant);
        let mut chunks = Vec::with_capacity(fused.len());
        let mut citations = Vec::new();
        for f in fused {
            let chunk = snapshot
                .chunk(&f.chunk_id)
                .ok_or_else(|| Error::IndexCorrupt(format!("candidate {} is not in the snapshot", f.chunk_id)))?;
            if !citations.contains(&chunk.source) {
                citations.push(chunk.source.clone());
            }
            chunks.push(ScoredChunk { chunk: chunk.clone(), fused_score: f.fused_score });
        }
        let empty_reason = chunks.is_empty().then_some(EmptyReason::NoCandidates);
        Ok(RetrievalResult { query, chunks, citations, degraded: !failed_methods.is_empty(), failed_methods, empty_reason })
    }

    /// The query to search with: the rewriter's output when the session asks
    /// for it and the rewrite succeeds, the original text otherwise.
    async fn effective_query(&self, query_text: &str, session: Option<&SessionContext>) -> String {
        let (Some(rewriter), Some(session)) = (&self.rewriter, session) else {
            return query_text.to_string();
        };
        if !session.rewrite_query {
            return query_text.to_string();
        }
        let start = session.history.len().saturating_sub(self.options.history_window);
        let history = &session.history[start..];
        match tokio::time::timeout(self.rewrite_timeout, rewriter.rewrite(query_text, history)).await {
            Ok(Ok(rewritten)) if !rewritten.trim().is_empty() => {
                debug!(session = %session.session_id, original = query_text, rewritten = %rewritten.trim(), "rewrote query");
                rewritten.trim().to_string()
            }
            Ok(Ok(_)) => {
                warn!(session = %session.session_id, "query rewriter returned nothing; using original query");
                query_text.to_string()
            }
            Ok(Err(e)) => {
                warn!(session = %session.session_id, error = %e, "query rewrite failed; using original query");
                query_text.to_string()
            }
            Err(_) => {
                warn!(session = %session.session_id, "query rewrite timed out; using original query");
                query_text.to_string()
            }
        }
    }
}
