//! Dense embedding store: builds an exact-search index over chunk vectors,
//! reusing cached vectors for unchanged text.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use reportdb_core::config::{expand_path, Settings};
use reportdb_core::error::{Error, Result};
use reportdb_core::traits::EmbedProvider;
use reportdb_core::types::{Chunk, ChunkId, RankedCandidate};

use crate::cache::{fingerprint, CacheLoad, Fingerprint, VectorCache};
use crate::retry::RetryPolicy;

/// L2-normalized vectors for one chunk set, sorted by chunk id.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    embedder_id: String,
    dim: usize,
    ids: Vec<ChunkId>,
    vectors: Vec<Vec<f32>>,
}

impl EmbeddingIndex {
    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn chunk_ids(&self) -> &[ChunkId] {
        &self.ids
    }

    pub fn vector(&self, chunk_id: &str) -> Option<&[f32]> {
        let i = self.ids.binary_search_by(|id| id.as_str().cmp(chunk_id)).ok()?;
        Some(&self.vectors[i])
    }
}

/// What a build did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub chunks: usize,
    pub cache_hits: usize,
    pub embedded: usize,
    pub provider_calls: usize,
    pub cache_written: bool,
    pub corrupt_cache_discarded: bool,
}

pub struct EmbeddingStore {
    provider: Arc<dyn EmbedProvider>,
    retry: RetryPolicy,
    batch_size: usize,
    cache: Option<VectorCache>,
}

impl EmbeddingStore {
    pub fn new(provider: Arc<dyn EmbedProvider>, retry: RetryPolicy, batch_size: usize) -> Self {
        Self { provider, retry, batch_size: batch_size.max(1), cache: None }
    }

    pub fn with_cache(mut self, cache: VectorCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Store wired from settings; the cache lives under
    /// `<cache.dir>/<data.corpus_id>` when enabled.
    pub fn from_settings(provider: Arc<dyn EmbedProvider>, settings: &Settings) -> Self {
        let store = Self::new(provider, RetryPolicy::from_settings(&settings.provider), settings.provider.batch_size);
        if settings.cache.enabled {
            let dir = expand_path(&settings.cache.dir);
            store.with_cache(VectorCache::new(&dir, &settings.data.corpus_id))
        } else {
            store
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbedProvider> {
        &self.provider
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.cache.as_ref().map(VectorCache::path)
    }

    pub async fn build(&self, chunks: &[Chunk]) -> Result<EmbeddingIndex> {
        self.build_with_stats(chunks).await.map(|(index, _)| index)
    }

    /// Embed every chunk, reusing cached vectors. The cache is rewritten only
    /// after every vector is in hand, and only when its contents change.
    pub async fn build_with_stats(&self, chunks: &[Chunk]) -> Result<(EmbeddingIndex, BuildStats)> {
        let embedder_id = self.provider.embedder_id().to_string();
        let dim = self.provider.dim();
        let mut stats = BuildStats { chunks: chunks.len(), ..BuildStats::default() };

        let mut seen_ids = HashSet::with_capacity(chunks.len());
        for c in chunks {
            if !seen_ids.insert(c.id.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate chunk id {}", c.id)));
            }
        }
        let fps: Vec<Fingerprint> = chunks.iter().map(|c| fingerprint(&embedder_id, &c.text)).collect();

        let (mut known, must_rewrite) = self.read_cache(&embedder_id, dim, &mut stats)?;
        let cached_keys: HashSet<Fingerprint> = known.keys().copied().collect();

        let mut pending: Vec<(Fingerprint, String)> = Vec::new();
        let mut queued: HashSet<Fingerprint> = HashSet::new();
        for (c, fp) in chunks.iter().zip(&fps) {
            if known.contains_key(fp) {
                stats.cache_hits += 1;
            } else if queued.insert(*fp) {
                pending.push((*fp, c.text.clone()));
            }
        }
        info!(chunks = chunks.len(), cache_hits = stats.cache_hits, misses = pending.len(), embedder = %embedder_id, "embedding build");

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.embed_checked(&texts, &mut stats).await?;
            for ((fp, _), v) in batch.iter().zip(vectors) {
                known.insert(*fp, v);
            }
            stats.embedded += batch.len();
        }

        let mut order: Vec<usize> = (0..chunks.len()).collect();
        order.sort_by(|&a, &b| chunks[a].id.cmp(&chunks[b].id));
        let mut ids = Vec::with_capacity(chunks.len());
        let mut vectors = Vec::with_capacity(chunks.len());
        for i in order {
            let v = known
                .get(&fps[i])
                .ok_or_else(|| Error::Operation(format!("no vector for chunk {}", chunks[i].id)))?;
            ids.push(chunks[i].id.clone());
            vectors.push(v.clone());
        }

        let current: HashSet<Fingerprint> = fps.iter().copied().collect();
        if let Some(cache) = &self.cache {
            if must_rewrite || stats.embedded > 0 || current != cached_keys {
                known.retain(|fp, _| current.contains(fp));
                match cache.store(&embedder_id, dim, &known) {
                    Ok(()) => stats.cache_written = true,
                    Err(e) => warn!(path = %cache.path().display(), error = %e, "could not write vector cache"),
                }
            } else {
                debug!(path = %cache.path().display(), "vector cache unchanged");
            }
        }

        info!(chunks = ids.len(), embedded = stats.embedded, provider_calls = stats.provider_calls, cache_written = stats.cache_written, "built embedding index");
        Ok((EmbeddingIndex { embedder_id, dim, ids, vectors }, stats))
    }

    /// Exact cosine top-k. Ties go to the smaller chunk id.
    pub async fn search(&self, index: &EmbeddingIndex, query_text: &str, k: usize) -> Result<Vec<RankedCandidate>> {
        if k == 0 || index.is_empty() {
            return Ok(vec![]);
        }
        if index.embedder_id != self.provider.embedder_id() {
            return Err(Error::InvalidInput(format!(
                "index built with {} but the store embeds with {}",
                index.embedder_id,
                self.provider.embedder_id()
            )));
        }
        let q = self.embed_query(query_text).await?;
        if q.iter().all(|x| *x == 0.0) {
            debug!("query embedding is all zeros");
            return Ok(vec![]);
        }
        let mut scored: Vec<(usize, f32)> = index.vectors.iter().map(|v| dot(&q, v)).enumerate().collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| index.ids[a.0].cmp(&index.ids[b.0])));
        scored.truncate(k);
        debug!(k, hits = scored.len(), "dense search");
        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(r, (i, score))| RankedCandidate { chunk_id: index.ids[i].clone(), score, rank: r + 1 })
            .collect())
    }

    pub async fn embed_query(&self, query_text: &str) -> Result<Vec<f32>> {
        let mut stats = BuildStats::default();
        let mut out = self.embed_checked(&[query_text.to_string()], &mut stats).await?;
        out.pop().ok_or_else(|| Error::ProviderUnavailable("provider returned no query vector".into()))
    }

    fn read_cache(&self, embedder_id: &str, dim: usize, stats: &mut BuildStats) -> Result<(HashMap<Fingerprint, Vec<f32>>, bool)> {
        let Some(cache) = &self.cache else {
            return Ok((HashMap::new(), false));
        };
        match cache.load(embedder_id, dim) {
            Ok(CacheLoad::Loaded(map)) => Ok((map, false)),
            Ok(CacheLoad::Missing) => Ok((HashMap::new(), false)),
            Ok(CacheLoad::Stale(reason)) => {
                info!(path = %cache.path().display(), %reason, "ignoring vector cache from another embedder");
                Ok((HashMap::new(), true))
            }
            Err(Error::IndexCorrupt(msg)) => {
                warn!(%msg, "discarding corrupt vector cache; re-embedding everything");
                stats.corrupt_cache_discarded = true;
                Ok((HashMap::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    async fn embed_checked(&self, texts: &[String], stats: &mut BuildStats) -> Result<Vec<Vec<f32>>> {
        let provider = &self.provider;
        let mut calls = 0usize;
        let calls_ref = &mut calls;
        let raw = self
            .retry
            .run("embed_batch", || {
                *calls_ref += 1;
                provider.embed_batch(texts)
            })
            .await;
        stats.provider_calls += calls;
        let raw = raw?;
        if raw.len() != texts.len() {
            return Err(Error::ProviderUnavailable(format!("provider returned {} vectors for {} inputs", raw.len(), texts.len())));
        }
        let dim = provider.dim();
        raw.into_iter()
            .map(|mut v| {
                if v.len() != dim {
                    return Err(Error::DimensionMismatch { expected: dim, actual: v.len() });
                }
                if v.iter().any(|x| !x.is_finite()) {
                    return Err(Error::ProviderUnavailable("provider returned non-finite values".into()));
                }
                normalize(&mut v);
                Ok(v)
            })
            .collect()
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
