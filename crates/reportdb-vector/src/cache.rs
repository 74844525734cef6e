//! On-disk embedding cache keyed by `(embedder_id, text)` fingerprints.
//!
//! One file per corpus, `<cache_dir>/<corpus_id>/vectors.bin`. The file is
//! replaced atomically (staging file in the same directory, fsync, rename),
//! so readers see either the previous cache or the new one, never a mix.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use reportdb_core::error::{Error, Result};

pub const CACHE_FORMAT_VERSION: u32 = 1;
pub const CACHE_FILE_NAME: &str = "vectors.bin";

pub type Fingerprint = [u8; 32];

/// Same text under a different embedder gets a different fingerprint.
pub fn fingerprint(embedder_id: &str, text: &str) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(embedder_id.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(text.as_bytes());
    *hasher.finalize().as_bytes()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHeader {
    pub format_version: u32,
    pub embedder_id: String,
    pub dim: u32,
    pub count: u64,
    pub written_at_ms: i64,
    /// blake3 of `payload`.
    pub checksum: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    header: CacheHeader,
    payload: Vec<u8>,
}

/// Result of reading the cache for a given embedder.
#[derive(Debug)]
pub enum CacheLoad {
    Missing,
    /// Written by another embedder or format version; treated as cold.
    Stale(String),
    Loaded(HashMap<Fingerprint, Vec<f32>>),
}

#[derive(Debug, Clone)]
pub struct VectorCache {
    path: PathBuf,
}

impl VectorCache {
    pub fn new(cache_dir: &Path, corpus_id: &str) -> Self {
        Self { path: cache_dir.join(corpus_id).join(CACHE_FILE_NAME) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, embedder_id: &str, dim: usize) -> Result<CacheLoad> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheLoad::Missing),
            Err(e) => return Err(e.into()),
        };
        let file: CacheFile = bincode::DefaultOptions::new()
            .with_limit(bytes.len() as u64)
            .deserialize(&bytes)
            .map_err(|e| self.corrupt(format!("undecodable file: {e}")))?;
        let h = &file.header;
        if h.format_version != CACHE_FORMAT_VERSION {
            return Ok(CacheLoad::Stale(format!("format version {} != {}", h.format_version, CACHE_FORMAT_VERSION)));
        }
        if h.embedder_id != embedder_id || h.dim as usize != dim {
            return Ok(CacheLoad::Stale(format!("written by {} (d{})", h.embedder_id, h.dim)));
        }
        if *blake3::hash(&file.payload).as_bytes() != h.checksum {
            return Err(self.corrupt("checksum mismatch".into()));
        }
        let entries: Vec<(Fingerprint, Vec<f32>)> = bincode::DefaultOptions::new()
            .with_limit(file.payload.len() as u64)
            .deserialize(&file.payload)
            .map_err(|e| self.corrupt(format!("undecodable entries: {e}")))?;
        if entries.len() as u64 != h.count {
            return Err(self.corrupt(format!("header says {} entries, found {}", h.count, entries.len())));
        }
        let mut map = HashMap::with_capacity(entries.len());
        for (fp, v) in entries {
            if v.len() != dim {
                return Err(self.corrupt(format!("vector of dimension {} in a d{dim} cache", v.len())));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(self.corrupt("non-finite vector component".into()));
            }
            map.insert(fp, v);
        }
        debug!(path = %self.path.display(), entries = map.len(), written_at_ms = h.written_at_ms, "read vector cache");
        Ok(CacheLoad::Loaded(map))
    }

    /// Replace the cache with exactly `entries`.
    pub fn store(&self, embedder_id: &str, dim: usize, entries: &HashMap<Fingerprint, Vec<f32>>) -> Result<()> {
        let mut sorted: Vec<(&Fingerprint, &Vec<f32>)> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let payload = bincode::DefaultOptions::new()
            .serialize(&sorted)
            .map_err(|e| Error::Serialization(format!("vector cache entries: {e}")))?;
        let header = CacheHeader {
            format_version: CACHE_FORMAT_VERSION,
            embedder_id: embedder_id.to_string(),
            dim: dim as u32,
            count: sorted.len() as u64,
            written_at_ms: Utc::now().timestamp_millis(),
            checksum: *blake3::hash(&payload).as_bytes(),
        };
        let bytes = bincode::DefaultOptions::new()
            .serialize(&CacheFile { header, payload })
            .map_err(|e| Error::Serialization(format!("vector cache file: {e}")))?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::InvalidConfig(format!("cache path {} has no parent", self.path.display())))?;
        fs::create_dir_all(dir)?;
        let mut staging = NamedTempFile::new_in(dir)?;
        staging.write_all(&bytes)?;
        staging.as_file().sync_all()?;
        staging.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        info!(path = %self.path.display(), entries = sorted.len(), bytes = bytes.len(), "wrote vector cache");
        Ok(())
    }

    fn corrupt(&self, what: String) -> Error {
        Error::IndexCorrupt(format!("vector cache {}: {what}", self.path.display()))
    }
}
