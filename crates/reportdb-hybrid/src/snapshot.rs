use std::collections::HashMap;

use serde::Serialize;

use reportdb_core::error::{Error, Result};
use reportdb_core::types::{Chunk, ChunkId};
use reportdb_text::KeywordIndex;
use reportdb_vector::EmbeddingIndex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub version: u64,
    pub chunk_count: usize,
    pub embedder_id: String,
    pub dim: usize,
}

/// Both indexes built from one chunk set. Never mutated once published;
/// a rebuild produces a new snapshot.
pub struct IndexSnapshot {
    version: u64,
    chunks: HashMap<ChunkId, Chunk>,
    pub(crate) dense: EmbeddingIndex,
    pub(crate) sparse: KeywordIndex,
}

impl IndexSnapshot {
    /// Fails with `IndexCorrupt` unless the chunk set, the dense index and the
    /// keyword index hold exactly the same ids.
    pub fn new(version: u64, chunks: Vec<Chunk>, dense: EmbeddingIndex, sparse: KeywordIndex) -> Result<Self> {
        let mut ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        let dense_ids: Vec<&str> = dense.chunk_ids().iter().map(String::as_str).collect();
        let sparse_ids: Vec<&str> = sparse.chunk_ids().iter().map(String::as_str).collect();
        if ids != dense_ids || ids != sparse_ids {
            return Err(Error::IndexCorrupt(format!(
                "index id sets disagree: {} chunks, {} vectors, {} keyword documents",
                ids.len(),
                dense_ids.len(),
                sparse_ids.len()
            )));
        }
        let chunks = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        Ok(Self { version, chunks, dense, sparse })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            version: self.version,
            chunk_count: self.chunks.len(),
            embedder_id: self.dense.embedder_id().to_string(),
            dim: self.dense.dim(),
        }
    }
}
