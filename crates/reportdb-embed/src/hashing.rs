//! Deterministic feature-hashing embedder.
//!
//! Every lowercase word is hashed into one of `dim` buckets with a signed
//! weight. Texts sharing words get similar vectors, which is enough for
//! offline runs and tests; it carries no semantics beyond word overlap.

use std::hash::Hasher;

use async_trait::async_trait;
use twox_hash::XxHash64;

use reportdb_core::error::{Error, Result};
use reportdb_core::traits::EmbedProvider;

pub const DEFAULT_DIM: usize = 1024;

pub struct HashingEmbedder {
    dim: usize,
    id: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("hashing embedder dimension must be positive".into()));
        }
        Ok(Self { dim, id: format!("hashing:xxh64:d{dim}") })
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let words = text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty());
        for word in words {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(word.to_lowercase().as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign * (1.0 + ((h >> 32) as u32 as f32) / (u32::MAX as f32));
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbedProvider for HashingEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
