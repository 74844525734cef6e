//! Reciprocal rank fusion.

use std::collections::HashMap;

use reportdb_core::types::{ChunkId, Method, RankedCandidate};

pub const DEFAULT_RRF_CONSTANT: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: ChunkId,
    pub fused_score: f64,
    /// Lowest rank the chunk reached in any list.
    pub best_rank: usize,
}

/// Fuse ranked lists: a chunk at rank `r` contributes `1 / (constant + r)`
/// per list it appears in. Output is ordered by fused score, then best
/// rank, then chunk id, and holds at most `k` entries.
///
/// Contributions are summed smallest first, so reordering the input lists
/// cannot change a score in the last bit.
pub fn fuse(lists: &[(Method, Vec<RankedCandidate>)], k: usize, constant: f64) -> Vec<FusedCandidate> {
    if k == 0 {
        return vec![];
    }
    let mut acc: HashMap<&str, (Vec<f64>, usize)> = HashMap::new();
    for (_, list) in lists {
        let mut best_in_list: HashMap<&str, usize> = HashMap::new();
        for c in list {
            let r = best_in_list.entry(c.chunk_id.as_str()).or_insert(c.rank);
            *r = (*r).min(c.rank);
        }
        for (id, rank) in best_in_list {
            let e = acc.entry(id).or_insert_with(|| (Vec::new(), usize::MAX));
            e.0.push(1.0 / (constant + rank as f64));
            e.1 = e.1.min(rank);
        }
    }
    let mut fused: Vec<FusedCandidate> = acc
        .into_iter()
        .map(|(id, (mut parts, best_rank))| {
            parts.sort_by(f64::total_cmp);
            FusedCandidate { chunk_id: id.to_string(), fused_score: parts.iter().sum(), best_rank }
        })
        .collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused.truncate(k);
    fused
}
