//! Weighted Reciprocal Rank Fusion of the lexical and dense rank lists.
//!
//! `fused(c) = Σ_L w_L / (k_rrf + rank_L(c))` with 1-based ranks, summed only
//! over the lists that contain `c`. Ordering is total: fused score, then the
//! higher raw sub-score, then `chunk_id`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use codelens_core::types::{assign_ranks, ChunkId, ChunkMetadata, RawHit, SearchResult, SourceTag};
use codelens_core::{Error, Result};

/// Normalized list weights; `bm25_weight + dense_weight == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    bm25_weight: f32,
    dense_weight: f32,
}

impl FusionWeights {
    pub fn new(bm25_weight: f32, dense_weight: f32) -> Result<Self> {
        if !bm25_weight.is_finite() || !dense_weight.is_finite() {
            return Err(Error::InvalidConfig(format!("fusion weights must be finite, got ({bm25_weight}, {dense_weight})")));
        }
        if bm25_weight < 0.0 || dense_weight < 0.0 {
            return Err(Error::InvalidConfig(format!("fusion weights must be non-negative, got ({bm25_weight}, {dense_weight})")));
        }
        let sum = f64::from(bm25_weight) + f64::from(dense_weight);
        if sum <= 0.0 {
            return Err(Error::InvalidConfig("fusion weights must not both be zero".to_string()));
        }
        let bm25 = f64::from(bm25_weight) / sum;
        Ok(Self { bm25_weight: bm25 as f32, dense_weight: (1.0 - bm25) as f32 })
    }

    pub fn bm25(&self) -> f32 {
        self.bm25_weight
    }

    pub fn dense(&self) -> f32 {
        self.dense_weight
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { bm25_weight: 0.4, dense_weight: 0.6 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RrfFusion {
    k_rrf: f64,
}

struct Fused {
    chunk_id: ChunkId,
    score: f64,
    raw: f32,
    bm25_part: f64,
    dense_part: f64,
    metadata: ChunkMetadata,
}

impl RrfFusion {
    pub fn new(k_rrf: f32) -> Result<Self> {
        if !k_rrf.is_finite() || k_rrf <= 0.0 {
            return Err(Error::InvalidConfig(format!("k_rrf must be positive, got {k_rrf}")));
        }
        Ok(Self { k_rrf: f64::from(k_rrf) })
    }

    pub fn k_rrf(&self) -> f32 {
        self.k_rrf as f32
    }

    /// Fuse two rank lists and keep the top `k`. Each input list is taken in
    /// the order given; repeated ids within one list keep their first rank.
    pub fn fuse(&self, lexical: Vec<RawHit>, dense: Vec<RawHit>, weights: FusionWeights, k: usize) -> Vec<SearchResult> {
        let mut by_id: HashMap<ChunkId, Fused> = HashMap::new();
        // Dense metadata wins when both lists carry the chunk.
        for (list, weight, is_dense) in [(dense, weights.dense(), true), (lexical, weights.bm25(), false)] {
            let mut seen = HashSet::new();
            for hit in list {
                if !seen.insert(hit.chunk_id.clone()) { continue; }
                let rank = seen.len() as f64;
                let part = f64::from(weight) / (self.k_rrf + rank);
                let entry = by_id.entry(hit.chunk_id.clone()).or_insert_with(|| Fused {
                    chunk_id: hit.chunk_id.clone(),
                    score: 0.0,
                    raw: f32::NEG_INFINITY,
                    bm25_part: 0.0,
                    dense_part: 0.0,
                    metadata: hit.metadata,
                });
                entry.score += part;
                entry.raw = entry.raw.max(hit.score);
                if is_dense { entry.dense_part = part; } else { entry.bm25_part = part; }
            }
        }
        let mut fused: Vec<Fused> = by_id.into_values().collect();
        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.raw.total_cmp(&a.raw))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        fused.truncate(k);
        let mut results: Vec<SearchResult> = fused
            .into_iter()
            .map(|f| SearchResult {
                source: if f.bm25_part > f.dense_part { SourceTag::Bm25 } else { SourceTag::Dense },
                chunk_id: f.chunk_id,
                score: f.score as f32,
                rank: 0,
                metadata: f.metadata,
            })
            .collect();
        assign_ranks(&mut results);
        results
    }
}

/// Single-list passthrough for the lexical/semantic modes: raw scores kept,
/// duplicates dropped, truncated to `k`.
pub fn single_list(hits: Vec<RawHit>, source: SourceTag, k: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut results: Vec<SearchResult> = hits
        .into_iter()
        .filter(|h| seen.insert(h.chunk_id.clone()))
        .take(k)
        .map(|h| SearchResult::from_hit(h, source))
        .collect();
    assign_ranks(&mut results);
    results
}
