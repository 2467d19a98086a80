//! Offline grid search over fusion weights.

use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

use codelens_core::types::{SearchResult, SourceTag};
use codelens_core::{Error, Result};

use crate::engine::HybridSearcher;
use crate::fusion::FusionWeights;

#[derive(Debug, Clone, Serialize)]
pub struct WeightTrial {
    pub weights: FusionWeights,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub best: FusionWeights,
    pub best_score: f32,
    pub trials: Vec<WeightTrial>,
}

pub struct WeightOptimizer {
    k: usize,
}

impl WeightOptimizer {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }

    /// (0.2, 0.8) through (0.7, 0.3) in steps of 0.1.
    pub fn default_grid() -> Vec<(f32, f32)> {
        (2..=7).map(|i| (i as f32 / 10.0, (10 - i) as f32 / 10.0)).collect()
    }

    /// Score every combination on `queries` and commit the best one to
    /// `searcher`. The searcher's weights are restored between trials; the
    /// first combination wins ties.
    pub fn optimize<F>(&self, searcher: &HybridSearcher, queries: &[String], combinations: &[(f32, f32)], quality: F) -> Result<OptimizationReport>
    where
        F: Fn(&[SearchResult]) -> f32,
    {
        if queries.is_empty() {
            return Err(Error::InvalidConfig("weight optimization needs at least one query".to_string()));
        }
        if combinations.is_empty() {
            return Err(Error::InvalidConfig("weight optimization needs at least one combination".to_string()));
        }
        let candidates = combinations.iter().map(|&(b, d)| FusionWeights::new(b, d)).collect::<Result<Vec<_>>>()?;
        if !searcher.is_ready() {
            return Err(Error::NotReady);
        }

        let original = searcher.fusion_weights();
        let mut trials = Vec::with_capacity(candidates.len());
        for weights in candidates {
            searcher.apply_fusion_weights(weights);
            let total: f32 = queries.iter().map(|q| quality(&searcher.fused_search(q, self.k))).sum();
            let score = total / queries.len() as f32;
            searcher.apply_fusion_weights(original);
            info!(bm25 = weights.bm25(), dense = weights.dense(), score, "weight trial");
            trials.push(WeightTrial { weights, score });
        }

        let mut best = &trials[0];
        for t in &trials[1..] {
            if t.score > best.score { best = t; }
        }
        let (best, best_score) = (best.weights, best.score);
        searcher.apply_fusion_weights(best);
        info!(bm25 = best.bm25(), dense = best.dense(), best_score, "committed fusion weights");
        Ok(OptimizationReport { best, best_score, trials })
    }
}

/// 0.4 × file diversity + 0.3 × bm25/dense balance + 0.3 × share of results
/// scoring at least half the top score.
pub fn default_quality(results: &[SearchResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let n = results.len() as f32;
    let files: HashSet<&str> = results.iter().map(|r| r.metadata.file_path.as_str()).collect();
    let diversity = files.len() as f32 / n;
    let bm25 = results.iter().filter(|r| r.source == SourceTag::Bm25).count() as f32;
    let dense = results.iter().filter(|r| r.source == SourceTag::Dense).count() as f32;
    let balance = 1.0 - (bm25 - dense).abs() / n;
    let max = results.iter().map(|r| r.score).fold(f32::NEG_INFINITY, f32::max);
    let high = if max > 0.0 { results.iter().filter(|r| r.score >= 0.5 * max).count() as f32 / n } else { 0.0 };
    0.4 * diversity + 0.3 * balance + 0.3 * high
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelens_core::types::ChunkMetadata;

    fn result(id: &str, file: &str, source: SourceTag, score: f32) -> SearchResult {
        SearchResult {
            chunk_id: id.to_string(),
            score,
            source,
            rank: 0,
            metadata: ChunkMetadata { file_path: file.to_string(), ..Default::default() },
        }
    }

    #[test]
    fn grid_spans_point_two_to_point_seven() {
        let grid = WeightOptimizer::default_grid();
        assert_eq!(grid.len(), 6);
        assert!((grid[0].0 - 0.2).abs() < 1e-6 && (grid[0].1 - 0.8).abs() < 1e-6);
        assert!((grid[5].0 - 0.7).abs() < 1e-6 && (grid[5].1 - 0.3).abs() < 1e-6);
    }

    #[test]
    fn quality_rewards_diverse_balanced_lists() {
        let balanced = vec![
            result("a", "a.rs", SourceTag::Bm25, 1.0),
            result("b", "b.rs", SourceTag::Dense, 0.9),
        ];
        assert!((default_quality(&balanced) - 1.0).abs() < 1e-6);
        let skewed = vec![
            result("a", "a.rs", SourceTag::Dense, 1.0),
            result("b", "a.rs", SourceTag::Dense, 0.1),
        ];
        // diversity 0.5, balance 0.0, high ratio 0.5
        assert!((default_quality(&skewed) - 0.35).abs() < 1e-6);
        assert_eq!(default_quality(&[]), 0.0);
    }
}
