use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

use codelens_core::config::Settings;
use codelens_core::traits::EmbeddingProvider;
use codelens_core::types::{RawHit, SearchFilters, SearchMode, SearchResult, SourceTag};
use codelens_core::{Error, Result};

use crate::fusion::{single_list, FusionWeights, RrfFusion};
use crate::handles::IndexHandles;

#[derive(Debug, Clone)]
pub struct SingleHopRequest {
    pub query: String,
    pub k: usize,
    pub mode: SearchMode,
    pub parallel: bool,
    pub min_lexical_score: f32,
    pub filters: SearchFilters,
}

/// One lexical + dense round trip, fused.
pub struct SearchExecutor {
    pool: ThreadPool,
    fusion: RrfFusion,
    weights: RwLock<FusionWeights>,
    oversample: usize,
}

impl SearchExecutor {
    pub fn new(settings: &Settings) -> Result<Self> {
        let weights = FusionWeights::new(settings.fusion.bm25_weight, settings.fusion.dense_weight)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.executor.worker_threads.max(1))
            .thread_name(|i| format!("codelens-search-{i}"))
            .build()
            .map_err(|e| Error::ResourceExhausted(format!("search pool: {e}")))?;
        Ok(Self {
            pool,
            fusion: RrfFusion::new(settings.fusion.k_rrf)?,
            weights: RwLock::new(weights),
            oversample: settings.fusion.oversample.max(1),
        })
    }

    pub fn weights(&self) -> FusionWeights {
        *self.weights.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_weights(&self, weights: FusionWeights) {
        *self.weights.write().unwrap_or_else(PoisonError::into_inner) = weights;
    }

    /// Candidates requested from each sub-index; always more than `k`.
    pub fn candidate_count(&self, k: usize) -> usize {
        k.saturating_mul(self.oversample).max(k + 1)
    }

    /// Never fails: a failing sub-search is logged and counts as empty.
    pub fn execute_single_hop(&self, handles: &IndexHandles, embedder: &dyn EmbeddingProvider, req: &SingleHopRequest) -> Vec<SearchResult> {
        if req.k == 0 || req.query.trim().is_empty() {
            return Vec::new();
        }
        let started = Instant::now();
        let n = self.candidate_count(req.k);
        let lexical = || lexical_hits(handles, req, n);
        let dense = || dense_hits(handles, embedder, req, n);
        let results = match req.mode {
            SearchMode::Lexical => single_list(lexical(), SourceTag::Bm25, req.k),
            SearchMode::Semantic => single_list(dense(), SourceTag::Dense, req.k),
            SearchMode::Hybrid => {
                let (lex, den) = if req.parallel { self.pool.join(lexical, dense) } else { (lexical(), dense()) };
                debug!(lexical = lex.len(), dense = den.len(), "sub-searches done");
                self.fusion.fuse(lex, den, self.weights(), req.k)
            }
        };
        debug!(mode = ?req.mode, results = results.len(), ms = started.elapsed().as_millis() as u64, "single hop");
        results
    }
}

fn lexical_hits(handles: &IndexHandles, req: &SingleHopRequest, n: usize) -> Vec<RawHit> {
    match handles.lexical.search(&req.query, n, req.min_lexical_score, &req.filters) {
        Ok(hits) => hits.into_iter().filter(|h| h.score >= req.min_lexical_score).collect(),
        Err(e) => {
            warn!(error = %e, "lexical search failed, continuing without it");
            Vec::new()
        }
    }
}

fn dense_hits(handles: &IndexHandles, embedder: &dyn EmbeddingProvider, req: &SingleHopRequest, n: usize) -> Vec<RawHit> {
    let query = match embedder.embed_query(&req.query) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "query embedding failed, continuing without dense search");
            return Vec::new();
        }
    };
    match handles.dense.search(&query, n, &req.filters) {
        Ok(hits) => hits,
        Err(e) => {
            warn!(error = %e, "dense search failed, continuing without it");
            Vec::new()
        }
    }
}
