//! The public face of the retrieval core.
//!
//! Query path: single hop (fused) → multi-hop → ego-graph → parent
//! expansion → rerank → truncate to `k`. Each stage after the first is
//! optional. Write paths go through the [`IndexSynchronizer`] under the
//! handles write lock; searches hold the read lock for their duration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

use codelens_core::config::Settings;
use codelens_core::traits::EmbeddingProvider;
use codelens_core::types::{assign_ranks, ChunkId, CodeChunk, SearchFilters, SearchMode, SearchResult};
use codelens_core::{Error, Result};

use crate::context::{SearchContext, SearchSession};
use crate::ego_graph::EgoGraphExpander;
use crate::executor::{SearchExecutor, SingleHopRequest};
use crate::fusion::FusionWeights;
use crate::handles::IndexHandles;
use crate::multi_hop::MultiHopExpander;
use crate::optimizer::{default_quality, OptimizationReport, WeightOptimizer};
use crate::parent::ParentExpander;
use crate::rerank::{RerankerParts, RerankerState, RerankingEngine};
use crate::router::RoutingDecision;
use crate::sync::{IndexSynchronizer, SyncReport};

/// A query plus per-call overrides of the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub k: Option<usize>,
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub filters: SearchFilters,
    pub parallel: Option<bool>,
    pub min_lexical_score: Option<f32>,
    pub multi_hop: Option<bool>,
    pub ego_graph: Option<bool>,
    pub rerank: Option<bool>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// `false` when the index was empty or unreadable.
    pub ready: bool,
    pub routing: Option<RoutingDecision>,
}

impl SearchOutcome {
    pub fn not_ready() -> Self {
        Self { results: Vec::new(), ready: false, routing: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub dense_chunks: usize,
    pub lexical_chunks: usize,
    pub in_sync: bool,
    pub fusion_weights: FusionWeights,
    pub reranker_state: RerankerState,
    pub cached_metadata: u64,
    pub embedding_model: String,
}

pub struct HybridSearcher {
    handles: RwLock<IndexHandles>,
    context: SearchContext,
    executor: SearchExecutor,
    multi_hop: MultiHopExpander,
    ego_graph: EgoGraphExpander,
    parent: ParentExpander,
    reranker: Arc<RerankingEngine>,
    sync: IndexSynchronizer,
    settings: Settings,
}

impl HybridSearcher {
    pub fn new(handles: IndexHandles, embedder: Arc<dyn EmbeddingProvider>, settings: Settings, reranker: Option<RerankerParts>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            handles: RwLock::new(handles),
            context: SearchContext::new(embedder, settings.cache.metadata_capacity),
            executor: SearchExecutor::new(&settings)?,
            multi_hop: MultiHopExpander::new(settings.multi_hop.clone()),
            ego_graph: EgoGraphExpander::new(settings.ego_graph.clone()),
            parent: ParentExpander::new(settings.parent_expansion.clone()),
            reranker: Arc::new(RerankingEngine::new(settings.reranker.clone(), reranker)),
            sync: IndexSynchronizer::new(settings.sync.batch_size),
            settings,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexHandles> {
        self.handles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexHandles> {
        self.handles.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn context(&self) -> &SearchContext {
        &self.context
    }

    pub fn reranker(&self) -> &Arc<RerankingEngine> {
        &self.reranker
    }

    /// Start loading the reranker model in the background.
    pub fn preload_reranker(&self) {
        self.context.attach_preload(self.reranker.preload_in_background());
    }

    /// Stop a pending background load and wait for its thread. A model that
    /// has not been committed yet is discarded.
    pub fn cancel_reranker_preload(&self) {
        self.context.cancel_preload();
    }

    /// Run a query in a fresh session.
    pub fn search(&self, request: &SearchRequest) -> SearchOutcome {
        self.search_with_session(request, &SearchSession::new())
    }

    pub fn search_with_session(&self, request: &SearchRequest, session: &SearchSession) -> SearchOutcome {
        let started = Instant::now();
        let handles = self.read();
        if !ready(&handles) {
            debug!("search on empty index");
            return SearchOutcome::not_ready();
        }
        let k = request.k.unwrap_or(self.settings.search.default_k).min(self.settings.search.max_k);
        let mode = request.mode.unwrap_or(self.settings.search.mode);
        let hop = SingleHopRequest {
            query: request.query.clone(),
            k,
            mode,
            parallel: request.parallel.unwrap_or(self.settings.search.parallel),
            min_lexical_score: request.min_lexical_score.unwrap_or(self.settings.search.min_lexical_score),
            filters: request.filters.clone(),
        };
        let mut results = self.executor.execute_single_hop(&handles, self.context.embedder(), &hop);

        let multi_hop = request.multi_hop.unwrap_or(self.settings.multi_hop.enabled);
        let ego_graph = request.ego_graph.unwrap_or(self.settings.ego_graph.enabled) && handles.graph.is_some();
        let query_embedding = if (multi_hop || ego_graph) && !results.is_empty() {
            match self.context.embedder().embed_query(&request.query) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "query embedding unavailable for expansion");
                    None
                }
            }
        } else {
            None
        };

        let cache = self.context.metadata();
        if multi_hop {
            if let Some(q) = query_embedding.as_deref() {
                results = self.multi_hop.expand(&handles, cache, q, results, k, &request.filters);
            }
        }
        if ego_graph {
            let expansion = self.ego_graph.expand(&handles, cache, query_embedding.as_deref(), results, k);
            debug!(anchors = expansion.graph.len(), "ego graph built");
            results = expansion.results;
        }
        if self.settings.parent_expansion.enabled {
            results = self.parent.expand(&handles, cache, results);
        }
        if request.rerank.unwrap_or(self.settings.reranker.enabled) {
            results = self.reranker.apply(session, &request.query, results, k);
        }
        results.truncate(k);
        assign_ranks(&mut results);
        debug!(query = %request.query, results = results.len(), ms = started.elapsed().as_millis() as u64, "search done");
        SearchOutcome { results, ready: true, routing: None }
    }

    /// Fused single-hop results with default options.
    pub fn fused_search(&self, query: &str, k: usize) -> Vec<SearchResult> {
        let handles = self.read();
        let hop = SingleHopRequest {
            query: query.to_string(),
            k,
            mode: SearchMode::Hybrid,
            parallel: self.settings.search.parallel,
            min_lexical_score: self.settings.search.min_lexical_score,
            filters: SearchFilters::default(),
        };
        self.executor.execute_single_hop(&handles, self.context.embedder(), &hop)
    }

    /// Embed chunk content and add the chunks to both indices.
    pub fn index_documents(&self, chunks: &[CodeChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.metadata.content.clone()).collect();
        let vectors = self.context.embedder().embed_batch(&texts)?;
        let dim = self.context.embedder().dim();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::InvalidConfig(format!("embedder returned dim {} but reports {dim}", bad.len())));
        }
        self.add_embeddings(chunks, vectors)
    }

    pub fn add_embeddings(&self, chunks: &[CodeChunk], vectors: Vec<Vec<f32>>) -> Result<usize> {
        let handles = self.write();
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        self.context.metadata().invalidate(&ids);
        let added = self.sync.add(&handles, chunks, &vectors)?;
        info!(added, "indexed chunks");
        Ok(added)
    }

    /// Remove every chunk of `file_path` from both indices.
    pub fn remove_file_chunks(&self, file_path: &str) -> Result<usize> {
        let handles = self.write();
        let ids: BTreeSet<ChunkId> = handles
            .dense
            .chunk_ids_for_file(file_path)?
            .into_iter()
            .chain(handles.lexical.chunk_ids_for_file(file_path)?)
            .collect();
        let ids: Vec<ChunkId> = ids.into_iter().collect();
        self.context.metadata().invalidate(&ids);
        let removed = self.sync.remove(&handles, &ids)?;
        info!(file = file_path, removed, "removed file chunks");
        Ok(removed)
    }

    pub fn clear_index(&self) -> Result<()> {
        let handles = self.write();
        self.context.metadata().invalidate_all();
        self.sync.clear(&handles)
    }

    pub fn is_ready(&self) -> bool {
        ready(&self.read())
    }

    pub fn get_stats(&self) -> IndexStats {
        let handles = self.read();
        let state = self.sync.validate_index_sync(&handles);
        IndexStats {
            total_chunks: state.dense_count,
            dense_chunks: state.dense_count,
            lexical_chunks: state.sparse_count,
            in_sync: state.in_sync,
            fusion_weights: self.executor.weights(),
            reranker_state: self.reranker.state(),
            cached_metadata: self.context.metadata().len(),
            embedding_model: self.context.embedder().model_id().to_string(),
        }
    }

    pub fn validate_index_sync(&self) -> bool {
        let state = self.sync.validate_index_sync(&self.read());
        if !state.in_sync {
            warn!(lexical = state.sparse_count, dense = state.dense_count, "indices out of sync");
        }
        state.in_sync
    }

    pub fn validate_strict(&self) -> Result<SyncReport> {
        self.sync.validate_strict(&self.read())
    }

    pub fn resync_from_dense(&self) -> Result<usize> {
        let handles = self.write();
        self.context.metadata().invalidate_all();
        self.sync.resync_from_dense(&handles)
    }

    pub fn fusion_weights(&self) -> FusionWeights {
        self.executor.weights()
    }

    /// Validate, normalize and apply new weights in one step.
    pub fn set_fusion_weights(&self, bm25_weight: f32, dense_weight: f32) -> Result<FusionWeights> {
        let weights = FusionWeights::new(bm25_weight, dense_weight)?;
        self.executor.set_weights(weights);
        info!(bm25 = weights.bm25(), dense = weights.dense(), "fusion weights updated");
        Ok(weights)
    }

    pub(crate) fn apply_fusion_weights(&self, weights: FusionWeights) {
        self.executor.set_weights(weights);
    }

    /// Grid-search the default weight combinations and keep the best.
    pub fn optimize_weights(&self, test_queries: &[String]) -> Result<OptimizationReport> {
        WeightOptimizer::new(self.settings.optimizer.k).optimize(self, test_queries, &WeightOptimizer::default_grid(), default_quality)
    }

    /// Swap every index collaborator at once. Cached metadata and recorded
    /// drift belong to the old handles and are discarded.
    pub fn replace_handles(&self, handles: IndexHandles) {
        let mut current = self.write();
        *current = handles;
        self.context.metadata().invalidate_all();
        self.sync.reset_drift();
        info!("index handles replaced");
    }
}

fn ready(handles: &IndexHandles) -> bool {
    let dense = handles.dense.count().unwrap_or_else(|e| {
        warn!(error = %e, "dense count failed");
        0
    });
    if dense > 0 {
        return true;
    }
    handles.lexical.count().map(|n| n > 0).unwrap_or(false)
}
