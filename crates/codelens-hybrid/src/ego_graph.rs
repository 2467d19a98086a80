//! Relationship-graph expansion around the current results.
//!
//! Each anchor contributes its k-hop neighborhood. A neighbor scores
//! `anchor.score × cos(query, neighbor)` when its vector can be
//! reconstructed (and is pruned below `min_similarity`), otherwise
//! `anchor.score × fallback_decay`. Additions are capped at
//! `min(max_neighbors_per_hop × k_hops, 3k)`.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use codelens_core::config::EgoGraphSettings;
use codelens_core::traits::NeighborQuery;
use codelens_core::types::{assign_ranks, cosine_similarity, ChunkId, SearchResult, SourceTag};

use crate::cache::MetadataCache;
use crate::handles::IndexHandles;

/// Anchor id to the neighbor ids the graph returned for it.
pub type EgoGraph = BTreeMap<ChunkId, Vec<ChunkId>>;

#[derive(Debug, Clone)]
pub struct EgoGraphExpansion {
    pub results: Vec<SearchResult>,
    pub graph: EgoGraph,
}

pub struct EgoGraphExpander {
    settings: EgoGraphSettings,
}

impl EgoGraphExpander {
    pub fn new(settings: EgoGraphSettings) -> Self {
        Self { settings }
    }

    pub fn per_anchor_cap(&self) -> usize {
        self.settings.max_neighbors_per_hop.saturating_mul(self.settings.k_hops)
    }

    pub fn addition_cap(&self, k: usize) -> usize {
        self.per_anchor_cap().min(k.saturating_mul(3))
    }

    fn neighbor_query(&self) -> NeighborQuery {
        NeighborQuery {
            relation_types: self.settings.relation_types.clone(),
            max_depth: self.settings.k_hops,
            exclude_categories: self.settings.exclude_categories.clone(),
            edge_weights: self.settings.edge_weights.clone(),
            limit: self.per_anchor_cap(),
        }
    }

    /// `query_embedding` of `None` scores every neighbor with the fallback decay.
    pub fn expand(
        &self,
        handles: &IndexHandles,
        cache: &MetadataCache,
        query_embedding: Option<&[f32]>,
        anchors: Vec<SearchResult>,
        k: usize,
    ) -> EgoGraphExpansion {
        let mut graph = EgoGraph::new();
        let Some(store) = handles.graph.as_ref() else {
            let mut results = anchors;
            assign_ranks(&mut results);
            return EgoGraphExpansion { results, graph };
        };
        let anchor_ids: HashSet<ChunkId> = anchors.iter().map(|a| a.chunk_id.clone()).collect();
        let query = self.neighbor_query();
        let per_anchor = self.per_anchor_cap();
        let mut best: HashMap<ChunkId, SearchResult> = HashMap::new();

        for anchor in &anchors {
            let neighbors = match store.get_neighbors(&anchor.chunk_id, &query) {
                Ok(n) => n,
                Err(e) => {
                    warn!(chunk_id = %anchor.chunk_id, error = %e, "graph lookup failed for anchor");
                    continue;
                }
            };
            let neighbors: Vec<ChunkId> = neighbors.into_iter().filter(|n| n != &anchor.chunk_id).take(per_anchor).collect();
            for id in &neighbors {
                if anchor_ids.contains(id) { continue; }
                let Some(metadata) = cache.get_or_load(handles, id) else { continue };
                let vector = match query_embedding {
                    Some(_) => handles.dense.reconstruct(id).unwrap_or_else(|e| {
                        debug!(chunk_id = %id, error = %e, "neighbor vector lookup failed");
                        None
                    }),
                    None => None,
                };
                let score = match (query_embedding, vector) {
                    (Some(q), Some(v)) => {
                        let sim = cosine_similarity(q, &v);
                        if sim < self.settings.min_similarity { continue; }
                        anchor.score * sim
                    }
                    _ => anchor.score * self.settings.fallback_decay,
                };
                let keep = best.get(id).map_or(true, |prev| score > prev.score);
                if keep {
                    best.insert(id.clone(), SearchResult {
                        chunk_id: id.clone(),
                        score,
                        source: SourceTag::EgoGraph,
                        rank: 0,
                        metadata: (*metadata).clone(),
                    });
                }
            }
            graph.insert(anchor.chunk_id.clone(), neighbors);
        }

        let mut additions: Vec<SearchResult> = best.into_values().collect();
        sort_by_score(&mut additions);
        additions.truncate(self.addition_cap(k));
        debug!(anchors = anchors.len(), added = additions.len(), "ego-graph expansion");

        let mut results = if self.settings.include_anchors { anchors } else { Vec::new() };
        results.extend(additions);
        sort_by_score(&mut results);
        assign_ranks(&mut results);
        EgoGraphExpansion { results, graph }
    }
}

fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
}
