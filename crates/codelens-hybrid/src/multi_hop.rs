use std::collections::HashSet;
use tracing::{debug, warn};

use codelens_core::config::MultiHopSettings;
use codelens_core::types::{assign_ranks, cosine_similarity, ChunkId, SearchFilters, SearchResult, SourceTag};

use crate::cache::MetadataCache;
use crate::handles::IndexHandles;

/// Iterative expansion: each hop seeds dense lookups with the vectors of the
/// current top chunks, then the whole pool is re-scored against the query.
pub struct MultiHopExpander {
    settings: MultiHopSettings,
}

impl MultiHopExpander {
    pub fn new(settings: MultiHopSettings) -> Self {
        Self { settings }
    }

    /// Additions allowed per hop.
    pub fn additions_per_hop(&self, k: usize) -> usize {
        ((self.settings.expansion_factor as f64 * k as f64).ceil() as usize).max(1)
    }

    pub fn expand(
        &self,
        handles: &IndexHandles,
        cache: &MetadataCache,
        query_embedding: &[f32],
        initial: Vec<SearchResult>,
        k: usize,
        filters: &SearchFilters,
    ) -> Vec<SearchResult> {
        let mut seen: HashSet<ChunkId> = HashSet::new();
        let mut pool: Vec<SearchResult> = initial.into_iter().filter(|r| seen.insert(r.chunk_id.clone())).collect();
        if self.settings.hops <= 1 || pool.is_empty() || k == 0 {
            pool.truncate(k);
            assign_ranks(&mut pool);
            return pool;
        }

        let cap = self.additions_per_hop(k);
        let mut used_seeds: HashSet<ChunkId> = HashSet::new();
        for hop in 1..self.settings.hops {
            let seeds: Vec<ChunkId> = pool
                .iter()
                .filter(|r| !used_seeds.contains(&r.chunk_id))
                .take(self.settings.seeds_per_hop)
                .map(|r| r.chunk_id.clone())
                .collect();
            let mut added = 0usize;
            for seed in seeds {
                used_seeds.insert(seed.clone());
                if added >= cap { break; }
                let vector = match handles.dense.reconstruct(&seed) {
                    Ok(Some(v)) => v,
                    Ok(None) => { debug!(chunk_id = %seed, "seed has no stored vector"); continue; }
                    Err(e) => { warn!(chunk_id = %seed, error = %e, "seed vector lookup failed"); continue; }
                };
                let hits = match handles.dense.search(&vector, k + cap, filters) {
                    Ok(h) => h,
                    Err(e) => { warn!(chunk_id = %seed, error = %e, "seeded dense search failed"); continue; }
                };
                for hit in hits {
                    if added >= cap { break; }
                    if !seen.insert(hit.chunk_id.clone()) { continue; }
                    cache.insert(hit.chunk_id.clone(), hit.metadata.clone());
                    pool.push(SearchResult::from_hit(hit, SourceTag::MultiHop));
                    added += 1;
                }
            }
            debug!(hop, added, pool = pool.len(), "multi-hop expansion");
        }

        for r in &mut pool {
            r.score = match handles.dense.reconstruct(&r.chunk_id) {
                Ok(Some(v)) => cosine_similarity(query_embedding, &v),
                Ok(None) => 0.0,
                Err(e) => {
                    debug!(chunk_id = %r.chunk_id, error = %e, "rescore lookup failed");
                    0.0
                }
            };
        }
        pool.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        pool.truncate(k);
        assign_ranks(&mut pool);
        pool
    }
}
