use std::collections::HashSet;
use tracing::debug;

use codelens_core::config::ParentExpansionSettings;
use codelens_core::types::{assign_ranks, ChunkId, SearchResult, SourceTag};

use crate::cache::MetadataCache;
use crate::handles::IndexHandles;

/// Pulls in the enclosing chunk (class, impl, module) of matched members.
pub struct ParentExpander {
    settings: ParentExpansionSettings,
}

impl ParentExpander {
    pub fn new(settings: ParentExpansionSettings) -> Self {
        Self { settings }
    }

    pub fn expand(&self, handles: &IndexHandles, cache: &MetadataCache, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut present: HashSet<ChunkId> = results.iter().map(|r| r.chunk_id.clone()).collect();
        let mut parents = Vec::new();
        for r in &results {
            if parents.len() >= self.settings.max_parents { break; }
            let Some(parent_id) = r.metadata.parent_chunk_id.as_ref() else { continue };
            if present.contains(parent_id) { continue; }
            let Some(meta) = cache.get_or_load(handles, parent_id) else { continue };
            present.insert(parent_id.clone());
            parents.push(SearchResult {
                chunk_id: parent_id.clone(),
                score: r.score * self.settings.decay,
                source: SourceTag::ParentExpansion,
                rank: 0,
                metadata: (*meta).clone(),
            });
        }
        if parents.is_empty() {
            return results;
        }
        debug!(added = parents.len(), "parent expansion");
        let mut out = results;
        out.extend(parents);
        out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        assign_ranks(&mut out);
        out
    }
}
