//! Per-searcher context and per-search session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use codelens_core::traits::EmbeddingProvider;

use crate::cache::MetadataCache;
use crate::rerank::PreloadHandle;

/// Owns what used to be process-wide: the (query-caching) embedder, the
/// chunk metadata cache and the background reranker preload.
pub struct SearchContext {
    embedder: Arc<dyn EmbeddingProvider>,
    metadata: MetadataCache,
    preload: Mutex<Option<PreloadHandle>>,
}

impl SearchContext {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, metadata_capacity: u64) -> Self {
        Self { embedder, metadata: MetadataCache::new(metadata_capacity), preload: Mutex::new(None) }
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Track a background preload. A previously tracked one is cancelled.
    pub fn attach_preload(&self, handle: PreloadHandle) {
        let previous = match self.preload.lock() {
            Ok(mut slot) => slot.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        drop(previous);
    }

    /// Cancel the tracked preload, if any, and join its thread.
    pub fn cancel_preload(&self) {
        let handle = match self.preload.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(h) = handle {
            h.cancel();
        }
    }
}

/// State scoped to one top-level search.
#[derive(Debug, Default)]
pub struct SearchSession {
    rerank_suspended: AtomicBool,
}

impl SearchSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend_reranking(&self) {
        self.rerank_suspended.store(true, Ordering::SeqCst);
    }

    pub fn is_reranking_suspended(&self) -> bool {
        self.rerank_suspended.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.rerank_suspended.store(false, Ordering::SeqCst);
    }
}
