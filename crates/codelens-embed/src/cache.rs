use anyhow::Result;
use moka::sync::Cache;
use std::sync::Arc;
use tracing::trace;

use codelens_core::traits::EmbeddingProvider;

/// Memoizes query embeddings in front of another provider. Batch embedding
/// (the ingest path) bypasses the cache.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    queries: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: u64) -> Self {
        Self { inner, queries: Cache::new(capacity.max(1)) }
    }

    pub fn cached_queries(&self) -> u64 {
        self.queries.run_pending_tasks();
        self.queries.entry_count()
    }
}

impl EmbeddingProvider for CachedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(v) = self.queries.get(text) {
            trace!("query embedding cache hit");
            return Ok(v.as_ref().clone());
        }
        let v = self.inner.embed_query(text)?;
        self.queries.insert(text.to_string(), Arc::new(v.clone()));
        Ok(v)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts)
    }
}
