//! codelens-embed
//!
//! Embedding providers and the cross-encoder relevance model, all on candle.
//! [`default_embedder`] picks the real model or the hashing fallback.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use codelens_core::traits::EmbeddingProvider;

pub mod cache;
pub mod cross_encoder;
pub mod device;
pub mod hash;
pub mod model;
pub mod pool;
pub mod tokenize;

pub use cache::CachedEmbedder;
pub use cross_encoder::{CrossEncoderLoader, CrossEncoderModel};
pub use device::{select_device, HostMemory};
pub use hash::HashEmbedder;
pub use model::{resolve_model_dir, CandleEmbedder};
pub use pool::masked_mean_l2;

pub const DEFAULT_EMBED_MODEL: &str = "bge-m3";
pub const FAKE_EMBEDDING_DIM: usize = 1024;

pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Embedder for the default model, wrapped in a query cache.
pub fn default_embedder(model_dir: Option<&Path>, cache_capacity: u64) -> Result<Arc<dyn EmbeddingProvider>> {
    let inner: Arc<dyn EmbeddingProvider> = if use_fake_embeddings() {
        info!("using hash embedder");
        Arc::new(HashEmbedder::new(FAKE_EMBEDDING_DIM))
    } else {
        Arc::new(CandleEmbedder::load(&resolve_model_dir(model_dir, DEFAULT_EMBED_MODEL)?)?)
    };
    Ok(Arc::new(CachedEmbedder::new(inner, cache_capacity)))
}
