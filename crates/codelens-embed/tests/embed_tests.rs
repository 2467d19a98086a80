use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use codelens_core::traits::EmbeddingProvider;
use codelens_embed::{default_embedder, CachedEmbedder, HashEmbedder};

#[test]
fn fake_embedder_shapes_and_determinism() {
    // Force fake embedder to avoid loading large model
    std::env::set_var("APP_USE_FAKE_EMBEDDINGS", "1");

    let embedder = default_embedder(None, 16).expect("embedder");
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 1024, "embedding dim is 1024");
    assert_eq!(embedder.dim(), 1024);

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn hash_embedder_separates_unrelated_texts() {
    let e = HashEmbedder::new(64);
    let a = e.embed_query("merkle tree hashing").unwrap();
    let b = e.embed_query("Merkle tree hashing").unwrap();
    let c = e.embed_query("http retry backoff").unwrap();
    let cos = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
    assert!((cos(&a, &b) - 1.0).abs() < 1e-5, "case-insensitive tokens");
    assert!(cos(&a, &c) < 0.9);
    assert_eq!(e.model_id(), "hash:xxh64:d64");
}

struct Counting {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl EmbeddingProvider for Counting {
    fn model_id(&self) -> &str { self.inner.model_id() }
    fn dim(&self) -> usize { self.inner.dim() }
    fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_query(text)
    }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> { self.inner.embed_batch(texts) }
}

#[test]
fn cached_embedder_reuses_query_vectors() {
    let counting = Arc::new(Counting { inner: HashEmbedder::new(16), calls: AtomicUsize::new(0) });
    let cached = CachedEmbedder::new(counting.clone(), 8);
    let first = cached.embed_query("find the parser").unwrap();
    let second = cached.embed_query("find the parser").unwrap();
    assert_eq!(first, second);
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    cached.embed_query("another query").unwrap();
    assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    assert_eq!(cached.cached_queries(), 2);
}
