#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use codelens_core::config::Settings;
use codelens_core::traits::{DenseIndex, MemoryGauge, EmbeddingProvider, LexicalIndex, ModelLoader, RelevanceModel};
use codelens_core::types::{cosine_similarity, ChunkId, ChunkKind, ChunkMetadata, CodeChunk, RawHit, SearchFilters};
use codelens_graph::CodeGraph;
use codelens_hybrid::{HybridSearcher, IndexHandles, RerankerParts};

pub const DIM: usize = 64;

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bag-of-words embedder: each token bumps one hashed bucket.
#[derive(Default)]
pub struct BagEmbedder {
    pub query_calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl BagEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for t in tokens(text) {
            let mut h = DefaultHasher::new();
            t.hash(&mut h);
            v[(h.finish() % DIM as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingProvider for BagEmbedder {
    fn model_id(&self) -> &str {
        "bag:test"
    }

    fn dim(&self) -> usize {
        DIM
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("embedding backend offline"));
        }
        Ok(Self::vector(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("embedding backend offline"));
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// In-memory vector store ranked by cosine similarity. `script` replaces the
/// ranking with a fixed id order.
#[derive(Default)]
pub struct MemDense {
    rows: RwLock<BTreeMap<ChunkId, (ChunkMetadata, Vec<f32>)>>,
    script: RwLock<Option<Vec<(ChunkId, f32)>>>,
    pub fail_search: AtomicBool,
    pub fail_remove: AtomicBool,
}

impl MemDense {
    pub fn script(&self, hits: &[(&str, f32)]) {
        *self.script.write().unwrap() = Some(hits.iter().map(|(id, s)| (id.to_string(), *s)).collect());
    }

    pub fn ids(&self) -> Vec<ChunkId> {
        self.rows.read().unwrap().keys().cloned().collect()
    }
}

impl DenseIndex for MemDense {
    fn add(&self, chunks: &[CodeChunk], vectors: &[Vec<f32>]) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        for (c, v) in chunks.iter().zip(vectors) {
            rows.insert(c.chunk_id.clone(), (c.metadata.clone(), v.clone()));
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, filters: &SearchFilters) -> Result<Vec<RawHit>> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(anyhow!("vector store unavailable"));
        }
        let rows = self.rows.read().unwrap();
        if let Some(script) = self.script.read().unwrap().as_ref() {
            return Ok(script
                .iter()
                .filter_map(|(id, score)| rows.get(id).map(|(m, _)| RawHit { chunk_id: id.clone(), score: *score, metadata: m.clone() }))
                .take(k)
                .collect());
        }
        let mut hits: Vec<RawHit> = rows
            .iter()
            .filter(|(_, (m, _))| filters.matches(m))
            .map(|(id, (m, v))| RawHit { chunk_id: id.clone(), score: cosine_similarity(query, v), metadata: m.clone() })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(anyhow!("vector store is read-only"));
        }
        let mut rows = self.rows.write().unwrap();
        Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count())
    }

    fn reconstruct(&self, id: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.rows.read().unwrap().get(id).map(|(_, v)| v.clone()))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.rows.read().unwrap().len())
    }

    fn get_metadata(&self, id: &str) -> Result<Option<ChunkMetadata>> {
        Ok(self.rows.read().unwrap().get(id).map(|(m, _)| m.clone()))
    }

    fn scan_metadata(&self) -> Result<Vec<CodeChunk>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .map(|(id, (m, _))| CodeChunk { chunk_id: id.clone(), metadata: m.clone() })
            .collect())
    }

    fn chunk_ids(&self) -> Result<Vec<ChunkId>> {
        Ok(self.ids())
    }

    fn chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<ChunkId>> {
        let rows = self.rows.read().unwrap();
        Ok(rows.iter().filter(|(_, (m, _))| m.file_path == file_path).map(|(id, _)| id.clone()).collect())
    }

    fn clear(&self) -> Result<()> {
        self.rows.write().unwrap().clear();
        Ok(())
    }
}

/// In-memory keyword index scoring by query-term frequency.
#[derive(Default)]
pub struct MemLexical {
    docs: RwLock<BTreeMap<ChunkId, (Vec<String>, ChunkMetadata)>>,
    script: RwLock<Option<Vec<(ChunkId, f32)>>>,
    pub fail_index: AtomicBool,
    pub fail_search: AtomicBool,
}

impl MemLexical {
    pub fn script(&self, hits: &[(&str, f32)]) {
        *self.script.write().unwrap() = Some(hits.iter().map(|(id, s)| (id.to_string(), *s)).collect());
    }

    /// Drop documents behind the synchronizer's back.
    pub fn corrupt(&self, keep: usize) {
        let mut docs = self.docs.write().unwrap();
        let drop: Vec<ChunkId> = docs.keys().skip(keep).cloned().collect();
        for id in drop {
            docs.remove(&id);
        }
    }
}

impl LexicalIndex for MemLexical {
    fn index(&self, texts: &[String], ids: &[ChunkId], metadata: &[ChunkMetadata]) -> Result<()> {
        if self.fail_index.load(Ordering::SeqCst) {
            return Err(anyhow!("no space left on device"));
        }
        let mut docs = self.docs.write().unwrap();
        for ((t, id), m) in texts.iter().zip(ids).zip(metadata) {
            docs.insert(id.clone(), (tokens(t), m.clone()));
        }
        Ok(())
    }

    fn search(&self, query: &str, k: usize, min_score: f32, filters: &SearchFilters) -> Result<Vec<RawHit>> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(anyhow!("index segment missing"));
        }
        let docs = self.docs.read().unwrap();
        if let Some(script) = self.script.read().unwrap().as_ref() {
            return Ok(script
                .iter()
                .filter_map(|(id, score)| docs.get(id).map(|(_, m)| RawHit { chunk_id: id.clone(), score: *score, metadata: m.clone() }))
                .take(k)
                .collect());
        }
        let terms = tokens(query);
        let mut hits: Vec<RawHit> = docs
            .iter()
            .filter(|(_, (_, m))| filters.matches(m))
            .filter_map(|(id, (toks, m))| {
                let score = terms.iter().map(|t| toks.iter().filter(|x| *x == t).count()).sum::<usize>() as f32;
                (score > 0.0 && score >= min_score).then(|| RawHit { chunk_id: id.clone(), score, metadata: m.clone() })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut docs = self.docs.write().unwrap();
        Ok(ids.iter().filter(|id| docs.remove(*id).is_some()).count())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.docs.read().unwrap().len())
    }

    fn chunk_ids(&self) -> Result<Vec<ChunkId>> {
        Ok(self.docs.read().unwrap().keys().cloned().collect())
    }

    fn chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<ChunkId>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.iter().filter(|(_, (_, m))| m.file_path == file_path).map(|(id, _)| id.clone()).collect())
    }

    fn clear(&self) -> Result<()> {
        self.docs.write().unwrap().clear();
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }

    fn load(&self) -> Result<()> {
        Ok(())
    }
}

/// Scores a passage by how many query terms it contains.
#[derive(Default)]
pub struct OverlapModel {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl RelevanceModel for OverlapModel {
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("CUDA out of memory"));
        }
        let terms = tokens(query);
        Ok(passages
            .iter()
            .map(|p| {
                let toks = tokens(p);
                terms.iter().filter(|t| toks.contains(t)).count() as f32
            })
            .collect())
    }
}

pub struct CountingLoader {
    pub model: Arc<OverlapModel>,
    pub loads: AtomicUsize,
    pub delay: Duration,
}

impl CountingLoader {
    pub fn new(model: Arc<OverlapModel>) -> Self {
        Self { model, loads: AtomicUsize::new(0), delay: Duration::ZERO }
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self) -> Result<Arc<dyn RelevanceModel>> {
        std::thread::sleep(self.delay);
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.model.clone() as Arc<dyn RelevanceModel>)
    }
}

/// Settable free-memory reading; `u64::MAX` reports unknown.
pub struct Memory(AtomicU64);

impl Memory {
    pub fn mib(n: u64) -> Self {
        Self(AtomicU64::new(n * 1024 * 1024))
    }

    pub fn set_mib(&self, n: u64) {
        self.0.store(n * 1024 * 1024, Ordering::SeqCst);
    }
}

impl MemoryGauge for Memory {
    fn free_memory_bytes(&self) -> Option<u64> {
        match self.0.load(Ordering::SeqCst) {
            u64::MAX => None,
            n => Some(n),
        }
    }
}

pub fn chunk(path: &str, line: u32, name: &str, content: &str) -> CodeChunk {
    CodeChunk::from_metadata(ChunkMetadata {
        file_path: path.to_string(),
        start_line: line,
        end_line: line + 9,
        kind: ChunkKind::Function,
        name: Some(name.to_string()),
        content: content.to_string(),
        ..Default::default()
    })
}

/// A small code base: a merkle tree, an http server and a config loader.
pub fn corpus() -> Vec<CodeChunk> {
    let tree = CodeChunk::from_metadata(ChunkMetadata {
        file_path: "src/merkle.rs".to_string(),
        start_line: 1,
        end_line: 80,
        kind: ChunkKind::Struct,
        name: Some("MerkleTree".to_string()),
        content: "struct MerkleTree { root: Node, leaves: Vec<Hash> }".to_string(),
        ..Default::default()
    });
    let mut build = chunk("src/merkle.rs", 10, "build", "fn build(leaves) -> MerkleTree { hash pairs of leaves into parent nodes }");
    build.metadata.parent_name = Some("MerkleTree".to_string());
    build.metadata.parent_chunk_id = Some(tree.chunk_id.clone());
    build.metadata.calls = vec!["hash_pair".to_string()];
    build = CodeChunk::from_metadata(build.metadata);
    let mut diff = chunk("src/merkle.rs", 30, "diff", "fn diff(a, b) detect changed leaves by comparing merkle tree hashes");
    diff.metadata.parent_name = Some("MerkleTree".to_string());
    diff.metadata.parent_chunk_id = Some(tree.chunk_id.clone());
    diff.metadata.calls = vec!["build".to_string()];
    diff = CodeChunk::from_metadata(diff.metadata);
    let hash_pair = chunk("src/hash.rs", 1, "hash_pair", "fn hash_pair(left, right) -> Hash { sha256 of left and right }");
    let serve = chunk("src/http/server.rs", 1, "serve", "async fn serve(addr) accept http request and dispatch handler");
    let route = chunk("src/http/router.rs", 1, "route", "fn route(request) match path to handler and return response");
    let load = chunk("src/config.rs", 1, "load_config", "fn load_config(path) read toml config file and merge env overrides");
    let validate = chunk("src/config.rs", 20, "validate", "fn validate(config) reject invalid config values with error");
    vec![tree, build, diff, hash_pair, serve, route, load, validate]
}

pub struct Fixture {
    pub dense: Arc<MemDense>,
    pub lexical: Arc<MemLexical>,
    pub embedder: Arc<BagEmbedder>,
}

impl Fixture {
    pub fn new() -> Self {
        Self { dense: Arc::default(), lexical: Arc::default(), embedder: Arc::default() }
    }

    pub fn handles(&self) -> IndexHandles {
        IndexHandles::new(self.dense.clone(), self.lexical.clone())
    }

    pub fn graph_handles(&self, chunks: &[CodeChunk]) -> IndexHandles {
        self.handles().with_graph(Arc::new(CodeGraph::from_chunks(chunks)))
    }

    pub fn searcher(&self, settings: Settings) -> HybridSearcher {
        HybridSearcher::new(self.handles(), self.embedder.clone(), settings, None).unwrap()
    }

    pub fn searcher_with(&self, handles: IndexHandles, settings: Settings, parts: Option<RerankerParts>) -> HybridSearcher {
        HybridSearcher::new(handles, self.embedder.clone(), settings, parts).unwrap()
    }

    /// Searcher over the indexed sample corpus.
    pub fn indexed(&self, settings: Settings) -> HybridSearcher {
        let searcher = self.searcher(settings);
        searcher.index_documents(&corpus()).unwrap();
        searcher
    }
}

pub fn ids(results: &[codelens_core::types::SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.chunk_id.as_str()).collect()
}
