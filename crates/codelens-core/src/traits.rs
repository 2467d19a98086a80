//! Collaborator seams. The retrieval core only talks to indices, embedders,
//! graphs and relevance models through these traits.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ChunkId, ChunkMetadata, CodeChunk, RawHit, RelationCategory, RelationKind, SearchFilters};

pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the model (e.g. `candle:bge-m3:d1024`).
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    /// Embed a query. Implementations are expected to cache.
    fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Vector store. Its metadata column is the source of truth for chunk text.
pub trait DenseIndex: Send + Sync {
    fn add(&self, chunks: &[CodeChunk], vectors: &[Vec<f32>]) -> anyhow::Result<()>;
    fn search(&self, query: &[f32], k: usize, filters: &SearchFilters) -> anyhow::Result<Vec<RawHit>>;
    /// Returns the number of rows removed.
    fn remove(&self, ids: &[ChunkId]) -> anyhow::Result<usize>;
    fn reconstruct(&self, id: &str) -> anyhow::Result<Option<Vec<f32>>>;
    fn count(&self) -> anyhow::Result<usize>;
    fn get_metadata(&self, id: &str) -> anyhow::Result<Option<ChunkMetadata>>;
    fn scan_metadata(&self) -> anyhow::Result<Vec<CodeChunk>>;
    fn chunk_ids(&self) -> anyhow::Result<Vec<ChunkId>>;
    /// Ids of rows whose stored `file_path` equals `file_path`.
    fn chunk_ids_for_file(&self, file_path: &str) -> anyhow::Result<Vec<ChunkId>>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Keyword (BM25) index.
pub trait LexicalIndex: Send + Sync {
    fn index(&self, texts: &[String], ids: &[ChunkId], metadata: &[ChunkMetadata]) -> anyhow::Result<()>;
    fn search(&self, query: &str, k: usize, min_score: f32, filters: &SearchFilters) -> anyhow::Result<Vec<RawHit>>;
    fn remove(&self, ids: &[ChunkId]) -> anyhow::Result<usize>;
    fn count(&self) -> anyhow::Result<usize>;
    fn chunk_ids(&self) -> anyhow::Result<Vec<ChunkId>>;
    fn chunk_ids_for_file(&self, file_path: &str) -> anyhow::Result<Vec<ChunkId>>;
    fn clear(&self) -> anyhow::Result<()>;
    fn persist(&self) -> anyhow::Result<()>;
    fn load(&self) -> anyhow::Result<()>;
}

/// Neighborhood query against a relationship graph.
#[derive(Debug, Clone, Default)]
pub struct NeighborQuery {
    /// Relation kinds to follow; empty follows all.
    pub relation_types: Vec<RelationKind>,
    pub max_depth: usize,
    pub exclude_categories: Vec<RelationCategory>,
    /// Preference for ordering neighbors; unlisted kinds weigh 1.0.
    pub edge_weights: HashMap<RelationKind, f32>,
    /// Upper bound on returned neighbors.
    pub limit: usize,
}

pub trait RelationshipGraph: Send + Sync {
    fn get_neighbors(&self, node: &str, query: &NeighborQuery) -> anyhow::Result<Vec<ChunkId>>;
    fn get_callers(&self, node: &str) -> anyhow::Result<Vec<ChunkId>>;
    fn get_callees(&self, node: &str) -> anyhow::Result<Vec<ChunkId>>;
}

/// Cross-encoder scoring a query against candidate passages.
pub trait RelevanceModel: Send + Sync {
    fn score(&self, query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>>;
}

pub trait ModelLoader: Send + Sync {
    fn load(&self) -> anyhow::Result<Arc<dyn RelevanceModel>>;
}

/// Reports free memory on the device the reranker would run on.
pub trait MemoryGauge: Send + Sync {
    /// `None` when the amount cannot be determined.
    fn free_memory_bytes(&self) -> Option<u64>;
}

