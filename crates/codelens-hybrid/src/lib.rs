//! codelens-hybrid
//!
//! Retrieval orchestration over a lexical and a dense index: RRF fusion,
//! multi-hop and relationship-graph expansion, resource-gated reranking,
//! index consistency, query routing and offline weight tuning. Concrete
//! indices, embedders and models are injected through the traits in
//! [`codelens_core::traits`].

pub mod cache;
pub mod context;
pub mod ego_graph;
pub mod engine;
pub mod executor;
pub mod fusion;
pub mod handles;
pub mod multi_hop;
pub mod optimizer;
pub mod parent;
pub mod rerank;
pub mod router;
pub mod sync;

pub use context::{SearchContext, SearchSession};
pub use engine::{HybridSearcher, IndexStats, SearchOutcome, SearchRequest};
pub use fusion::{FusionWeights, RrfFusion};
pub use optimizer::{OptimizationReport, WeightOptimizer};
pub use handles::IndexHandles;
pub use rerank::{RerankerParts, RerankerState, RerankingEngine};
pub use router::{ModelProfile, QueryRouter, RoutedSearcher, RoutingDecision};
pub use sync::{IndexSyncState, IndexSynchronizer, SyncReport};
