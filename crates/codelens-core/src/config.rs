//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`, e.g. `APP_FUSION__BM25_WEIGHT=0.3`).
//! [`Settings`] is the typed view the engine consumes; every section has
//! defaults so an empty figment yields a working configuration.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::SearchMode;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// Extract and validate the full settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub search: SearchSettings,
    pub fusion: FusionSettings,
    pub executor: ExecutorSettings,
    pub multi_hop: MultiHopSettings,
    pub ego_graph: EgoGraphSettings,
    pub parent_expansion: ParentExpansionSettings,
    pub reranker: RerankerSettings,
    pub routing: RoutingSettings,
    pub cache: CacheSettings,
    pub sync: SyncSettings,
    pub optimizer: OptimizerSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        let (b, d) = (self.fusion.bm25_weight, self.fusion.dense_weight);
        if !b.is_finite() || !d.is_finite() || b < 0.0 || d < 0.0 || b + d <= 0.0 {
            return bad("fusion weights must be finite, non-negative and not both zero");
        }
        if self.fusion.k_rrf <= 0.0 || !self.fusion.k_rrf.is_finite() {
            return bad("fusion.k_rrf must be positive");
        }
        if self.fusion.oversample == 0 {
            return bad("fusion.oversample must be at least 1");
        }
        if self.executor.worker_threads == 0 {
            return bad("executor.worker_threads must be at least 1");
        }
        if self.search.default_k == 0 || self.search.default_k > self.search.max_k {
            return bad("search.default_k must be in 1..=search.max_k");
        }
        if self.multi_hop.expansion_factor < 0.0 {
            return bad("multi_hop.expansion_factor must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.ego_graph.fallback_decay) {
            return bad("ego_graph.fallback_decay must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.parent_expansion.decay) {
            return bad("parent_expansion.decay must be within [0, 1]");
        }
        if self.reranker.top_k_candidates == 0 {
            return bad("reranker.top_k_candidates must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.routing.confidence_threshold) {
            return bad("routing.confidence_threshold must be within [0, 1]");
        }
        if self.cache.metadata_capacity == 0 {
            return bad("cache.metadata_capacity must be at least 1");
        }
        if self.sync.batch_size == 0 {
            return bad("sync.batch_size must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub tantivy_index_dir: String,
    pub lancedb_dir: String,
    pub table_name: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            tantivy_index_dir: "./.codelens/tantivy".to_string(),
            lancedb_dir: "./.codelens/lancedb".to_string(),
            table_name: "chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_k: usize,
    pub max_k: usize,
    pub mode: SearchMode,
    pub parallel: bool,
    pub min_lexical_score: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_k: 10, max_k: 100, mode: SearchMode::Hybrid, parallel: true, min_lexical_score: 0.1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub bm25_weight: f32,
    pub dense_weight: f32,
    pub k_rrf: f32,
    /// Candidate multiplier for each sub-search.
    pub oversample: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self { bm25_weight: 0.4, dense_weight: 0.6, k_rrf: 60.0, oversample: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub worker_threads: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self { worker_threads: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiHopSettings {
    pub enabled: bool,
    /// Total hop count including the initial search; 0 or 1 disables expansion.
    pub hops: usize,
    pub expansion_factor: f32,
    pub seeds_per_hop: usize,
}

impl Default for MultiHopSettings {
    fn default() -> Self {
        Self { enabled: false, hops: 2, expansion_factor: 0.3, seeds_per_hop: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgoGraphSettings {
    pub enabled: bool,
    pub k_hops: usize,
    pub max_neighbors_per_hop: usize,
    pub relation_types: Vec<crate::types::RelationKind>,
    pub exclude_categories: Vec<crate::types::RelationCategory>,
    pub edge_weights: std::collections::HashMap<crate::types::RelationKind, f32>,
    pub include_anchors: bool,
    pub min_similarity: f32,
    pub fallback_decay: f32,
}

impl Default for EgoGraphSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            k_hops: 2,
            max_neighbors_per_hop: 5,
            relation_types: Vec::new(),
            exclude_categories: Vec::new(),
            edge_weights: Default::default(),
            include_anchors: true,
            min_similarity: 0.3,
            fallback_decay: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentExpansionSettings {
    pub enabled: bool,
    pub decay: f32,
    pub max_parents: usize,
}

impl Default for ParentExpansionSettings {
    fn default() -> Self {
        Self { enabled: false, decay: 0.8, max_parents: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub enabled: bool,
    pub top_k_candidates: usize,
    pub min_free_memory_mb: u64,
    pub allow_host_fallback: bool,
    pub model_dir: Option<String>,
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self { enabled: false, top_k_candidates: 50, min_free_memory_mb: 2048, allow_host_fallback: true, model_dir: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub enabled: bool,
    pub default_model: String,
    pub confidence_threshold: f32,
    pub tie_epsilon: f32,
    /// Near-tie resolution order, most specialised model first.
    pub precedence: Vec<String>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            default_model: "bge_m3".to_string(),
            confidence_threshold: 0.10,
            tie_epsilon: 0.01,
            precedence: vec!["coderankembed".to_string(), "qwen3".to_string(), "bge_m3".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub metadata_capacity: u64,
    pub query_embedding_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { metadata_capacity: 4096, query_embedding_capacity: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { batch_size: 512 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub k: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self { k: 10 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

