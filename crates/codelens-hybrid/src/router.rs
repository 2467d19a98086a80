//! Keyword-profile routing of queries to embedding models.
//!
//! A model scores `matched_keywords / profile_keywords × weight`; scores are
//! scaled down when the best exceeds 1. The best model wins unless it falls
//! below the confidence threshold, in which case the default model is used.
//! Scores within `tie_epsilon` of the best are resolved by precedence.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

use codelens_core::config::RoutingSettings;
use codelens_core::{Error, Result};

use crate::engine::{HybridSearcher, SearchOutcome, SearchRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub key: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub weight: f32,
}

impl ModelProfile {
    pub fn new(key: &str, description: &str, keywords: &[&str], weight: f32) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            weight,
        }
    }

    /// The three models codelens ships profiles for.
    pub fn builtin() -> Vec<ModelProfile> {
        vec![
            ModelProfile::new(
                "coderankembed",
                "code structure and algorithms",
                &[
                    "algorithm", "tree", "graph", "hash", "merkle", "structure", "recursive", "recursion",
                    "sort", "traversal", "node", "ast", "parse", "parser", "change", "detection", "diff",
                    "index", "class", "function", "method", "trait", "struct", "call",
                ],
                1.2,
            ),
            ModelProfile::new(
                "qwen3",
                "implementation workflows",
                &[
                    "implement", "implementation", "workflow", "pipeline", "build", "deploy", "config",
                    "setup", "test", "error", "handling", "async", "api", "request", "handler", "service",
                    "integration", "migration", "refactor", "debug",
                ],
                1.0,
            ),
            ModelProfile::new(
                "bge_m3",
                "general purpose",
                &[
                    "what", "how", "why", "where", "find", "explain", "overview", "documentation", "docs",
                    "usage", "example", "general",
                ],
                0.9,
            ),
        ]
    }

    fn score(&self, tokens: &HashSet<String>) -> f32 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let matched = self.keywords.iter().filter(|k| tokens.contains(k.as_str())).count();
        matched as f32 / self.keywords.len() as f32 * self.weight
    }
}

/// Outcome of routing one query. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    model_key: String,
    confidence: f32,
    reason: String,
    per_model_scores: BTreeMap<String, f32>,
}

impl RoutingDecision {
    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn per_model_scores(&self) -> &BTreeMap<String, f32> {
        &self.per_model_scores
    }
}

pub struct QueryRouter {
    profiles: Vec<ModelProfile>,
    default_model: String,
    confidence_threshold: f32,
    tie_epsilon: f32,
    precedence: Vec<String>,
}

impl QueryRouter {
    pub fn new(profiles: Vec<ModelProfile>, settings: &RoutingSettings) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::InvalidConfig("router needs at least one model profile".to_string()));
        }
        let keys: BTreeSet<&str> = profiles.iter().map(|p| p.key.as_str()).collect();
        if keys.len() != profiles.len() {
            return Err(Error::InvalidConfig("duplicate model profile key".to_string()));
        }
        if !keys.contains(settings.default_model.as_str()) {
            return Err(Error::InvalidConfig(format!("unknown default model '{}'", settings.default_model)));
        }
        if let Some(unknown) = settings.precedence.iter().find(|m| !keys.contains(m.as_str())) {
            return Err(Error::InvalidConfig(format!("unknown model '{unknown}' in routing precedence")));
        }
        if !settings.tie_epsilon.is_finite() || settings.tie_epsilon < 0.0 {
            return Err(Error::InvalidConfig("routing.tie_epsilon must be non-negative".to_string()));
        }
        // Models missing from the precedence list rank after it, by key.
        let mut precedence = settings.precedence.clone();
        precedence.extend(keys.iter().filter(|k| !settings.precedence.iter().any(|p| p == *k)).map(|k| k.to_string()));
        Ok(Self {
            profiles,
            default_model: settings.default_model.clone(),
            confidence_threshold: settings.confidence_threshold,
            tie_epsilon: settings.tie_epsilon,
            precedence,
        })
    }

    pub fn from_settings(settings: &RoutingSettings) -> Result<Self> {
        Self::new(ModelProfile::builtin(), settings)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.key.as_str())
    }

    pub fn route(&self, query: &str) -> RoutingDecision {
        let tokens = tokenize(query);
        let mut scores: BTreeMap<String, f32> = self.profiles.iter().map(|p| (p.key.clone(), p.score(&tokens))).collect();
        let max = scores.values().copied().fold(0.0f32, f32::max);
        if max > 1.0 {
            for s in scores.values_mut() { *s /= max; }
        }
        let top = scores.values().copied().fold(0.0f32, f32::max);
        let best = self
            .precedence
            .iter()
            .find(|k| scores.get(k.as_str()).is_some_and(|s| *s >= top - self.tie_epsilon))
            .cloned()
            .unwrap_or_else(|| self.default_model.clone());
        let best_score = scores.get(&best).copied().unwrap_or(0.0);

        let decision = if best_score < self.confidence_threshold {
            let confidence = scores.get(&self.default_model).copied().unwrap_or(0.0);
            RoutingDecision {
                model_key: self.default_model.clone(),
                confidence,
                reason: format!(
                    "best match '{best}' scored {best_score:.3}, below threshold {:.2}; using default model",
                    self.confidence_threshold
                ),
                per_model_scores: scores,
            }
        } else {
            let tied = scores.iter().filter(|(k, s)| **s >= top - self.tie_epsilon && **k != best).count();
            let reason = if tied > 0 {
                format!("'{best}' scored {best_score:.3}; near-tie resolved by precedence")
            } else {
                format!("'{best}' scored {best_score:.3}, highest keyword match")
            };
            RoutingDecision { model_key: best, confidence: best_score, reason, per_model_scores: scores }
        };
        debug!(query, model = %decision.model_key, confidence = decision.confidence, "routed query");
        decision
    }
}

fn tokenize(query: &str) -> HashSet<String> {
    query
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Searchers keyed by model, chosen per query by a [`QueryRouter`].
pub struct RoutedSearcher {
    router: QueryRouter,
    searchers: BTreeMap<String, Arc<HybridSearcher>>,
}

impl RoutedSearcher {
    pub fn new(router: QueryRouter, searchers: BTreeMap<String, Arc<HybridSearcher>>) -> Result<Self> {
        if !searchers.contains_key(router.default_model()) {
            return Err(Error::InvalidConfig(format!("no searcher registered for default model '{}'", router.default_model())));
        }
        if let Some(unknown) = searchers.keys().find(|k| !router.models().any(|m| m == k.as_str())) {
            return Err(Error::InvalidConfig(format!("searcher registered for unknown model '{unknown}'")));
        }
        Ok(Self { router, searchers })
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    pub fn searcher(&self, model_key: &str) -> Result<&Arc<HybridSearcher>> {
        self.searchers.get(model_key).ok_or_else(|| Error::NotFound(format!("searcher for model '{model_key}'")))
    }

    pub fn search(&self, request: &SearchRequest) -> SearchOutcome {
        let decision = self.router.route(&request.query);
        let key = if self.searchers.contains_key(decision.model_key()) {
            decision.model_key()
        } else {
            debug!(model = decision.model_key(), "routed model has no searcher, using default");
            self.router.default_model()
        };
        let mut outcome = match self.searchers.get(key) {
            Some(searcher) => searcher.search(request),
            None => SearchOutcome::not_ready(),
        };
        outcome.routing = Some(decision);
        outcome
    }
}
