//! Domain types shared by the indices, the embedder and the retrieval core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;

/// Structural kind of an indexed chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Trait,
    Interface,
    Module,
    Impl,
    #[default]
    Other,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Struct => "struct",
            ChunkKind::Enum => "enum",
            ChunkKind::Trait => "trait",
            ChunkKind::Interface => "interface",
            ChunkKind::Module => "module",
            ChunkKind::Impl => "impl",
            ChunkKind::Other => "other",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "function" => ChunkKind::Function,
            "method" => ChunkKind::Method,
            "class" => ChunkKind::Class,
            "struct" => ChunkKind::Struct,
            "enum" => ChunkKind::Enum,
            "trait" => ChunkKind::Trait,
            "interface" => ChunkKind::Interface,
            "module" => ChunkKind::Module,
            "impl" => ChunkKind::Impl,
            "other" => ChunkKind::Other,
            other => return Err(Error::InvalidConfig(format!("unknown chunk kind '{other}'"))),
        })
    }
}

/// Edge label in the code relationship graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    Inherits,
    Implements,
    Imports,
    References,
    Contains,
}

/// Coarse grouping of relation kinds, used for exclusion filters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelationCategory {
    Invocation,
    TypeHierarchy,
    Dependency,
    Structural,
}

impl RelationKind {
    pub fn category(&self) -> RelationCategory {
        match self {
            RelationKind::Calls => RelationCategory::Invocation,
            RelationKind::Inherits | RelationKind::Implements => RelationCategory::TypeHierarchy,
            RelationKind::Imports | RelationKind::References => RelationCategory::Dependency,
            RelationKind::Contains => RelationCategory::Structural,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub target: ChunkId,
    pub kind: RelationKind,
}

/// Text and structure of a chunk as held by the dense index's metadata store.
///
/// `calls` holds bare callee names as extracted by the chunker; `relations`
/// holds already-resolved edges to other chunk ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub kind: ChunkKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub parent_chunk_id: Option<ChunkId>,
    #[serde(default)]
    pub docstring: Option<String>,
    pub content: String,
    #[serde(default)]
    pub calls: Vec<String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl ChunkMetadata {
    /// Name qualified by the parent, e.g. `Parser.parse`.
    pub fn qualified_name(&self) -> String {
        match (&self.parent_name, &self.name) {
            (Some(p), Some(n)) => format!("{p}.{n}"),
            (None, Some(n)) => n.clone(),
            (Some(p), None) => p.clone(),
            (None, None) => String::new(),
        }
    }
}

/// An independently indexed unit of code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChunk {
    pub chunk_id: ChunkId,
    pub metadata: ChunkMetadata,
}

impl CodeChunk {
    /// Build a chunk whose id is derived from its metadata.
    pub fn from_metadata(metadata: ChunkMetadata) -> Self {
        let chunk_id = format_chunk_id(
            &metadata.file_path,
            metadata.start_line,
            metadata.end_line,
            metadata.kind,
            &metadata.qualified_name(),
        );
        Self { chunk_id, metadata }
    }
}

/// Components encoded in a chunk id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIdParts {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: String,
    pub qualified_name: String,
}

/// `{file_path}:{start}-{end}:{kind}:{qualified_name}`
pub fn format_chunk_id(file_path: &str, start_line: u32, end_line: u32, kind: ChunkKind, qualified_name: &str) -> ChunkId {
    format!("{file_path}:{start_line}-{end_line}:{kind}:{qualified_name}")
}

/// Parse an id produced by [`format_chunk_id`]. Both the path and the
/// qualified name may contain `:` (`C:/x.rs`, `Parser::parse`), so the id is
/// split at the first `:<start>-<end>:<kind>:` segment.
pub fn parse_chunk_id(id: &str) -> Option<ChunkIdParts> {
    id.match_indices(':').find_map(|(at, _)| {
        let (range, rest) = id[at + 1..].split_once(':')?;
        let (kind, qualified_name) = rest.split_once(':')?;
        let (start, end) = range.split_once('-')?;
        let parsed: ChunkKind = kind.parse().ok()?;
        if parsed.as_str() != kind {
            return None;
        }
        Some(ChunkIdParts {
            file_path: id[..at].to_string(),
            start_line: start.parse().ok()?,
            end_line: end.parse().ok()?,
            kind: kind.to_string(),
            qualified_name: qualified_name.to_string(),
        })
    })
}

/// Row returned by an index collaborator before the core assigns ranks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Which stage produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Bm25,
    Dense,
    MultiHop,
    EgoGraph,
    ParentExpansion,
    Reranked,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Bm25 => "bm25",
            SourceTag::Dense => "dense",
            SourceTag::MultiHop => "multi_hop",
            SourceTag::EgoGraph => "ego_graph",
            SourceTag::ParentExpansion => "parent_expansion",
            SourceTag::Reranked => "reranked",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single result schema produced at every stage.
///
/// `score` is stage-dependent (raw, fused, or reranked); all scores inside one
/// returned list share a scale. `rank` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub source: SourceTag,
    pub rank: usize,
    pub metadata: ChunkMetadata,
}

impl SearchResult {
    pub fn from_hit(hit: RawHit, source: SourceTag) -> Self {
        Self { chunk_id: hit.chunk_id, score: hit.score, source, rank: 0, metadata: hit.metadata }
    }
}

/// Rewrite `rank` to the 1-based list position.
pub fn assign_ranks(results: &mut [SearchResult]) {
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Semantic,
    Lexical,
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" | "dense" => Ok(SearchMode::Semantic),
            "lexical" | "bm25" | "keyword" => Ok(SearchMode::Lexical),
            other => Err(Error::InvalidConfig(format!("unknown search mode '{other}'"))),
        }
    }
}

/// Result filters pushed down to both index collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SearchFilters {
    /// Substring the chunk's file path must contain.
    #[serde(default)]
    pub file_pattern: Option<String>,
    /// Allowed chunk kinds; empty allows all.
    #[serde(default)]
    pub kinds: Vec<ChunkKind>,
    /// Path substrings to reject.
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.file_pattern.is_none() && self.kinds.is_empty() && self.exclude_paths.is_empty()
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(p) = &self.file_pattern {
            if !meta.file_path.contains(p.as_str()) {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&meta.kind) {
            return false;
        }
        !self.exclude_paths.iter().any(|x| meta.file_path.contains(x.as_str()))
    }
}

/// Split an identifier into lowercase words: `parseHttpRequest` and
/// `parse_http_request` both give `parse http request`.
pub fn split_identifier(ident: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in ident.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Text fed to the lexical index for a chunk. Used on both the write path and
/// during resync so a rebuilt lexical index matches an incrementally built one.
pub fn lexical_text(meta: &ChunkMetadata) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = &meta.name {
        parts.push(name.clone());
        parts.push(split_identifier(name).join(" "));
    }
    if let Some(parent) = &meta.parent_name {
        parts.push(parent.clone());
        parts.push(split_identifier(parent).join(" "));
    }
    if let Some(doc) = &meta.docstring {
        parts.push(doc.clone());
    }
    parts.push(split_identifier(&meta.file_path).join(" "));
    parts.push(meta.content.clone());
    parts.retain(|p| !p.trim().is_empty());
    parts.join("\n")
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom <= f32::EPSILON { 0.0 } else { dot / denom }
}
