//! Wiring for the `codelens` binary: concrete collaborators built from
//! [`Settings`], plus the pre-chunked JSONL reader used by `ingest`.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use codelens_core::config::{expand_path, Settings};
use codelens_core::types::{ChunkMetadata, CodeChunk};
use codelens_embed::{default_embedder, resolve_model_dir, CrossEncoderLoader, HostMemory};
use codelens_graph::CodeGraph;
use codelens_hybrid::{HybridSearcher, IndexHandles, QueryRouter, RerankerParts, RoutedSearcher, SearchRequest};
use codelens_text::TantivyLexicalIndex;
use codelens_vector::LanceDenseIndex;

pub const RERANKER_MODEL: &str = "bge-reranker-v2-m3";

/// Open both indices and assemble a searcher. The relationship graph is
/// built from dense metadata only when ego-graph expansion is on.
pub fn open_searcher(settings: &Settings) -> Result<HybridSearcher> {
    let embedder = default_embedder(None, settings.cache.query_embedding_capacity)?;
    let lexical = TantivyLexicalIndex::open_or_create(&expand_path(&settings.data.tantivy_index_dir))?;
    let lance_dir = expand_path(&settings.data.lancedb_dir);
    std::fs::create_dir_all(&lance_dir)?;
    let dense = LanceDenseIndex::open(&lance_dir, &settings.data.table_name, embedder.dim())?;

    let mut handles = IndexHandles::new(Arc::new(dense), Arc::new(lexical));
    if settings.ego_graph.enabled {
        let chunks = handles.dense.scan_metadata()?;
        let graph = CodeGraph::from_chunks(&chunks);
        info!(nodes = graph.stats().nodes, edges = graph.stats().edges, "relationship graph built");
        handles = handles.with_graph(Arc::new(graph));
    }
    Ok(HybridSearcher::new(handles, embedder, settings.clone(), reranker_parts(settings))?)
}

/// Settings with the optional collaborators a request asks for switched on
/// (or off), so `open_searcher` builds the graph and reranker it needs.
pub fn settings_for_request(settings: &Settings, request: &SearchRequest) -> Settings {
    let mut effective = settings.clone();
    if let Some(on) = request.ego_graph {
        effective.ego_graph.enabled = on;
    }
    if let Some(on) = request.rerank {
        effective.reranker.enabled = on;
    }
    if let Some(on) = request.multi_hop {
        effective.multi_hop.enabled = on;
    }
    effective
}

fn reranker_parts(settings: &Settings) -> Option<RerankerParts> {
    if !settings.reranker.enabled {
        return None;
    }
    let explicit = settings.reranker.model_dir.as_deref().map(expand_path);
    match resolve_model_dir(explicit.as_deref(), RERANKER_MODEL) {
        Ok(dir) => Some(RerankerParts { loader: Arc::new(CrossEncoderLoader::new(dir)), memory: Arc::new(HostMemory) }),
        Err(e) => {
            warn!(error = %e, "reranker model not found, reranking stays disabled");
            None
        }
    }
}

/// Routes every query and serves it from the one local index; the decision
/// is reported alongside the results.
pub fn routed(settings: &Settings, searcher: HybridSearcher) -> Result<RoutedSearcher> {
    let router = QueryRouter::from_settings(&settings.routing)?;
    let searchers = BTreeMap::from([(router.default_model().to_string(), Arc::new(searcher))]);
    Ok(RoutedSearcher::new(router, searchers)?)
}

/// `.jsonl` files under `path` (or `path` itself), sorted.
pub fn chunk_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(anyhow!("{} is neither a file nor a directory", path.display()));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "jsonl"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// One [`ChunkMetadata`] object per line; blank lines are skipped and the
/// chunk id is derived from the metadata.
pub fn read_chunks(file: &Path) -> Result<Vec<CodeChunk>> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    let mut chunks = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let metadata: ChunkMetadata =
            serde_json::from_str(&line).with_context(|| format!("{}:{}: invalid chunk", file.display(), n + 1))?;
        chunks.push(CodeChunk::from_metadata(metadata));
    }
    Ok(chunks)
}
