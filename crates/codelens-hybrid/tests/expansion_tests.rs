mod common;

use std::collections::HashSet;

use codelens_core::config::{EgoGraphSettings, MultiHopSettings, ParentExpansionSettings, Settings};
use codelens_core::types::{RelationKind, SearchFilters, SearchResult, SourceTag};
use codelens_hybrid::cache::MetadataCache;
use codelens_hybrid::ego_graph::EgoGraphExpander;
use codelens_hybrid::multi_hop::MultiHopExpander;
use codelens_hybrid::parent::ParentExpander;
use codelens_hybrid::SearchRequest;

use common::{corpus, ids, BagEmbedder, Fixture};

fn as_result(id: &str, score: f32) -> SearchResult {
    let chunk = corpus().into_iter().find(|c| c.chunk_id == id).unwrap();
    SearchResult { chunk_id: chunk.chunk_id, score, source: SourceTag::Dense, rank: 1, metadata: chunk.metadata }
}

fn unique(results: &[SearchResult]) -> bool {
    let set: HashSet<&str> = ids(results).into_iter().collect();
    set.len() == results.len()
}

fn by_name(name: &str) -> String {
    corpus().into_iter().find(|c| c.metadata.name.as_deref() == Some(name)).unwrap().chunk_id
}

#[test]
fn multi_hop_pulls_in_neighbours_of_seeds() {
    let fx = Fixture::new();
    let searcher = fx.indexed(Settings::default());
    let handles = fx.handles();
    let cache = MetadataCache::new(64);
    let expander = MultiHopExpander::new(MultiHopSettings { enabled: true, hops: 2, expansion_factor: 1.0, seeds_per_hop: 1 });
    assert_eq!(expander.additions_per_hop(3), 3);

    let query = BagEmbedder::vector("merkle tree diff");
    let initial = vec![as_result(&by_name("diff"), 1.0)];
    let out = expander.expand(&handles, &cache, &query, initial, 3, &SearchFilters::default());

    assert_eq!(out.len(), 3);
    assert!(unique(&out));
    assert!(out.iter().any(|r| r.source == SourceTag::MultiHop));
    for pair in out.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(searcher.validate_index_sync());
}

#[test]
fn single_hop_configuration_is_a_passthrough() {
    let fx = Fixture::new();
    fx.indexed(Settings::default());
    let expander = MultiHopExpander::new(MultiHopSettings { enabled: true, hops: 1, ..Default::default() });
    let initial = vec![as_result(&by_name("diff"), 1.0), as_result(&by_name("build"), 0.5)];
    let out = expander.expand(&fx.handles(), &MetadataCache::new(8), &[0.0; common::DIM], initial, 1, &SearchFilters::default());
    assert_eq!(ids(&out), vec![by_name("diff").as_str()]);
}

#[test]
fn multi_hop_through_the_engine_respects_k() {
    let fx = Fixture::new();
    let mut settings = Settings::default();
    settings.multi_hop = MultiHopSettings { enabled: true, hops: 3, expansion_factor: 0.5, seeds_per_hop: 2 };
    let searcher = fx.indexed(settings);
    let outcome = searcher.search(&SearchRequest::new("merkle tree hashes").with_k(4));
    assert_eq!(outcome.results.len(), 4);
    assert!(unique(&outcome.results));
}

fn ego_settings(k_hops: usize, per_hop: usize) -> EgoGraphSettings {
    EgoGraphSettings { enabled: true, k_hops, max_neighbors_per_hop: per_hop, min_similarity: 0.0, ..Default::default() }
}

#[test]
fn ego_graph_adds_call_and_containment_neighbours() {
    let fx = Fixture::new();
    fx.indexed(Settings::default());
    let handles = fx.graph_handles(&corpus());
    let expander = EgoGraphExpander::new(ego_settings(1, 5));
    let anchor = by_name("diff");
    let expansion = expander.expand(&handles, &MetadataCache::new(64), None, vec![as_result(&anchor, 1.0)], 5);

    let neighbours: HashSet<&str> = expansion.graph[&anchor].iter().map(String::as_str).collect();
    let build = by_name("build");
    let tree = by_name("MerkleTree");
    assert_eq!(neighbours, HashSet::from([build.as_str(), tree.as_str()]));

    assert_eq!(expansion.results[0].chunk_id, anchor);
    assert_eq!(expansion.results.len(), 3);
    assert!(expansion.results[1..].iter().all(|r| r.source == SourceTag::EgoGraph && (r.score - 0.5).abs() < 1e-6));
    assert!(unique(&expansion.results));
}

#[test]
fn ego_graph_without_anchors_keeps_only_additions() {
    let fx = Fixture::new();
    fx.indexed(Settings::default());
    let handles = fx.graph_handles(&corpus());
    let settings = EgoGraphSettings { include_anchors: false, ..ego_settings(2, 1) };
    let expander = EgoGraphExpander::new(settings);
    let anchor = by_name("diff");
    let expansion = expander.expand(&handles, &MetadataCache::new(64), None, vec![as_result(&anchor, 1.0)], 5);
    assert_eq!(expander.addition_cap(5), 2);
    assert!(expansion.results.len() <= 2);
    assert!(expansion.results.iter().all(|r| r.chunk_id != anchor));
}

#[test]
fn ego_graph_similarity_prunes_unrelated_neighbours() {
    let fx = Fixture::new();
    fx.indexed(Settings::default());
    let handles = fx.graph_handles(&corpus());
    let settings = EgoGraphSettings { min_similarity: 0.999, ..ego_settings(1, 5) };
    let query = BagEmbedder::vector("completely unrelated words zebra");
    let anchor = by_name("diff");
    let expansion = EgoGraphExpander::new(settings).expand(&handles, &MetadataCache::new(64), Some(&query), vec![as_result(&anchor, 1.0)], 5);
    assert_eq!(ids(&expansion.results), vec![anchor.as_str()]);
}

#[test]
fn ego_graph_respects_relation_filters() {
    let fx = Fixture::new();
    fx.indexed(Settings::default());
    let handles = fx.graph_handles(&corpus());
    let settings = EgoGraphSettings { relation_types: vec![RelationKind::Calls], ..ego_settings(1, 5) };
    let anchor = by_name("diff");
    let expansion = EgoGraphExpander::new(settings).expand(&handles, &MetadataCache::new(64), None, vec![as_result(&anchor, 1.0)], 5);
    assert_eq!(expansion.graph[&anchor], vec![by_name("build")]);
}

#[test]
fn ego_graph_without_a_graph_returns_anchors() {
    let fx = Fixture::new();
    fx.indexed(Settings::default());
    let anchors = vec![as_result(&by_name("diff"), 1.0), as_result(&by_name("serve"), 0.4)];
    let expansion = EgoGraphExpander::new(ego_settings(2, 5)).expand(&fx.handles(), &MetadataCache::new(8), None, anchors, 5);
    assert_eq!(expansion.results.len(), 2);
    assert!(expansion.graph.is_empty());
}

#[test]
fn parent_expansion_adds_enclosing_chunk_once() {
    let fx = Fixture::new();
    fx.indexed(Settings::default());
    let expander = ParentExpander::new(ParentExpansionSettings { enabled: true, decay: 0.8, max_parents: 3 });
    let results = vec![as_result(&by_name("diff"), 1.0), as_result(&by_name("build"), 0.9)];
    let out = expander.expand(&fx.handles(), &MetadataCache::new(8), results);

    assert_eq!(out.len(), 3);
    let parent = out.iter().find(|r| r.source == SourceTag::ParentExpansion).unwrap();
    assert_eq!(parent.chunk_id, by_name("MerkleTree"));
    assert!((parent.score - 0.8).abs() < 1e-6);
    assert_eq!(out.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);

    let capped = ParentExpander::new(ParentExpansionSettings { enabled: true, decay: 0.8, max_parents: 0 });
    let same = capped.expand(&fx.handles(), &MetadataCache::new(8), vec![as_result(&by_name("diff"), 1.0)]);
    assert_eq!(same.len(), 1);
}

#[test]
fn full_pipeline_with_graph_stays_deduplicated() {
    let fx = Fixture::new();
    let mut settings = Settings::default();
    settings.multi_hop = MultiHopSettings { enabled: true, hops: 2, expansion_factor: 0.5, seeds_per_hop: 2 };
    settings.ego_graph = ego_settings(2, 3);
    settings.parent_expansion.enabled = true;
    let searcher = fx.searcher_with(fx.graph_handles(&corpus()), settings, None);
    searcher.index_documents(&corpus()).unwrap();

    let outcome = searcher.search(&SearchRequest::new("detect changed leaves").with_k(5));
    assert!(outcome.ready);
    assert!(outcome.results.len() <= 5);
    assert!(unique(&outcome.results));
}
