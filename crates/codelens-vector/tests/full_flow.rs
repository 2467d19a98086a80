use codelens_core::traits::{DenseIndex, EmbeddingProvider};
use codelens_core::types::{ChunkKind, ChunkMetadata, CodeChunk, SearchFilters};
use codelens_embed::HashEmbedder;
use codelens_vector::LanceDenseIndex;
use tempfile::TempDir;

const DIM: usize = 32;

fn chunk(path: &str, name: &str, kind: ChunkKind, content: &str) -> CodeChunk {
    CodeChunk::from_metadata(ChunkMetadata {
        file_path: path.to_string(),
        start_line: 1,
        end_line: 9,
        kind,
        name: Some(name.to_string()),
        content: content.to_string(),
        ..Default::default()
    })
}

fn corpus() -> Vec<CodeChunk> {
    vec![
        chunk("src/merkle.rs", "build_tree", ChunkKind::Function, "merkle tree hash leaves"),
        chunk("src/watch/diff.rs", "diff", ChunkKind::Function, "detect file changes"),
        chunk("src/http/client.rs", "Client", ChunkKind::Struct, "http client with retry"),
    ]
}

fn embed_all(embedder: &HashEmbedder, chunks: &[CodeChunk]) -> Vec<Vec<f32>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.metadata.content.clone()).collect();
    embedder.embed_batch(&texts).expect("embed")
}

#[test]
fn lancedb_full_flow() {
    let tmp = TempDir::new().expect("tmp");
    let index = LanceDenseIndex::open(tmp.path(), "chunks_test", DIM).expect("open");
    assert_eq!(index.count().expect("count"), 0);
    assert!(index.search(&vec![0.1; DIM], 5, &SearchFilters::default()).expect("empty search").is_empty());

    let embedder = HashEmbedder::new(DIM);
    let chunks = corpus();
    index.add(&chunks, &embed_all(&embedder, &chunks)).expect("add");
    assert_eq!(index.count().expect("count"), 3);

    // Querying with a stored vector returns that chunk first.
    let query = embedder.embed_query("merkle tree hash leaves").expect("query");
    let hits = index.search(&query, 3, &SearchFilters::default()).expect("search");
    assert_eq!(hits[0].chunk_id, chunks[0].chunk_id);
    assert!((hits[0].score - 1.0).abs() < 1e-3);
    for w in hits.windows(2) { assert!(w[0].score >= w[1].score); }
    assert_eq!(hits[0].metadata, chunks[0].metadata);

    let reopened = LanceDenseIndex::open(tmp.path(), "chunks_test", DIM).expect("reopen");
    assert_eq!(reopened.count().expect("count"), 3);
}

#[test]
fn metadata_and_vectors_round_out_the_row() {
    let tmp = TempDir::new().expect("tmp");
    let index = LanceDenseIndex::open(tmp.path(), "chunks", DIM).expect("open");
    let embedder = HashEmbedder::new(DIM);
    let chunks = corpus();
    let vectors = embed_all(&embedder, &chunks);
    index.add(&chunks, &vectors).expect("add");

    let v = index.reconstruct(&chunks[1].chunk_id).expect("reconstruct").expect("present");
    assert_eq!(v.len(), DIM);
    for (a, b) in v.iter().zip(&vectors[1]) { assert!((a - b).abs() < 1e-6); }
    assert!(index.reconstruct("missing:1-2:function:nope").expect("reconstruct").is_none());

    let meta = index.get_metadata(&chunks[2].chunk_id).expect("meta").expect("present");
    assert_eq!(meta.kind, ChunkKind::Struct);

    let scanned = index.scan_metadata().expect("scan");
    assert_eq!(scanned.len(), 3);
    let mut expected: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    expected.sort();
    assert_eq!(index.chunk_ids().expect("ids"), expected);
}

#[test]
fn re_adding_replaces_and_remove_reports_count() {
    let tmp = TempDir::new().expect("tmp");
    let index = LanceDenseIndex::open(tmp.path(), "chunks", DIM).expect("open");
    let embedder = HashEmbedder::new(DIM);
    let chunks = corpus();
    index.add(&chunks, &embed_all(&embedder, &chunks)).expect("add");
    index.add(&chunks[..1], &embed_all(&embedder, &chunks[..1])).expect("re-add");
    assert_eq!(index.count().expect("count"), 3);

    let removed = index
        .remove(&[chunks[0].chunk_id.clone(), "not:1-1:other:there".to_string()])
        .expect("remove");
    assert_eq!(removed, 1);
    assert_eq!(index.count().expect("count"), 2);

    index.clear().expect("clear");
    assert_eq!(index.count().expect("count"), 0);
}

#[test]
fn filters_restrict_dense_hits() {
    let tmp = TempDir::new().expect("tmp");
    let index = LanceDenseIndex::open(tmp.path(), "chunks", DIM).expect("open");
    let embedder = HashEmbedder::new(DIM);
    let chunks = corpus();
    index.add(&chunks, &embed_all(&embedder, &chunks)).expect("add");
    let query = embedder.embed_query("http client").expect("query");

    let only_http = SearchFilters { file_pattern: Some("http/".into()), ..Default::default() };
    let hits = index.search(&query, 5, &only_http).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, chunks[2].chunk_id);

    let no_structs = SearchFilters { kinds: vec![ChunkKind::Function], ..Default::default() };
    let hits = index.search(&query, 5, &no_structs).expect("search");
    assert!(hits.iter().all(|h| h.metadata.kind == ChunkKind::Function));

    let dims_mismatch = index.search(&[1.0, 2.0], 5, &SearchFilters::default());
    assert!(dims_mismatch.is_err());
}

#[test]
fn file_lookup_uses_the_stored_path() {
    let tmp = TempDir::new().expect("tmp");
    let index = LanceDenseIndex::open(tmp.path(), "chunks", DIM).expect("open");
    let embedder = HashEmbedder::new(DIM);
    let mut chunks = corpus();
    chunks.push(chunk("src/merkle.rs", "MerkleTree::diff", ChunkKind::Method, "compare two trees"));
    chunks.push(chunk("src/o'brien.rs", "quote", ChunkKind::Function, "path with a quote"));
    index.add(&chunks, &embed_all(&embedder, &chunks)).expect("add");

    let mut expected = vec![chunks[0].chunk_id.clone(), chunks[3].chunk_id.clone()];
    expected.sort();
    assert_eq!(index.chunk_ids_for_file("src/merkle.rs").expect("ids"), expected);
    assert_eq!(index.chunk_ids_for_file("src/o'brien.rs").expect("ids"), vec![chunks[4].chunk_id.clone()]);
    assert!(index.chunk_ids_for_file("src/").expect("ids").is_empty());
}
