use anyhow::{anyhow, Result};
use arrow_array::{RecordBatch, RecordBatchIterator};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use codelens_core::traits::DenseIndex;
use codelens_core::types::{ChunkId, ChunkMetadata, CodeChunk, RawHit, SearchFilters};

use crate::table::{ensure_table, open_db, sql_quote};
use crate::writer::{chunks_to_record_batch, metadata_at, score_at, string_column, vector_at};
use crate::schema::build_chunk_schema;

/// Blocking facade over a LanceDB chunk table.
///
/// The retrieval core is synchronous, so the async lancedb calls are driven
/// on a runtime owned by the index. Must not be called from inside another
/// tokio runtime.
pub struct LanceDenseIndex {
    rt: Runtime,
    db: Connection,
    table_name: String,
    dim: i32,
}

impl LanceDenseIndex {
    pub fn open(db_path: &Path, table_name: &str, dim: usize) -> Result<Self> {
        let rt = Runtime::new()?;
        let dim = i32::try_from(dim)?;
        let db = rt.block_on(async {
            let db = open_db(db_path.to_string_lossy().as_ref()).await?;
            ensure_table(&db, table_name, build_chunk_schema(dim)).await?;
            Ok::<_, anyhow::Error>(db)
        })?;
        Ok(Self { rt, db, table_name: table_name.to_string(), dim })
    }

    pub fn dim(&self) -> usize {
        self.dim as usize
    }

    async fn table(&self) -> Result<Table> {
        Ok(self.db.open_table(&self.table_name).execute().await?)
    }

    async fn collect(&self, predicate: Option<String>, limit: Option<usize>) -> Result<Vec<RecordBatch>> {
        let table = self.table().await?;
        let mut query = table.query();
        if let Some(p) = predicate { query = query.only_if(p); }
        if let Some(n) = limit { query = query.limit(n); }
        let stream = query.execute().await?;
        Ok(stream.try_collect::<Vec<_>>().await?)
    }

    fn ids_where(&self, predicate: Option<String>) -> Result<Vec<ChunkId>> {
        let batches = self.rt.block_on(self.collect(predicate, None))?;
        let mut ids = Vec::new();
        for batch in &batches {
            let col = string_column(batch, "chunk_id")?;
            ids.extend((0..batch.num_rows()).map(|i| col.value(i).to_string()));
        }
        ids.sort();
        Ok(ids)
    }

    fn lookup<T>(&self, id: &str, read: impl Fn(&RecordBatch, usize) -> Result<Option<T>>) -> Result<Option<T>> {
        let predicate = format!("chunk_id = {}", sql_quote(id));
        let batches = self.rt.block_on(self.collect(Some(predicate), Some(1)))?;
        for batch in &batches {
            if batch.num_rows() > 0 { return read(batch, 0); }
        }
        Ok(None)
    }
}

/// Translate filters into a lance SQL predicate. Hits are re-checked with
/// `SearchFilters::matches` since LIKE treats `_` as a wildcard.
fn filter_predicate(filters: &SearchFilters) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(p) = &filters.file_pattern {
        clauses.push(format!("file_path LIKE {}", sql_quote(&format!("%{p}%"))));
    }
    if !filters.kinds.is_empty() {
        let kinds: Vec<String> = filters.kinds.iter().map(|k| sql_quote(k.as_str())).collect();
        clauses.push(format!("kind IN ({})", kinds.join(", ")));
    }
    for x in &filters.exclude_paths {
        clauses.push(format!("file_path NOT LIKE {}", sql_quote(&format!("%{x}%"))));
    }
    if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) }
}

impl DenseIndex for LanceDenseIndex {
    fn add(&self, chunks: &[CodeChunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.is_empty() { return Ok(()); }
        let batch = chunks_to_record_batch(chunks, vectors, self.dim)?;
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        self.rt.block_on(async {
            let table = self.table().await?;
            // Replacement semantics: drop stale rows for these ids first.
            let list: Vec<String> = ids.iter().map(|id| sql_quote(id)).collect();
            table.delete(&format!("chunk_id IN ({})", list.join(", "))).await?;
            let schema = batch.schema();
            let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
            table.add(reader).execute().await?;
            Ok::<_, anyhow::Error>(())
        })?;
        debug!(chunks = chunks.len(), table = %self.table_name, "dense index updated");
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, filters: &SearchFilters) -> Result<Vec<RawHit>> {
        if k == 0 || self.count()? == 0 { return Ok(vec![]); }
        if query.len() != self.dim as usize {
            return Err(anyhow!("query vector has dim {}, table expects {}", query.len(), self.dim));
        }
        let batches = self.rt.block_on(async {
            let table = self.table().await?;
            let mut q = table.vector_search(query.to_vec())?.distance_type(DistanceType::Cosine).limit(k);
            if let Some(p) = filter_predicate(filters) { q = q.only_if(p); }
            let stream = q.execute().await?;
            Ok::<_, anyhow::Error>(stream.try_collect::<Vec<_>>().await?)
        })?;
        let mut hits = Vec::new();
        for batch in &batches {
            let ids = string_column(batch, "chunk_id")?;
            for i in 0..batch.num_rows() {
                let metadata = match metadata_at(batch, i) {
                    Ok(m) => m,
                    Err(e) => { warn!(chunk_id = ids.value(i), error = %e, "unreadable metadata row"); continue; }
                };
                if !filters.matches(&metadata) { continue; }
                hits.push(RawHit { chunk_id: ids.value(i).to_string(), score: score_at(batch, i), metadata });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() { return Ok(0); }
        let before = self.count()?;
        let list: Vec<String> = ids.iter().map(|id| sql_quote(id)).collect();
        self.rt.block_on(async {
            self.table().await?.delete(&format!("chunk_id IN ({})", list.join(", "))).await?;
            Ok::<_, anyhow::Error>(())
        })?;
        Ok(before.saturating_sub(self.count()?))
    }

    fn reconstruct(&self, id: &str) -> Result<Option<Vec<f32>>> {
        self.lookup(id, vector_at)
    }

    fn count(&self) -> Result<usize> {
        self.rt.block_on(async { Ok(self.table().await?.count_rows(None).await?) })
    }

    fn get_metadata(&self, id: &str) -> Result<Option<ChunkMetadata>> {
        self.lookup(id, |batch, row| metadata_at(batch, row).map(Some))
    }

    fn scan_metadata(&self) -> Result<Vec<CodeChunk>> {
        let batches = self.rt.block_on(self.collect(None, None))?;
        let mut chunks = Vec::new();
        for batch in &batches {
            let ids = string_column(batch, "chunk_id")?;
            for i in 0..batch.num_rows() {
                chunks.push(CodeChunk { chunk_id: ids.value(i).to_string(), metadata: metadata_at(batch, i)? });
            }
        }
        chunks.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        Ok(chunks)
    }

    fn chunk_ids(&self) -> Result<Vec<ChunkId>> {
        self.ids_where(None)
    }

    fn chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<ChunkId>> {
        self.ids_where(Some(format!("file_path = {}", sql_quote(file_path))))
    }

    fn clear(&self) -> Result<()> {
        self.rt.block_on(async {
            self.table().await?.delete("true").await?;
            Ok::<_, anyhow::Error>(())
        })
    }
}
