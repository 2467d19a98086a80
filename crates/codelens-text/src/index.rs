use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, warn};

use codelens_core::traits::LexicalIndex;
use codelens_core::types::{ChunkId, ChunkMetadata, RawHit, SearchFilters};

use crate::tantivy_utils::{build_schema, register_tokenizer, LexicalFields};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// BM25 index over chunk text backed by tantivy.
///
/// Every mutation commits and reloads the reader, so `count` and `search`
/// observe writes immediately.
pub struct TantivyLexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: LexicalFields,
}

impl TantivyLexicalIndex {
    /// Create a fresh index in `index_dir`, removing whatever was there.
    pub fn create(index_dir: &Path) -> Result<Self> {
        if index_dir.exists() { std::fs::remove_dir_all(index_dir)?; }
        std::fs::create_dir_all(index_dir)?;
        Self::from_index(Index::create_in_dir(index_dir, build_schema())?)
    }

    /// Open an existing index, or create one if the directory holds none.
    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let index = match Index::open_in_dir(index_dir) {
            Ok(index) => index,
            Err(e) => {
                debug!(dir = %index_dir.display(), error = %e, "no usable tantivy index, creating");
                Index::create_in_dir(index_dir, build_schema())?
            }
        };
        Self::from_index(index)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        register_tokenizer(&index);
        let fields = LexicalFields::resolve(&index.schema())?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        Ok(Self { index, reader, writer: Mutex::new(writer), fields })
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut IndexWriter) -> Result<T>) -> Result<T> {
        let mut writer = self.writer.lock().map_err(|_| anyhow!("tantivy writer lock poisoned"))?;
        let staged = f(&mut writer).and_then(|out| {
            writer.commit()?;
            Ok(out)
        });
        match staged {
            Ok(out) => {
                self.reader.reload()?;
                Ok(out)
            }
            Err(e) => {
                // Queued operations would otherwise ride along with the next commit.
                if let Err(rollback) = writer.rollback() {
                    warn!(error = %rollback, "tantivy rollback failed");
                }
                Err(e)
            }
        }
    }

    fn hit_from_doc(&self, doc: &TantivyDocument, score: f32) -> Option<RawHit> {
        let chunk_id = doc.get_first(self.fields.chunk_id).and_then(|v| v.as_str())?.to_string();
        let raw = doc.get_first(self.fields.metadata).and_then(|v| v.as_str())?;
        match serde_json::from_str::<ChunkMetadata>(raw) {
            Ok(metadata) => Some(RawHit { chunk_id, score, metadata }),
            Err(e) => { warn!(%chunk_id, error = %e, "unreadable stored metadata"); None }
        }
    }
}

impl LexicalIndex for TantivyLexicalIndex {
    fn index(&self, texts: &[String], ids: &[ChunkId], metadata: &[ChunkMetadata]) -> Result<()> {
        if texts.len() != ids.len() || ids.len() != metadata.len() {
            return Err(anyhow!("texts ({}), ids ({}) and metadata ({}) length mismatch", texts.len(), ids.len(), metadata.len()));
        }
        if ids.is_empty() { return Ok(()); }
        self.with_writer(|writer| {
            for ((text, id), meta) in texts.iter().zip(ids).zip(metadata) {
                // Re-indexing an id replaces it.
                writer.delete_term(Term::from_field_text(self.fields.chunk_id, id));
                writer.add_document(doc!(
                    self.fields.chunk_id => id.clone(),
                    self.fields.text => text.clone(),
                    self.fields.file_path => meta.file_path.clone(),
                    self.fields.kind => meta.kind.as_str().to_string(),
                    self.fields.metadata => serde_json::to_string(meta)?,
                ))?;
            }
            Ok(())
        })?;
        debug!(chunks = ids.len(), "lexical index updated");
        Ok(())
    }

    fn search(&self, query: &str, k: usize, min_score: f32, filters: &SearchFilters) -> Result<Vec<RawHit>> {
        if query.trim().is_empty() || k == 0 { return Ok(vec![]); }
        let searcher = self.reader.searcher();
        let qp = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let (q, errors) = qp.parse_query_lenient(query);
        if !errors.is_empty() { debug!(?errors, "lenient query parse dropped terms"); }
        let limit = if filters.is_empty() { k } else { k.saturating_mul(4) };
        let top_docs = searcher.search(&*q, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::new();
        for (score, addr) in top_docs {
            if score < min_score { continue; }
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(hit) = self.hit_from_doc(&doc, score) {
                if filters.matches(&hit.metadata) { hits.push(hit); }
            }
            if hits.len() == k { break; }
        }
        Ok(hits)
    }

    fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() { return Ok(0); }
        let before = self.count()?;
        self.with_writer(|writer| {
            for id in ids { writer.delete_term(Term::from_field_text(self.fields.chunk_id, id)); }
            Ok(())
        })?;
        Ok(before.saturating_sub(self.count()?))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.reader.searcher().num_docs() as usize)
    }

    fn chunk_ids(&self) -> Result<Vec<ChunkId>> {
        self.ids_matching(&AllQuery)
    }

    fn chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<ChunkId>> {
        let term = Term::from_field_text(self.fields.file_path, file_path);
        self.ids_matching(&TermQuery::new(term, IndexRecordOption::Basic))
    }

    fn clear(&self) -> Result<()> {
        self.with_writer(|writer| { writer.delete_all_documents()?; Ok(()) })
    }

    fn persist(&self) -> Result<()> {
        self.with_writer(|_| Ok(()))
    }

    fn load(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }
}

impl TantivyLexicalIndex {
    fn ids_matching(&self, query: &dyn Query) -> Result<Vec<ChunkId>> {
        let searcher = self.reader.searcher();
        let addrs = searcher.search(query, &DocSetCollector)?;
        let mut ids = HashSet::with_capacity(addrs.len());
        for addr in addrs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(id) = doc.get_first(self.fields.chunk_id).and_then(|v| v.as_str()) { ids.insert(id.to_string()); }
        }
        let mut ids: Vec<ChunkId> = ids.into_iter().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_batch_is_discarded_not_committed_later() {
        let index = TantivyLexicalIndex::in_memory().expect("index");
        let failed: Result<()> = index.with_writer(|writer| {
            writer.add_document(doc!(
                index.fields.chunk_id => "src/a.rs:1-4:function:a",
                index.fields.file_path => "src/a.rs",
                index.fields.text => "alpha",
            ))?;
            Err(anyhow!("metadata could not be encoded"))
        });
        assert!(failed.is_err());
        assert_eq!(index.count().expect("count"), 0);

        index.persist().expect("persist");
        assert_eq!(index.count().expect("count"), 0);
        assert!(index.chunk_ids().expect("ids").is_empty());
    }
}
