//! Keeps the lexical index's id set equal to the dense index's.
//!
//! The dense index's metadata store is the source of truth: a drifted
//! lexical index is rebuilt from it by [`IndexSynchronizer::resync_from_dense`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use codelens_core::types::{lexical_text, ChunkId, ChunkMetadata, CodeChunk};
use codelens_core::{Error, Result};

use crate::handles::IndexHandles;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSyncState {
    pub sparse_count: usize,
    pub dense_count: usize,
    pub in_sync: bool,
}

/// Result of a full id-set comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub dense_count: usize,
    pub lexical_count: usize,
    /// In the dense store but not searchable by keyword.
    pub missing_in_lexical: Vec<ChunkId>,
    /// Keyword-searchable but absent from the dense store.
    pub missing_in_dense: Vec<ChunkId>,
}

impl SyncReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_in_lexical.is_empty() && self.missing_in_dense.is_empty()
    }
}

pub struct IndexSynchronizer {
    batch_size: usize,
    drift: AtomicBool,
}

impl IndexSynchronizer {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1), drift: AtomicBool::new(false) }
    }

    pub fn has_drift(&self) -> bool {
        self.drift.load(Ordering::SeqCst)
    }

    fn mark_drift(&self, reason: &str) {
        self.drift.store(true, Ordering::SeqCst);
        error!(reason, "lexical and dense indices drifted; run resync_from_dense");
    }

    pub(crate) fn reset_drift(&self) {
        self.drift.store(false, Ordering::SeqCst);
    }

    /// Cheap count comparison, plus any drift a write path recorded.
    pub fn validate_index_sync(&self, handles: &IndexHandles) -> IndexSyncState {
        let counts = handles.lexical.count().and_then(|s| handles.dense.count().map(|d| (s, d)));
        match counts {
            Ok((sparse_count, dense_count)) => IndexSyncState {
                sparse_count,
                dense_count,
                in_sync: sparse_count == dense_count && !self.has_drift(),
            },
            Err(e) => {
                warn!(error = %e, "index count failed");
                IndexSyncState { sparse_count: 0, dense_count: 0, in_sync: false }
            }
        }
    }

    /// Full id-set comparison; catches drift that leaves counts equal.
    pub fn validate_strict(&self, handles: &IndexHandles) -> Result<SyncReport> {
        let dense: BTreeSet<ChunkId> = handles.dense.chunk_ids()?.into_iter().collect();
        let lexical: BTreeSet<ChunkId> = handles.lexical.chunk_ids()?.into_iter().collect();
        Ok(SyncReport {
            dense_count: dense.len(),
            lexical_count: lexical.len(),
            missing_in_lexical: dense.difference(&lexical).cloned().collect(),
            missing_in_dense: lexical.difference(&dense).cloned().collect(),
        })
    }

    /// Rebuild the lexical index from dense metadata. Returns the number of
    /// chunks indexed.
    pub fn resync_from_dense(&self, handles: &IndexHandles) -> Result<usize> {
        let chunks = handles.dense.scan_metadata()?;
        info!(chunks = chunks.len(), "rebuilding lexical index from dense metadata");
        handles.lexical.clear()?;
        for batch in chunks.chunks(self.batch_size) {
            let (texts, ids, metas) = lexical_batch(batch);
            handles.lexical.index(&texts, &ids, &metas)?;
        }
        handles.lexical.persist()?;
        self.reset_drift();
        Ok(chunks.len())
    }

    /// Add to the dense index, then the lexical one. A lexical failure rolls
    /// the dense side back to its prior rows (fresh ids removed, replaced ids
    /// restored); if that also fails, drift is recorded.
    pub fn add(&self, handles: &IndexHandles, chunks: &[CodeChunk], vectors: &[Vec<f32>]) -> Result<usize> {
        if chunks.len() != vectors.len() {
            return Err(Error::InvalidConfig(format!("{} chunks but {} vectors", chunks.len(), vectors.len())));
        }
        if chunks.is_empty() {
            return Ok(0);
        }
        let prior = PriorRows::capture(handles, chunks)?;
        handles.dense.add(chunks, vectors)?;
        let (texts, ids, metas) = lexical_batch(chunks);
        let staged = handles.lexical.index(&texts, &ids, &metas).and_then(|()| handles.lexical.persist());
        if let Err(e) = staged {
            warn!(error = %e, chunks = chunks.len(), replaced = prior.rows.len(), "lexical write failed, rolling back dense rows");
            if let Err(rollback) = prior.restore(handles, &ids) {
                self.mark_drift(&format!("rollback failed: {rollback}"));
                return Err(e.into());
            }
            let state = self.validate_index_sync(handles);
            if state.sparse_count != state.dense_count {
                self.mark_drift("dense and lexical counts differ after rollback");
                return Err(Error::Consistency { sparse: state.sparse_count, dense: state.dense_count });
            }
            return Err(e.into());
        }
        debug!(chunks = chunks.len(), "chunks added to both indices");
        Ok(chunks.len())
    }

    pub fn remove(&self, handles: &IndexHandles, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let dense_removed = handles.dense.remove(ids)?;
        let lexical_removed = handles.lexical.remove(ids).and_then(|n| handles.lexical.persist().map(|()| n));
        match lexical_removed {
            Ok(n) if n == dense_removed => Ok(dense_removed),
            Ok(n) => {
                self.mark_drift(&format!("removed {dense_removed} dense rows but {n} lexical docs"));
                Ok(dense_removed)
            }
            Err(e) => {
                self.mark_drift(&format!("lexical remove failed: {e}"));
                Err(e.into())
            }
        }
    }

    pub fn clear(&self, handles: &IndexHandles) -> Result<()> {
        handles.dense.clear()?;
        let lexical = handles.lexical.clear().and_then(|()| handles.lexical.persist());
        if let Err(e) = lexical {
            self.mark_drift(&format!("lexical clear failed: {e}"));
            return Err(e.into());
        }
        self.reset_drift();
        info!("both indices cleared");
        Ok(())
    }
}

/// Dense rows that an add is about to replace.
struct PriorRows {
    rows: Vec<CodeChunk>,
    vectors: Vec<Vec<f32>>,
}

impl PriorRows {
    fn capture(handles: &IndexHandles, chunks: &[CodeChunk]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut prior = Self { rows: Vec::new(), vectors: Vec::new() };
        for c in chunks.iter().filter(|c| seen.insert(c.chunk_id.as_str())) {
            let Some(metadata) = handles.dense.get_metadata(&c.chunk_id)? else { continue };
            let Some(vector) = handles.dense.reconstruct(&c.chunk_id)? else { continue };
            prior.rows.push(CodeChunk { chunk_id: c.chunk_id.clone(), metadata });
            prior.vectors.push(vector);
        }
        Ok(prior)
    }

    fn restore(&self, handles: &IndexHandles, ids: &[ChunkId]) -> Result<()> {
        let replaced: HashSet<&str> = self.rows.iter().map(|c| c.chunk_id.as_str()).collect();
        let fresh: Vec<ChunkId> = ids.iter().filter(|id| !replaced.contains(id.as_str())).cloned().collect();
        handles.dense.remove(&fresh)?;
        if !self.rows.is_empty() {
            handles.dense.add(&self.rows, &self.vectors)?;
        }
        Ok(())
    }
}

fn lexical_batch(chunks: &[CodeChunk]) -> (Vec<String>, Vec<ChunkId>, Vec<ChunkMetadata>) {
    let texts = chunks.iter().map(|c| lexical_text(&c.metadata)).collect();
    let ids = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    let metas = chunks.iter().map(|c| c.metadata.clone()).collect();
    (texts, ids, metas)
}
