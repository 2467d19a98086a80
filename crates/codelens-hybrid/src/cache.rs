use moka::sync::Cache;
use std::sync::Arc;
use tracing::{debug, warn};

use codelens_core::types::{ChunkId, ChunkMetadata};

use crate::handles::IndexHandles;

/// Recently used chunk metadata, read through from the dense index.
/// Entries are immutable `Arc`s, so concurrent readers never observe a
/// partially written value.
pub struct MetadataCache {
    entries: Cache<ChunkId, Arc<ChunkMetadata>>,
}

impl MetadataCache {
    pub fn new(capacity: u64) -> Self {
        Self { entries: Cache::new(capacity.max(1)) }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ChunkMetadata>> {
        self.entries.get(id)
    }

    pub fn insert(&self, id: ChunkId, metadata: ChunkMetadata) -> Arc<ChunkMetadata> {
        let value = Arc::new(metadata);
        self.entries.insert(id, value.clone());
        value
    }

    /// Cached metadata, falling back to the dense index. Lookup failures are
    /// logged and reported as absent.
    pub fn get_or_load(&self, handles: &IndexHandles, id: &str) -> Option<Arc<ChunkMetadata>> {
        if let Some(hit) = self.entries.get(id) {
            return Some(hit);
        }
        match handles.dense.get_metadata(id) {
            Ok(Some(meta)) => Some(self.insert(id.to_string(), meta)),
            Ok(None) => {
                debug!(chunk_id = id, "no dense metadata");
                None
            }
            Err(e) => {
                warn!(chunk_id = id, error = %e, "metadata lookup failed");
                None
            }
        }
    }

    pub fn invalidate(&self, ids: &[ChunkId]) {
        for id in ids {
            self.entries.invalidate(id);
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
