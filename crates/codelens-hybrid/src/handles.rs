use std::sync::Arc;

use codelens_core::traits::{DenseIndex, LexicalIndex, RelationshipGraph};

/// Every index collaborator the searcher talks to. Components receive a
/// borrowed `IndexHandles` per call and never keep their own copies, so
/// swapping the set through `HybridSearcher::replace_handles` rewires all of
/// them at once.
#[derive(Clone)]
pub struct IndexHandles {
    pub dense: Arc<dyn DenseIndex>,
    pub lexical: Arc<dyn LexicalIndex>,
    pub graph: Option<Arc<dyn RelationshipGraph>>,
}

impl IndexHandles {
    pub fn new(dense: Arc<dyn DenseIndex>, lexical: Arc<dyn LexicalIndex>) -> Self {
        Self { dense, lexical, graph: None }
    }

    pub fn with_graph(mut self, graph: Arc<dyn RelationshipGraph>) -> Self {
        self.graph = Some(graph);
        self
    }
}
