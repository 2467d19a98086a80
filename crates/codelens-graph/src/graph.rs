use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::{debug, trace};

use codelens_core::types::{ChunkId, CodeChunk, RelationKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationEdge {
    pub kind: RelationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Directed chunk graph. Edges point from the chunk that holds the relation
/// (caller, subclass, importer, container) to its target.
#[derive(Default)]
pub struct CodeGraph {
    pub(crate) graph: StableDiGraph<ChunkId, RelationEdge>,
    pub(crate) node_index: HashMap<ChunkId, NodeIndex>,
    /// Bare and qualified names to the chunks defining them, for `calls`.
    name_index: HashMap<String, Vec<NodeIndex>>,
    file_nodes: HashMap<String, Vec<NodeIndex>>,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: &[CodeChunk]) -> Self {
        let mut g = Self::new();
        g.add_chunks(chunks);
        g
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats { nodes: self.graph.node_count(), edges: self.graph.edge_count() }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub(crate) fn get_node(&self, id: &str) -> Option<NodeIndex> {
        self.node_index.get(id).copied()
    }

    /// Add chunks and connect them. Relations whose target is not in the
    /// graph (yet) are skipped; re-adding a chunk replaces its outgoing edges.
    pub fn add_chunks(&mut self, chunks: &[CodeChunk]) {
        for chunk in chunks {
            self.add_node(chunk);
        }
        for chunk in chunks {
            self.connect(chunk);
        }
        debug!(chunks = chunks.len(), nodes = self.graph.node_count(), edges = self.graph.edge_count(), "relationship graph updated");
    }

    fn add_node(&mut self, chunk: &CodeChunk) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(&chunk.chunk_id) {
            let stale: Vec<_> = self.graph.edges_directed(idx, Direction::Outgoing).map(|e| e.id()).collect();
            for e in stale { self.graph.remove_edge(e); }
            return idx;
        }
        let idx = self.graph.add_node(chunk.chunk_id.clone());
        self.node_index.insert(chunk.chunk_id.clone(), idx);
        self.file_nodes.entry(chunk.metadata.file_path.clone()).or_default().push(idx);
        if let Some(name) = &chunk.metadata.name {
            self.name_index.entry(name.clone()).or_default().push(idx);
            let qualified = chunk.metadata.qualified_name();
            if &qualified != name {
                self.name_index.entry(qualified).or_default().push(idx);
            }
        }
        idx
    }

    fn connect(&mut self, chunk: &CodeChunk) {
        let Some(from) = self.get_node(&chunk.chunk_id) else { return };
        let meta = &chunk.metadata;
        for rel in &meta.relations {
            match self.get_node(&rel.target) {
                Some(to) if to != from => self.add_edge(from, to, rel.kind),
                Some(_) => {}
                None => trace!(source = %chunk.chunk_id, target = %rel.target, "unresolved relation"),
            }
        }
        for callee in &meta.calls {
            for to in self.resolve_call(callee, &meta.file_path) {
                if to != from { self.add_edge(from, to, RelationKind::Calls); }
            }
        }
        if let Some(parent) = meta.parent_chunk_id.as_deref().and_then(|p| self.get_node(p)) {
            if parent != from { self.add_edge(parent, from, RelationKind::Contains); }
        }
    }

    /// Same-file definitions win; otherwise every definition with that name.
    fn resolve_call(&self, name: &str, file: &str) -> Vec<NodeIndex> {
        let Some(candidates) = self.name_index.get(name) else { return Vec::new() };
        let local: Vec<NodeIndex> = candidates
            .iter()
            .copied()
            .filter(|idx| self.file_nodes.get(file).is_some_and(|nodes| nodes.contains(idx)))
            .collect();
        if local.is_empty() { candidates.clone() } else { local }
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: RelationKind) {
        let exists = self.graph.edges_connecting(from, to).any(|e| e.weight().kind == kind);
        if !exists {
            self.graph.add_edge(from, to, RelationEdge { kind });
        }
    }

    /// Drop every chunk of a file together with its edges.
    pub fn remove_file(&mut self, file: &str) -> usize {
        let Some(nodes) = self.file_nodes.remove(file) else { return 0 };
        for idx in &nodes {
            if let Some(id) = self.graph.remove_node(*idx) {
                self.node_index.remove(&id);
            }
        }
        for list in self.name_index.values_mut() {
            list.retain(|idx| !nodes.contains(idx));
        }
        self.name_index.retain(|_, list| !list.is_empty());
        nodes.len()
    }
}
