use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use codelens_core::traits::{NeighborQuery, RelationshipGraph};
use codelens_core::types::{ChunkId, RelationKind};

use crate::graph::CodeGraph;

impl CodeGraph {
    fn follows(query: &NeighborQuery, kind: RelationKind) -> bool {
        (query.relation_types.is_empty() || query.relation_types.contains(&kind))
            && !query.exclude_categories.contains(&kind.category())
            && edge_weight(query, kind) > 0.0
    }

    /// Breadth-first neighborhood ignoring edge direction. Nodes are ordered
    /// by depth, then by the best product of edge weights along a path, then
    /// by id. A zero edge weight disables that relation kind.
    pub fn neighborhood(&self, node: &str, query: &NeighborQuery) -> Vec<ChunkId> {
        let Some(start) = self.get_node(node) else { return Vec::new() };
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut frontier: Vec<(NodeIndex, f32)> = vec![(start, 1.0)];
        let mut out = Vec::new();
        for _ in 0..query.max_depth {
            let mut level: HashMap<NodeIndex, f32> = HashMap::new();
            for &(idx, path_weight) in &frontier {
                let edges = self
                    .graph
                    .edges_directed(idx, Direction::Outgoing)
                    .map(|e| (e.target(), e.weight().kind))
                    .chain(self.graph.edges_directed(idx, Direction::Incoming).map(|e| (e.source(), e.weight().kind)));
                for (next, kind) in edges {
                    if visited.contains(&next) || !Self::follows(query, kind) { continue; }
                    let w = path_weight * edge_weight(query, kind);
                    let best = level.entry(next).or_insert(w);
                    if w > *best { *best = w; }
                }
            }
            if level.is_empty() { break; }
            let mut ranked: Vec<(NodeIndex, f32, &ChunkId)> = level
                .into_iter()
                .filter_map(|(idx, w)| self.graph.node_weight(idx).map(|id| (idx, w, id)))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.2.cmp(b.2)));
            let mut next = Vec::with_capacity(ranked.len());
            for (idx, w, id) in ranked {
                visited.insert(idx);
                out.push(id.clone());
                if query.limit > 0 && out.len() >= query.limit { return out; }
                next.push((idx, w));
            }
            frontier = next;
        }
        out
    }

    fn directed(&self, node: &str, dir: Direction) -> Vec<ChunkId> {
        let Some(idx) = self.get_node(node) else { return Vec::new() };
        let mut ids: Vec<ChunkId> = self
            .graph
            .edges_directed(idx, dir)
            .filter(|e| e.weight().kind == RelationKind::Calls)
            .filter_map(|e| {
                let other = if dir == Direction::Outgoing { e.target() } else { e.source() };
                self.graph.node_weight(other).cloned()
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

fn edge_weight(query: &NeighborQuery, kind: RelationKind) -> f32 {
    query.edge_weights.get(&kind).copied().unwrap_or(1.0)
}

impl RelationshipGraph for CodeGraph {
    fn get_neighbors(&self, node: &str, query: &NeighborQuery) -> anyhow::Result<Vec<ChunkId>> {
        Ok(self.neighborhood(node, query))
    }

    fn get_callers(&self, node: &str) -> anyhow::Result<Vec<ChunkId>> {
        Ok(self.directed(node, Direction::Incoming))
    }

    fn get_callees(&self, node: &str) -> anyhow::Result<Vec<ChunkId>> {
        Ok(self.directed(node, Direction::Outgoing))
    }
}
