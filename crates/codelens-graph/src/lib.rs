//! codelens-graph
//!
//! In-memory code relationship graph implementing
//! [`codelens_core::traits::RelationshipGraph`]. Nodes are chunks; edges come
//! from resolved `relations`, bare `calls` names and `parent_chunk_id` links.

pub mod graph;
pub mod traversal;

pub use graph::{CodeGraph, GraphStats, RelationEdge};
