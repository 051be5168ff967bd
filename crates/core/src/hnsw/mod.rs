//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Vectors are kept uncompressed in a flat arena whose positions double as node ids and
//! labels. The graph is stored Struct-of-Arrays style next to it. Level sampling uses a
//! seeded generator owned by the index, so the same insert sequence yields the same graph.

/// Graph layout, configuration and the `VectorIndex` implementation.
pub mod graph;
/// Insertion with bidirectional links and heuristic pruning.
pub mod insert;
/// Single-layer beam search and multi-layer k-NN.
pub mod search;
/// Epoch-stamped visited set.
pub mod visited;

pub use graph::{Graph, HnswConfig, HnswIndex};
pub use search::knn_search;
