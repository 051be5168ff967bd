//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] holds the tuning parameters. [`HnswIndex`] keeps vectors in a
//! [`FlatIndex`] arena and the graph in Struct-of-Arrays form: per-node levels and
//! per-node, per-layer neighbor lists indexed by storage position.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{IndexError, Result};
use crate::flat::FlatIndex;
use crate::hnsw::search::knn_search;
use crate::hnsw::visited::VisitedSet;
use crate::index::{check_vectors, IndexKind, VectorIndex};
use crate::metric::MetricType;
use crate::result::{search_rows, Label, SearchResult};

/// Tuning parameters for an HNSW index. Persisted with the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Links per node on layers above 0.
    pub m: usize,
    /// Links per node on layer 0 (`2 * m`).
    pub m_max0: usize,
    /// Frontier size while inserting.
    pub ef_construction: usize,
    /// Frontier size on layer 0 while searching (raised to `k` per query).
    pub ef_search: usize,
    pub max_layers: usize,
}

impl HnswConfig {
    pub fn with_m(m: usize) -> Self {
        Self {
            m,
            m_max0: m * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION.max(m),
            ef_search: config::HNSW_DEFAULT_EF_SEARCH.max(m),
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
        }
    }

    /// Reject settings the graph code cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(IndexError::argument(format!(
                "HNSW m must be at least 2, got {}",
                self.m
            )));
        }
        if self.m_max0 < self.m {
            return Err(IndexError::argument("HNSW layer-0 link cap must be at least m"));
        }
        if self.max_layers == 0 || self.max_layers > u8::MAX as usize + 1 {
            return Err(IndexError::argument("HNSW max_layers must be in 1..=256"));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(IndexError::argument("HNSW ef values must be at least 1"));
        }
        Ok(())
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::with_m(config::HNSW_DEFAULT_M)
    }
}

/// Layered adjacency. Node ids are storage positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    /// `[node][layer] -> neighbor ids`
    pub neighbors: Vec<Vec<Vec<u32>>>,
    pub levels: Vec<u8>,
    pub entry_point: Option<u32>,
    pub max_level: usize,
}

/// Approximate k-NN index over a layered proximity graph.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) config: HnswConfig,
    pub(crate) storage: FlatIndex,
    pub(crate) graph: Graph,
    rng: StdRng,
}

impl HnswIndex {
    /// Empty index with `m` links per node. `m` must be at least 2.
    pub fn new(dimension: usize, m: usize, metric: MetricType) -> Result<Self> {
        Self::with_config(dimension, metric, HnswConfig::with_m(m))
    }

    pub fn with_config(dimension: usize, metric: MetricType, config: HnswConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            storage: FlatIndex::new(dimension, metric)?,
            graph: Graph::default(),
            rng: StdRng::seed_from_u64(config::HNSW_LEVEL_SEED),
        })
    }

    /// Reassemble a persisted index. The level generator restarts from a seed derived from
    /// the stored count.
    pub(crate) fn from_parts(config: HnswConfig, storage: FlatIndex, graph: Graph) -> Result<Self> {
        config
            .validate()
            .map_err(|e| IndexError::corrupt(format!("stored HNSW config: {e}")))?;
        let n = storage.ntotal();
        if graph.levels.len() != n || graph.neighbors.len() != n {
            return Err(IndexError::corrupt(format!(
                "HNSW graph has {} nodes but storage holds {n} vectors",
                graph.levels.len()
            )));
        }
        if graph.entry_point.map_or(n != 0, |ep| ep as usize >= n) {
            return Err(IndexError::corrupt("HNSW entry point out of range"));
        }
        let out_of_range = graph
            .neighbors
            .iter()
            .flatten()
            .flatten()
            .any(|&id| id as usize >= n);
        if out_of_range {
            return Err(IndexError::corrupt("HNSW neighbor id out of range"));
        }
        let bad_levels = graph.levels.iter().zip(&graph.neighbors).any(|(&level, layers)| {
            level as usize >= config.max_layers || layers.len() != level as usize + 1
        });
        if bad_levels || graph.max_level >= config.max_layers {
            return Err(IndexError::corrupt("HNSW node levels do not match the graph"));
        }
        Ok(Self {
            config,
            storage,
            graph,
            rng: StdRng::seed_from_u64(config::HNSW_LEVEL_SEED.wrapping_add(n as u64)),
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn m(&self) -> usize {
        self.config.m
    }

    pub fn ef_search(&self) -> usize {
        self.config.ef_search
    }

    /// Set the layer-0 search frontier. Clamped to at least 1.
    pub fn set_ef_search(&mut self, ef: usize) {
        self.config.ef_search = ef.max(1);
    }

    pub fn ef_construction(&self) -> usize {
        self.config.ef_construction
    }

    /// Set the insertion frontier for subsequent adds. Clamped to at least 1.
    pub fn set_ef_construction(&mut self, ef: usize) {
        self.config.ef_construction = ef.max(1);
    }

    pub fn storage(&self) -> &FlatIndex {
        &self.storage
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Sample a level from the exponential distribution `floor(-ln(U) / ln(m))`.
    pub(crate) fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = self.rng.gen();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Link cap for a layer.
    #[inline]
    pub(crate) fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }

    #[inline]
    pub(crate) fn distance(&self, query: &[f32], id: u32) -> f32 {
        self.storage.distance_to(query, id as usize)
    }

    /// Discard the graph and rebuild it from the vectors currently in storage.
    fn rebuild(&mut self) {
        let survivors = self.storage.vectors().to_vec();
        self.reset();
        self.insert_all(&survivors);
    }

    fn insert_all(&mut self, vectors: &[f32]) {
        let d = self.storage.dimension();
        let n = vectors.len() / d;
        let mut visited = VisitedSet::with_capacity(self.storage.ntotal() + n);
        for row in vectors.chunks_exact(d) {
            self.insert(row, &mut visited);
        }
    }

    /// Append every vector of `other` in storage order.
    pub fn merge_from(&mut self, other: &HnswIndex) -> Result<()> {
        if other.dimension() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: other.dimension(),
            });
        }
        self.insert_all(other.storage.vectors());
        Ok(())
    }
}

impl VectorIndex for HnswIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Hnsw
    }

    fn dimension(&self) -> usize {
        self.storage.dimension()
    }

    fn metric(&self) -> MetricType {
        self.storage.metric()
    }

    fn ntotal(&self) -> usize {
        self.storage.ntotal()
    }

    fn add(&mut self, vectors: &[f32]) -> Result<()> {
        let n = check_vectors(self.dimension(), vectors)?;
        self.insert_all(vectors);
        tracing::debug!(added = n, ntotal = self.ntotal(), "hnsw add");
        Ok(())
    }

    fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        check_vectors(self.dimension(), queries)?;
        Ok(search_rows(queries, self.dimension(), k, self.metric(), |q| {
            knn_search(self, q, k)
                .into_iter()
                .map(|(d, id)| (d, id as Label))
                .collect()
        }))
    }

    fn reconstruct(&self, label: Label) -> Result<Vec<f32>> {
        self.storage.reconstruct(label)
    }

    /// Graph nodes cannot be unlinked in place, so removal compacts storage and rebuilds
    /// the graph from the survivors.
    fn remove_ids(&mut self, labels: &[Label]) -> Result<usize> {
        let doomed = self.storage.positions_of(labels);
        let removed = self.storage.remove_positions(&doomed);
        if removed > 0 {
            self.rebuild();
            tracing::info!(removed, ntotal = self.ntotal(), "hnsw graph rebuilt after removal");
        }
        Ok(removed)
    }

    fn reset(&mut self) {
        self.storage.reset();
        self.graph = Graph::default();
        self.rng = StdRng::seed_from_u64(config::HNSW_LEVEL_SEED);
    }

    fn ids(&self) -> Vec<Label> {
        self.storage.ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_defaults_follow_m() {
        let index = HnswIndex::new(4, 32, MetricType::L2).unwrap();
        assert_eq!(index.ef_construction(), 40);
        assert_eq!(index.ef_search(), 32);
        assert_eq!(index.config().m_max0, 64);

        let small = HnswIndex::new(4, 8, MetricType::L2).unwrap();
        assert_eq!(small.ef_construction(), 40);
        assert_eq!(small.ef_search(), 16);
    }

    #[test]
    fn test_m_must_be_at_least_two() {
        assert!(matches!(
            HnswIndex::new(4, 1, MetricType::L2),
            Err(IndexError::Argument(_))
        ));
    }

    #[test]
    fn test_from_parts_rejects_unusable_config() {
        let mut index = HnswIndex::new(2, 4, MetricType::L2).unwrap();
        index.add(&[0.0, 0.0, 1.0, 1.0]).unwrap();

        let mut no_layers = index.config().clone();
        no_layers.max_layers = 0;
        let mut single_link = index.config().clone();
        single_link.m = 1;
        let mut no_frontier = index.config().clone();
        no_frontier.ef_construction = 0;

        for config in [no_layers, single_link, no_frontier] {
            let err = HnswIndex::from_parts(config, index.storage.clone(), index.graph.clone()).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        }

        let mut shallow = index.graph.clone();
        shallow.levels[0] += 1;
        let err = HnswIndex::from_parts(index.config().clone(), index.storage.clone(), shallow).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);

        let back = HnswIndex::from_parts(index.config().clone(), index.storage.clone(), index.graph.clone()).unwrap();
        assert_eq!(back.ntotal(), 2);
    }

    #[test]
    fn test_ef_setters_clamp() {
        let mut index = HnswIndex::new(4, 8, MetricType::L2).unwrap();
        index.set_ef_search(0);
        index.set_ef_construction(0);
        assert_eq!(index.ef_search(), 1);
        assert_eq!(index.ef_construction(), 1);
    }

    #[test]
    fn test_random_level_capped() {
        let mut index = HnswIndex::new(4, 2, MetricType::L2).unwrap();
        for _ in 0..10_000 {
            assert!(index.random_level() < index.config.max_layers);
        }
    }

    #[test]
    fn test_builds_are_reproducible() {
        let data = random_vectors(200, 8, 3);
        let mut a = HnswIndex::new(8, 8, MetricType::L2).unwrap();
        let mut b = HnswIndex::new(8, 8, MetricType::L2).unwrap();
        a.add(&data).unwrap();
        b.add(&data).unwrap();
        assert_eq!(a.graph.levels, b.graph.levels);
        assert_eq!(a.graph.neighbors, b.graph.neighbors);
    }

    #[test]
    fn test_small_scenario() {
        let mut index = HnswIndex::new(2, 4, MetricType::L2).unwrap();
        index
            .add(&[1.0, 0.0, 1.0, 2.0, 1.0, 3.0, 1.0, 1.0])
            .unwrap();
        let res = index.search(&[1.0, 1.0], 4).unwrap();
        assert_eq!(res.distances, vec![0.0, 1.0, 1.0, 4.0]);
        assert_eq!(res.labels, vec![3, 0, 1, 2]);

        assert_eq!(index.remove_ids(&[0, 1]).unwrap(), 2);
        let res = index.search(&[1.0, 3.0], 1).unwrap();
        assert_eq!(res.labels, vec![0]);
        assert_eq!(res.distances, vec![0.0]);
    }

    #[test]
    fn test_neighbor_lists_respect_caps() {
        let data = random_vectors(300, 6, 11);
        let mut index = HnswIndex::new(6, 4, MetricType::L2).unwrap();
        index.add(&data).unwrap();
        for node in &index.graph.neighbors {
            for (layer, links) in node.iter().enumerate() {
                assert!(links.len() <= index.max_links(layer));
            }
        }
    }

    #[test]
    fn test_merge_and_reconstruct() {
        let mut a = HnswIndex::new(3, 4, MetricType::L2).unwrap();
        let mut b = HnswIndex::new(3, 4, MetricType::L2).unwrap();
        a.add(&[0.0, 0.0, 0.0]).unwrap();
        b.add(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        a.merge_from(&b).unwrap();
        assert_eq!(a.ntotal(), 3);
        assert_eq!(b.ntotal(), 2);
        assert_eq!(a.reconstruct(2).unwrap(), vec![4.0, 5.0, 6.0]);
        let res = a.search(&[1.0, 2.0, 3.0], 1).unwrap();
        assert_eq!(res.labels, vec![1]);
    }

    #[test]
    fn test_reset() {
        let mut index = HnswIndex::new(2, 4, MetricType::L2).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.reset();
        assert_eq!(index.ntotal(), 0);
        assert!(index.graph.entry_point.is_none());
        let res = index.search(&[0.0, 1.0], 2).unwrap();
        assert_eq!(res.labels, vec![-1, -1]);
    }
}
