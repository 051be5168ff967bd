//! HNSW insertion with bidirectional links and heuristic neighbor pruning
//! (Algorithm 4 of the HNSW paper).

use std::collections::HashSet;

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use crate::index::VectorIndex;

impl HnswIndex {
    /// Append `vector` to storage and link it into the graph. Its id is the previous
    /// `ntotal`. `visited` must cover the new id.
    pub(crate) fn insert(&mut self, vector: &[f32], visited: &mut VisitedSet) {
        let id = self.storage.ntotal() as u32;
        // Length is checked by the caller.
        self.storage.push(vector);
        visited.grow_to(id as usize + 1);

        let level = self.random_level();
        self.graph.levels.push(level as u8);
        self.graph.neighbors.push(vec![Vec::new(); level + 1]);

        let Some(entry_point) = self.graph.entry_point else {
            self.graph.entry_point = Some(id);
            self.graph.max_level = level;
            return;
        };

        // Phase 1: greedy descent to the node's level + 1.
        let mut current = entry_point;
        for layer in (level + 1..=self.graph.max_level).rev() {
            let nearest = search_layer(self, vector, std::slice::from_ref(&current), 1, layer, visited);
            if let Some(&(_, nearest_id)) = nearest.first() {
                current = nearest_id;
            }
        }

        // Phase 2: pick neighbors on every shared layer.
        let top = level.min(self.graph.max_level);
        let mut layer_eps = vec![current];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vector,
                &layer_eps,
                self.config.ef_construction,
                layer,
                visited,
            );
            let selected = select_neighbors_heuristic(self, &candidates, self.max_links(layer));
            self.graph.neighbors[id as usize][layer] = selected.iter().map(|&(_, n)| n).collect();

            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, n)| n));
            if layer_eps.is_empty() {
                layer_eps.push(entry_point);
            }
        }

        // Phase 3: back-links, re-pruning neighbors that overflow.
        for layer in 0..=top {
            let cap = self.max_links(layer);
            let linked = self.graph.neighbors[id as usize][layer].clone();
            for nb in linked {
                let nb_idx = nb as usize;
                if self.graph.neighbors[nb_idx].len() <= layer {
                    self.graph.neighbors[nb_idx].resize(layer + 1, Vec::new());
                }
                self.graph.neighbors[nb_idx][layer].push(id);

                if self.graph.neighbors[nb_idx][layer].len() > cap {
                    let base = self.storage.vector(nb_idx);
                    let candidates: Vec<(f32, u32)> = self.graph.neighbors[nb_idx][layer]
                        .iter()
                        .map(|&c| (self.distance(base, c), c))
                        .collect();
                    let kept = select_neighbors_heuristic(self, &candidates, cap);
                    self.graph.neighbors[nb_idx][layer] = kept.iter().map(|&(_, n)| n).collect();
                }
            }
        }

        if level > self.graph.max_level {
            self.graph.max_level = level;
            self.graph.entry_point = Some(id);
        }
    }
}

/// Diversity-preferring neighbor selection.
///
/// A candidate is kept only if it is closer to the base than to every neighbor kept so far.
/// Remaining slots are filled with the closest rejected candidates.
fn select_neighbors_heuristic(
    index: &HnswIndex,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let candidate = index.storage.vector(cid as usize);
        let diverse = selected
            .iter()
            .all(|&(_, sid)| to_base < index.distance(candidate, sid));
        if diverse {
            selected.push((to_base, cid));
        }
    }

    if selected.len() < m {
        let taken: HashSet<u32> = selected.iter().map(|&(_, id)| id).collect();
        for &(d, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !taken.contains(&cid) {
                selected.push((d, cid));
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricType;

    #[test]
    fn test_heuristic_prefers_diverse_neighbors() {
        let mut index = HnswIndex::new(1, 2, MetricType::L2).unwrap();
        // base at 0; candidates at 1, 1.1 (redundant with 1) and -2
        index.add(&[0.0, 1.0, 1.1, -2.0]).unwrap();
        let candidates = vec![(1.0, 1), (1.21, 2), (4.0, 3)];
        let picked = select_neighbors_heuristic(&index, &candidates, 2);
        let ids: Vec<u32> = picked.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_heuristic_fills_remaining_slots() {
        let mut index = HnswIndex::new(1, 2, MetricType::L2).unwrap();
        index.add(&[0.0, 1.0, 1.1, 1.2]).unwrap();
        let candidates = vec![(1.44, 3), (1.0, 1), (1.21, 2)];
        let picked = select_neighbors_heuristic(&index, &candidates, 3);
        let ids: Vec<u32> = picked.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let mut index = HnswIndex::new(2, 4, MetricType::L2).unwrap();
        let mut visited = VisitedSet::with_capacity(1);
        index.insert(&[1.0, 1.0], &mut visited);
        assert_eq!(index.graph.entry_point, Some(0));
        assert_eq!(index.ntotal(), 1);
    }

    #[test]
    fn test_links_are_bidirectional_on_small_graph() {
        let mut index = HnswIndex::new(2, 8, MetricType::L2).unwrap();
        index
            .add(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0])
            .unwrap();
        for (node, layers) in index.graph.neighbors.iter().enumerate() {
            for &nb in &layers[0] {
                assert!(index.graph.neighbors[nb as usize][0].contains(&(node as u32)));
            }
        }
    }
}
