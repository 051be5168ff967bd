//! HNSW search: single-layer beam search and multi-layer k-NN.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;

thread_local! {
    /// Per-thread visited set reused across queries.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::with_capacity(0));
}

/// Frontier entry, popped nearest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.distance, other.id).cmp(&(self.distance, self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Beam search on one layer.
///
/// Returns up to `ef` nodes nearest to `query`, sorted by (distance, id). `visited` is
/// reset at the start of each call.
pub fn search_layer(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.reset();
    let mut frontier: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    // Max-heap on (distance, id): the root is the worst kept result.
    let mut results: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::with_capacity(ef + 1);
    let mut worst = f32::INFINITY;

    for &ep in entry_points {
        if !visited.mark(ep) {
            continue;
        }
        let d = index.distance(query, ep);
        frontier.push(Candidate {
            distance: OrderedFloat(d),
            id: ep,
        });
        results.push((OrderedFloat(d), ep));
        if results.len() > ef {
            results.pop();
        }
        if results.len() >= ef {
            worst = results.peek().map_or(f32::INFINITY, |r| r.0 .0);
        }
    }

    while let Some(candidate) = frontier.pop() {
        if results.len() >= ef && candidate.distance.0 > worst {
            break;
        }

        let Some(links) = index.graph.neighbors[candidate.id as usize].get(layer) else {
            continue;
        };
        for &nb in links {
            if !visited.mark(nb) {
                continue;
            }
            let d = index.distance(query, nb);
            if results.len() < ef || d < worst {
                frontier.push(Candidate {
                    distance: OrderedFloat(d),
                    id: nb,
                });
                results.push((OrderedFloat(d), nb));
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    worst = results.peek().map_or(f32::INFINITY, |r| r.0 .0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|(d, id)| (d.0, id))
        .collect()
}

/// Multi-layer k-NN: greedy descent with a frontier of 1 through the upper layers, then a
/// `max(ef_search, k)` beam on layer 0. Returns at most `k` (distance, id) pairs best-first.
pub fn knn_search(index: &HnswIndex, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    let Some(entry_point) = index.graph.entry_point else {
        return Vec::new();
    };
    if k == 0 {
        return Vec::new();
    }

    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.grow_to(index.graph.levels.len());

        let mut current = entry_point;
        for layer in (1..=index.graph.max_level).rev() {
            let nearest = search_layer(
                index,
                query,
                std::slice::from_ref(&current),
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, id)) = nearest.first() {
                current = id;
            }
        }

        let ef = index.config.ef_search.max(k);
        let mut results = search_layer(
            index,
            query,
            std::slice::from_ref(&current),
            ef,
            0,
            &mut visited,
        );
        results.truncate(k);
        results
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;
    use crate::metric::MetricType;

    fn line_index(n: usize) -> HnswIndex {
        let mut index = HnswIndex::new(1, 4, MetricType::L2).unwrap();
        let data: Vec<f32> = (0..n).map(|i| i as f32).collect();
        index.add(&data).unwrap();
        index
    }

    #[test]
    fn test_candidate_pops_nearest_first() {
        let mut heap = BinaryHeap::new();
        for (d, id) in [(3.0, 1), (1.0, 5), (1.0, 2), (2.0, 0)] {
            heap.push(Candidate {
                distance: OrderedFloat(d),
                id,
            });
        }
        let order: Vec<u32> = std::iter::from_fn(|| heap.pop().map(|c| c.id)).collect();
        assert_eq!(order, vec![2, 5, 0, 1]);
    }

    #[test]
    fn test_knn_on_line() {
        let index = line_index(100);
        let hits = knn_search(&index, &[42.2], 3);
        let ids: Vec<u32> = hits.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![42, 43, 41]);
    }

    #[test]
    fn test_knn_empty_and_zero_k() {
        let index = HnswIndex::new(1, 4, MetricType::L2).unwrap();
        assert!(knn_search(&index, &[0.0], 3).is_empty());
        let index = line_index(5);
        assert!(knn_search(&index, &[0.0], 0).is_empty());
    }

    #[test]
    fn test_search_layer_sorted() {
        let index = line_index(50);
        let mut visited = VisitedSet::with_capacity(50);
        let hits = search_layer(&index, &[10.0], &[0], 50, 0, &mut visited);
        assert!(hits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(hits[0], (0.0, 10));
    }
}
