//! Uniform k-NN result shape shared by every backend.

use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::metric::MetricType;

/// Identifier of a stored vector.
pub type Label = i64;

/// Label of an empty result slot.
pub const NO_LABEL: Label = -1;

/// Row-major `nq * k` (distance, label) table, best-first per row.
///
/// Slots beyond the number of available matches hold [`NO_LABEL`] and the metric's worst
/// value (`+inf` for L2, `-inf` for inner product).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub k: usize,
    pub distances: Vec<f32>,
    pub labels: Vec<Label>,
}

impl SearchResult {
    /// A result with every slot empty.
    pub fn empty(nq: usize, k: usize, metric: MetricType) -> Self {
        Self {
            k,
            distances: vec![metric.worst(); nq * k],
            labels: vec![NO_LABEL; nq * k],
        }
    }

    /// Number of query rows.
    pub fn nq(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.labels.len() / self.k
        }
    }

    pub fn row(&self, i: usize) -> (&[f32], &[Label]) {
        let span = i * self.k..(i + 1) * self.k;
        (&self.distances[span.clone()], &self.labels[span])
    }

    /// Rewrite every non-empty label through `f`.
    pub fn map_labels(&mut self, mut f: impl FnMut(Label) -> Label) {
        for label in self.labels.iter_mut().filter(|l| **l != NO_LABEL) {
            *label = f(*label);
        }
    }
}

/// Bounded collector keeping the `k` best (distance, label) pairs.
///
/// Max-heap on `(distance, label)`: the root is the current worst kept entry, so ties on
/// distance resolve to the smaller label.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<(OrderedFloat<f32>, Label)>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    pub fn push(&mut self, distance: f32, label: Label) {
        if self.k == 0 {
            return;
        }
        let entry = (OrderedFloat(distance), label);
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(mut top) = self.heap.peek_mut() {
            if entry < *top {
                *top = entry;
            }
        }
    }

    /// Entries sorted best-first.
    pub fn into_sorted(self) -> Vec<(f32, Label)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|(d, l)| (d.0, l))
            .collect()
    }
}

/// Run `per_query` over each `dimension`-wide row of `queries` in parallel and assemble the
/// best-first hits (ranking distances) into a [`SearchResult`].
pub(crate) fn search_rows<F>(
    queries: &[f32],
    dimension: usize,
    k: usize,
    metric: MetricType,
    per_query: F,
) -> SearchResult
where
    F: Fn(&[f32]) -> Vec<(f32, Label)> + Sync,
{
    let nq = queries.len() / dimension;
    let mut result = SearchResult::empty(nq, k, metric);
    if k == 0 || nq == 0 {
        return result;
    }

    result
        .distances
        .par_chunks_mut(k)
        .zip(result.labels.par_chunks_mut(k))
        .zip(queries.par_chunks(dimension))
        .for_each(|((dist_row, label_row), query)| {
            for (slot, (d, label)) in per_query(query).into_iter().take(k).enumerate() {
                dist_row[slot] = metric.report(d);
                label_row[slot] = label;
            }
        });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topk_keeps_best_and_breaks_ties_by_label() {
        let mut top = TopK::new(3);
        for (d, l) in [(4.0, 2), (1.0, 1), (0.0, 3), (1.0, 0), (9.0, 7)] {
            top.push(d, l);
        }
        assert_eq!(top.into_sorted(), vec![(0.0, 3), (1.0, 0), (1.0, 1)]);
    }

    #[test]
    fn test_topk_zero() {
        let mut top = TopK::new(0);
        top.push(1.0, 1);
        assert!(top.into_sorted().is_empty());
    }

    #[test]
    fn test_search_rows_pads_missing_slots() {
        let queries = [0.0, 0.0, 1.0, 1.0];
        let res = search_rows(&queries, 2, 3, MetricType::InnerProduct, |q| {
            vec![(-q[0], 5)]
        });
        assert_eq!(res.nq(), 2);
        let (d, l) = res.row(1);
        assert_eq!(l, &[5, NO_LABEL, NO_LABEL]);
        assert_eq!(d[0], 1.0);
        assert_eq!(d[1], f32::NEG_INFINITY);
    }

    #[test]
    fn test_search_rows_k_zero() {
        let res = search_rows(&[1.0, 2.0], 2, 0, MetricType::L2, |_| vec![(0.0, 0)]);
        assert!(res.labels.is_empty());
        assert!(res.distances.is_empty());
    }

    #[test]
    fn test_map_labels_skips_sentinels() {
        let mut res = SearchResult {
            k: 2,
            distances: vec![0.0, f32::INFINITY],
            labels: vec![0, NO_LABEL],
        };
        res.map_labels(|l| l + 100);
        assert_eq!(res.labels, vec![100, NO_LABEL]);
    }
}
