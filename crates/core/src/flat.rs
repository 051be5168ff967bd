//! Exact brute-force backend.
//!
//! Vectors are stored uncompressed in one contiguous arena, so the label of an entry is
//! simply its position. Removing entries compacts the arena and renumbers survivors.

use std::collections::HashSet;
use std::ops::{Bound, RangeBounds};

use crate::error::{IndexError, Result};
use crate::index::{check_dimension, check_vectors, IndexKind, VectorIndex};
use crate::metric::MetricType;
use crate::result::{search_rows, Label, SearchResult, TopK};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Exhaustive-scan index over raw f32 codes.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    metric: MetricType,
    codes: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: MetricType) -> Result<Self> {
        check_dimension(dimension)?;
        metric.validate()?;
        Ok(Self {
            dimension,
            metric,
            codes: Vec::new(),
        })
    }

    /// Rebuild from an existing row-major arena.
    pub(crate) fn from_vectors(dimension: usize, metric: MetricType, codes: Vec<f32>) -> Result<Self> {
        let mut index = Self::new(dimension, metric)?;
        check_vectors(dimension, &codes)?;
        index.codes = codes;
        Ok(index)
    }

    /// Append one vector. The caller has checked its length.
    pub(crate) fn push(&mut self, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dimension);
        self.codes.extend_from_slice(vector);
    }

    /// Stored vector at `position`.
    #[inline]
    pub fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.codes[start..start + self.dimension]
    }

    /// The whole row-major arena.
    pub fn vectors(&self) -> &[f32] {
        &self.codes
    }

    /// Ranking distance from `query` to the stored vector at `position`.
    #[inline]
    pub(crate) fn distance_to(&self, query: &[f32], position: usize) -> f32 {
        self.metric.distance(query, self.vector(position))
    }

    /// The `n` nearest positions to `query`, best-first, as (ranking distance, position).
    pub fn nearest(&self, query: &[f32], n: usize) -> Vec<(f32, Label)> {
        let mut top = TopK::new(n);
        for (pos, stored) in self.codes.chunks_exact(self.dimension).enumerate() {
            top.push(self.metric.distance(query, stored), pos as Label);
        }
        top.into_sorted()
    }

    /// Position of the nearest stored vector for each row of `vectors`.
    pub fn assign(&self, vectors: &[f32]) -> Vec<usize> {
        use rayon::prelude::*;
        vectors
            .par_chunks(self.dimension)
            .map(|v| {
                self.nearest(v, 1)
                    .first()
                    .map_or(0, |&(_, pos)| pos as usize)
            })
            .collect()
    }

    /// Copy of the full code region as little-endian bytes.
    pub fn codes(&self) -> Vec<u8> {
        f32s_to_bytes(&self.codes)
    }

    /// Copy out the little-endian code bytes in `range`. Both ends must fall on code
    /// boundaries within `ntotal * code_size`.
    pub fn get_codes_by_range(&self, range: impl RangeBounds<usize>) -> Result<Vec<u8>> {
        let total = self.codes.len() * F32_BYTES;
        let overflow = || IndexError::range(usize::MAX, usize::MAX, "range bound overflows");
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.checked_add(1).ok_or_else(overflow)?,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e.checked_add(1).ok_or_else(overflow)?,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => total,
        };
        self.check_range(start, end)?;
        Ok(f32s_to_bytes(&self.codes[start / F32_BYTES..end / F32_BYTES]))
    }

    /// Overwrite stored codes starting at byte offset `start`. Cannot grow storage.
    pub fn set_codes_by_range(&mut self, bytes: &[u8], start: usize) -> Result<()> {
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| IndexError::range(start, usize::MAX, "offset overflow"))?;
        self.check_range(start, end)?;
        let dst = &mut self.codes[start / F32_BYTES..end / F32_BYTES];
        for (slot, chunk) in dst.iter_mut().zip(bytes.chunks_exact(F32_BYTES)) {
            *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    fn check_range(&self, start: usize, end: usize) -> Result<()> {
        let code_size = self.code_size();
        let total = self.codes.len() * F32_BYTES;
        if start > end {
            return Err(IndexError::range(start, end, "start is past end"));
        }
        if end > total {
            return Err(IndexError::range(
                start,
                end,
                format!("exceeds stored code bytes ({total})"),
            ));
        }
        if start % code_size != 0 || end % code_size != 0 {
            return Err(IndexError::range(
                start,
                end,
                format!("not aligned to code size {code_size}"),
            ));
        }
        Ok(())
    }

    pub fn merge_from(&mut self, other: &FlatIndex) -> Result<()> {
        if other.dimension != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: other.dimension,
            });
        }
        self.codes.extend_from_slice(&other.codes);
        Ok(())
    }

    /// Positions in `0..ntotal` named by `labels`.
    pub(crate) fn positions_of(&self, labels: &[Label]) -> HashSet<usize> {
        let n = self.ntotal();
        labels
            .iter()
            .filter(|&&l| l >= 0 && (l as usize) < n)
            .map(|&l| l as usize)
            .collect()
    }

    /// Drop the given positions, shifting later vectors down in order.
    pub(crate) fn remove_positions(&mut self, doomed: &HashSet<usize>) -> usize {
        if doomed.is_empty() {
            return 0;
        }
        let d = self.dimension;
        let mut write = 0;
        for read in 0..self.ntotal() {
            if doomed.contains(&read) {
                continue;
            }
            if write != read {
                self.codes.copy_within(read * d..(read + 1) * d, write * d);
            }
            write += 1;
        }
        let removed = self.ntotal() - write;
        self.codes.truncate(write * d);
        removed
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> MetricType {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.codes.len() / self.dimension
    }

    fn add(&mut self, vectors: &[f32]) -> Result<()> {
        check_vectors(self.dimension, vectors)?;
        self.codes.extend_from_slice(vectors);
        Ok(())
    }

    fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        check_vectors(self.dimension, queries)?;
        Ok(search_rows(queries, self.dimension, k, self.metric, |q| {
            self.nearest(q, k)
        }))
    }

    fn reconstruct(&self, label: Label) -> Result<Vec<f32>> {
        if label < 0 || label as usize >= self.ntotal() {
            return Err(IndexError::NotFound(format!("label {label}")));
        }
        Ok(self.vector(label as usize).to_vec())
    }

    fn remove_ids(&mut self, labels: &[Label]) -> Result<usize> {
        let doomed = self.positions_of(labels);
        Ok(self.remove_positions(&doomed))
    }

    fn reset(&mut self) {
        self.codes.clear();
    }

    fn ids(&self) -> Vec<Label> {
        (0..self.ntotal() as Label).collect()
    }
}

pub(crate) fn f32s_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * F32_BYTES);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_points() -> FlatIndex {
        let mut index = FlatIndex::new(2, MetricType::L2).unwrap();
        index
            .add(&[1.0, 0.0, 1.0, 2.0, 1.0, 3.0, 1.0, 1.0])
            .unwrap();
        index
    }

    #[test]
    fn test_search_orders_by_distance_then_label() {
        let index = four_points();
        let res = index.search(&[1.0, 1.0], 4).unwrap();
        assert_eq!(res.distances, vec![0.0, 1.0, 1.0, 4.0]);
        assert_eq!(res.labels, vec![3, 0, 1, 2]);
    }

    #[test]
    fn test_remove_renumbers_survivors() {
        let mut index = four_points();
        assert_eq!(index.remove_ids(&[0, 1]).unwrap(), 2);
        assert_eq!(index.ntotal(), 2);
        let res = index.search(&[1.0, 3.0], 1).unwrap();
        assert_eq!(res.labels, vec![0]);
        assert_eq!(res.distances, vec![0.0]);
        let res = index.search(&[1.0, 1.0], 1).unwrap();
        assert_eq!(res.labels, vec![1]);
    }

    #[test]
    fn test_remove_ignores_unknown_and_duplicate_labels() {
        let mut index = four_points();
        assert_eq!(index.remove_ids(&[2, 2, 9, -1]).unwrap(), 1);
        assert_eq!(index.ntotal(), 3);
    }

    #[test]
    fn test_search_pads_when_k_exceeds_total() {
        let index = four_points();
        let res = index.search(&[1.0, 1.0], 6).unwrap();
        assert_eq!(&res.labels[4..], &[-1, -1]);
        assert_eq!(res.distances[5], f32::INFINITY);
    }

    #[test]
    fn test_inner_product_descending() {
        let mut index = FlatIndex::new(2, MetricType::InnerProduct).unwrap();
        index.add(&[1.0, 0.0, 2.0, 0.0, 0.5, 0.0]).unwrap();
        let res = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(res.labels, vec![1, 0, 2]);
        assert_eq!(res.distances, vec![2.0, 1.0, 0.5]);
    }

    #[test]
    fn test_add_rejects_ragged_buffer() {
        let mut index = four_points();
        assert!(matches!(index.add(&[1.0, 2.0, 3.0]), Err(IndexError::Argument(_))));
        assert_eq!(index.ntotal(), 4);
    }

    #[test]
    fn test_code_size_and_codes() {
        let index = four_points();
        assert_eq!(index.code_size(), 8);
        let codes = index.codes();
        assert_eq!(codes.len(), 32);
        assert_eq!(&codes[0..4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_codes_by_range() {
        let mut index = four_points();
        let bytes = index.get_codes_by_range(8..16).unwrap();
        assert_eq!(bytes, f32s_to_bytes(&[1.0, 2.0]));
        assert_eq!(index.get_codes_by_range(..).unwrap().len(), 32);

        index.set_codes_by_range(&f32s_to_bytes(&[5.0, 5.0]), 0).unwrap();
        assert_eq!(index.reconstruct(0).unwrap(), vec![5.0, 5.0]);
    }

    #[test]
    fn test_codes_by_range_rejects_bad_offsets() {
        let mut index = four_points();
        assert!(matches!(
            index.get_codes_by_range(3..8),
            Err(IndexError::Range { .. })
        ));
        assert!(matches!(
            index.get_codes_by_range(0..40),
            Err(IndexError::Range { .. })
        ));
        assert!(matches!(
            index.set_codes_by_range(&[0u8; 16], 24),
            Err(IndexError::Range { .. })
        ));
        assert!(matches!(
            index.set_codes_by_range(&[0u8; 4], 0),
            Err(IndexError::Range { .. })
        ));
    }

    #[test]
    fn test_codes_by_range_extreme_bounds() {
        let index = four_points();
        assert!(matches!(
            index.get_codes_by_range(..=usize::MAX),
            Err(IndexError::Range { .. })
        ));
        assert!(matches!(
            index.get_codes_by_range((Bound::Excluded(usize::MAX), Bound::Unbounded)),
            Err(IndexError::Range { .. })
        ));
        assert_eq!(index.get_codes_by_range(8..=15).unwrap(), f32s_to_bytes(&[1.0, 2.0]));
    }

    #[test]
    fn test_reconstruct_missing() {
        let index = four_points();
        assert!(matches!(index.reconstruct(4), Err(IndexError::NotFound(_))));
        assert!(matches!(index.reconstruct(-1), Err(IndexError::NotFound(_))));
    }

    #[test]
    fn test_reset_keeps_shape() {
        let mut index = four_points();
        index.reset();
        assert_eq!(index.ntotal(), 0);
        assert_eq!(index.dimension(), 2);
        index.add(&[0.0, 0.0]).unwrap();
        assert_eq!(index.ids(), vec![0]);
    }
}
