//! Inverted-file (IVF) backend.
//!
//! A [`FlatIndex`] of `nlist` centroids partitions the space. Each stored vector lives in
//! the posting list of its nearest centroid together with its label, and a query scans
//! only the `nprobe` lists whose centroids are closest to it.

/// Posting-list storage, resident or memory-mapped.
pub mod invlists;
/// k-means training of the coarse quantizer.
pub mod kmeans;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{IndexError, Result};
use crate::flat::FlatIndex;
use crate::index::{check_labels, check_vectors, IndexKind, VectorIndex};
use crate::metric::MetricType;
use crate::result::{search_rows, Label, SearchResult, TopK};

pub use invlists::{InvertedList, InvertedLists, MappedList, MappedLists};

/// Per-index IVF tunables. Persisted with the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfConfig {
    pub nlist: usize,
    /// Lists probed per query, kept within `1..=nlist`.
    pub nprobe: usize,
}

impl IvfConfig {
    pub fn new(nlist: usize) -> Self {
        Self {
            nlist,
            nprobe: config::IVF_DEFAULT_NPROBE.min(nlist.max(1)),
        }
    }
}

#[derive(Debug)]
pub struct IvfIndex {
    config: IvfConfig,
    quantizer: FlatIndex,
    is_trained: bool,
    lists: InvertedLists,
    /// Sequence given to the next inserted entry.
    next_seq: u64,
    /// label -> (seq, list, offset) of the newest entry with that label. Kept for resident
    /// lists only; mapped lists are scanned.
    direct_map: HashMap<Label, (u64, usize, usize)>,
}

/// Record an entry in the direct map unless a newer entry holds the label.
fn note_entry(
    direct_map: &mut HashMap<Label, (u64, usize, usize)>,
    label: Label,
    seq: u64,
    list: usize,
    offset: usize,
) {
    let slot = direct_map.entry(label).or_insert((seq, list, offset));
    if seq >= slot.0 {
        *slot = (seq, list, offset);
    }
}

impl IvfIndex {
    /// Wrap `quantizer` (a flat index of the same dimension and metric). If it already holds
    /// exactly `nlist` centroids the index starts trained; otherwise its contents are
    /// replaced by [`train`](VectorIndex::train).
    pub fn new(quantizer: FlatIndex, nlist: usize) -> Result<Self> {
        if nlist == 0 {
            return Err(IndexError::argument("IVF nlist must be at least 1"));
        }
        let is_trained = quantizer.ntotal() == nlist;
        Ok(Self {
            config: IvfConfig::new(nlist),
            quantizer,
            is_trained,
            lists: InvertedLists::resident(nlist),
            next_seq: 0,
            direct_map: HashMap::new(),
        })
    }

    /// Build with a fresh quantizer.
    pub fn with_dimension(dimension: usize, nlist: usize, metric: MetricType) -> Result<Self> {
        Self::new(FlatIndex::new(dimension, metric)?, nlist)
    }

    /// Like [`new`](Self::new) but checks the caller-supplied shape against the quantizer.
    pub fn with_quantizer(
        quantizer: FlatIndex,
        dimension: usize,
        nlist: usize,
        metric: MetricType,
    ) -> Result<Self> {
        if quantizer.dimension() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: quantizer.dimension(),
            });
        }
        if quantizer.metric() != metric {
            return Err(IndexError::argument(format!(
                "quantizer metric {} does not match index metric {metric}",
                quantizer.metric()
            )));
        }
        Self::new(quantizer, nlist)
    }

    pub(crate) fn from_parts(
        config: IvfConfig,
        quantizer: FlatIndex,
        is_trained: bool,
        lists: InvertedLists,
        next_seq: u64,
    ) -> Result<Self> {
        if config.nlist == 0 || lists.nlist() != config.nlist {
            return Err(IndexError::corrupt(format!(
                "IVF header declares {} lists but {} are stored",
                config.nlist,
                lists.nlist()
            )));
        }
        if is_trained && quantizer.ntotal() != config.nlist {
            return Err(IndexError::corrupt("IVF quantizer does not hold nlist centroids"));
        }
        if let InvertedLists::Resident(resident) = &lists {
            let d = quantizer.dimension();
            for list in resident {
                if list.seqs.len() != list.len() || list.codes.len() != list.len() * d {
                    return Err(IndexError::corrupt("IVF list sections have different lengths"));
                }
                if list.seqs.iter().any(|&seq| seq >= next_seq) {
                    return Err(IndexError::corrupt("IVF insertion sequence out of range"));
                }
            }
        }
        let mut index = Self {
            config,
            quantizer,
            is_trained,
            lists,
            next_seq,
            direct_map: HashMap::new(),
        };
        index.config.nprobe = index.config.nprobe.clamp(1, index.config.nlist);
        index.rebuild_direct_map();
        Ok(index)
    }

    pub fn config(&self) -> IvfConfig {
        self.config
    }

    pub fn nlist(&self) -> usize {
        self.config.nlist
    }

    pub fn nprobe(&self) -> usize {
        self.config.nprobe
    }

    /// Set the number of probed lists, clamped to `1..=nlist`.
    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.config.nprobe = nprobe.clamp(1, self.config.nlist);
    }

    pub fn quantizer(&self) -> &FlatIndex {
        &self.quantizer
    }

    pub fn lists(&self) -> &InvertedLists {
        &self.lists
    }

    /// One past the largest insertion sequence handed out so far.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Posting count of every list.
    pub fn list_sizes(&self) -> Vec<usize> {
        (0..self.nlist()).map(|l| self.lists.list_len(l)).collect()
    }

    fn rebuild_direct_map(&mut self) {
        self.direct_map.clear();
        let InvertedLists::Resident(lists) = &self.lists else {
            return;
        };
        for (l, list) in lists.iter().enumerate() {
            for (offset, (&label, &seq)) in list.labels.iter().zip(&list.seqs).enumerate() {
                note_entry(&mut self.direct_map, label, seq, l, offset);
            }
        }
    }

    /// Resident lists with an up-to-date direct map.
    fn materialize(&mut self) -> &mut Vec<InvertedList> {
        if self.lists.is_mapped() {
            self.lists.make_resident();
            self.rebuild_direct_map();
        }
        self.lists.make_resident()
    }

    /// (list, offset) of the newest entry labelled `label`.
    fn locate(&self, label: Label) -> Option<(usize, usize)> {
        if !self.lists.is_mapped() {
            return self.direct_map.get(&label).map(|&(_, list, offset)| (list, offset));
        }
        let mut best: Option<(u64, usize, usize)> = None;
        for l in 0..self.nlist() {
            let labels = self.lists.labels(l);
            let seqs = self.lists.seqs(l);
            for (offset, (&stored, &seq)) in labels.iter().zip(seqs.iter()).enumerate() {
                if stored == label && best.map_or(true, |(newest, _, _)| seq >= newest) {
                    best = Some((seq, l, offset));
                }
            }
        }
        best.map(|(_, list, offset)| (list, offset))
    }

    /// Validated insert of already-shaped rows under `labels`, with one sequence per row.
    fn insert(&mut self, vectors: &[f32], labels: &[Label], seqs: &[u64]) {
        let d = self.dimension();
        let assignment = self.quantizer.assign(vectors);
        self.materialize();
        let lists = self.lists.make_resident();
        let rows = vectors.chunks_exact(d).zip(labels).zip(seqs).zip(assignment);
        for (((row, &label), &seq), list) in rows {
            let posting = &mut lists[list];
            note_entry(&mut self.direct_map, label, seq, list, posting.len());
            posting.labels.push(label);
            posting.seqs.push(seq);
            posting.codes.extend_from_slice(row);
        }
    }

    /// Insert new rows, numbering them after every existing entry.
    fn insert_new(&mut self, vectors: &[f32], labels: &[Label]) {
        let start = self.next_seq;
        self.next_seq = start.saturating_add(labels.len() as u64);
        let seqs: Vec<u64> = (start..self.next_seq).collect();
        self.insert(vectors, labels, &seqs);
    }

    /// Append `other`'s postings list by list, keeping its labels. `other`'s entries count
    /// as newer than every entry already here.
    pub fn merge_from(&mut self, other: &IvfIndex) -> Result<()> {
        if other.dimension() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: other.dimension(),
            });
        }
        if other.nlist() != self.nlist() {
            return Err(IndexError::argument(format!(
                "cannot merge IVF indexes with nlist {} and {}",
                self.nlist(),
                other.nlist()
            )));
        }
        if other.metric() != self.metric() {
            return Err(IndexError::argument("cannot merge IVF indexes with different metrics"));
        }
        if !self.is_trained && other.ntotal() > 0 {
            return Err(IndexError::NotTrained);
        }
        let base = self.next_seq;
        self.materialize();
        let lists = self.lists.make_resident();
        for (l, posting) in lists.iter_mut().enumerate() {
            let start = posting.len();
            let labels = other.lists.labels(l);
            let seqs = other.lists.seqs(l);
            posting.labels.extend_from_slice(&labels);
            posting.seqs.extend(seqs.iter().map(|&seq| base.saturating_add(seq)));
            posting.codes.extend_from_slice(&other.lists.codes(l));
            for (i, (&label, &seq)) in labels.iter().zip(seqs.iter()).enumerate() {
                note_entry(&mut self.direct_map, label, base.saturating_add(seq), l, start + i);
            }
        }
        self.next_seq = base.saturating_add(other.next_seq);
        Ok(())
    }
}

impl VectorIndex for IvfIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Ivf
    }

    fn dimension(&self) -> usize {
        self.quantizer.dimension()
    }

    fn metric(&self) -> MetricType {
        self.quantizer.metric()
    }

    fn is_trained(&self) -> bool {
        self.is_trained
    }

    fn ntotal(&self) -> usize {
        self.lists.total()
    }

    /// Fit `nlist` centroids with k-means. Existing postings are re-bucketed under the new
    /// centroids and keep their insertion sequences.
    fn train(&mut self, vectors: &[f32]) -> Result<()> {
        let d = self.dimension();
        let n = check_vectors(d, vectors)?;
        let nlist = self.nlist();
        if n < nlist {
            return Err(IndexError::argument(format!(
                "IVF training needs at least nlist = {nlist} vectors, got {n}"
            )));
        }

        let centroids = kmeans::kmeans(vectors, d, nlist, self.metric());
        let mut quantizer = FlatIndex::new(d, self.metric())?;
        quantizer.add(&centroids)?;
        self.quantizer = quantizer;
        self.is_trained = true;
        tracing::info!(nlist, samples = n, "trained IVF quantizer");

        if self.ntotal() > 0 {
            let old = std::mem::replace(&mut self.lists, InvertedLists::resident(nlist));
            self.direct_map.clear();
            for l in 0..old.nlist() {
                self.insert(&old.codes(l), &old.labels(l), &old.seqs(l));
            }
        }
        Ok(())
    }

    fn add(&mut self, vectors: &[f32]) -> Result<()> {
        let n = check_vectors(self.dimension(), vectors)?;
        if !self.is_trained {
            return Err(IndexError::NotTrained);
        }
        let start = self.ntotal() as Label;
        let labels: Vec<Label> = (start..start + n as Label).collect();
        self.insert_new(vectors, &labels);
        Ok(())
    }

    fn add_with_ids(&mut self, vectors: &[f32], labels: &[Label]) -> Result<()> {
        let n = check_vectors(self.dimension(), vectors)?;
        check_labels(n, labels)?;
        if !self.is_trained {
            return Err(IndexError::NotTrained);
        }
        self.insert_new(vectors, labels);
        Ok(())
    }

    fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        check_vectors(self.dimension(), queries)?;
        if !self.is_trained {
            return Err(IndexError::NotTrained);
        }
        let nprobe = self.config.nprobe.clamp(1, self.nlist());
        let d = self.dimension();
        let metric = self.metric();
        Ok(search_rows(queries, d, k, metric, |q| {
            let mut top = TopK::new(k);
            for (_, list) in self.quantizer.nearest(q, nprobe) {
                let list = list as usize;
                let codes = self.lists.codes(list);
                let labels = self.lists.labels(list);
                for (row, &label) in codes.chunks_exact(d).zip(labels.iter()) {
                    top.push(metric.distance(q, row), label);
                }
            }
            top.into_sorted()
        }))
    }

    /// The newest entry wins for duplicated labels.
    fn reconstruct(&self, label: Label) -> Result<Vec<f32>> {
        let (list, offset) = self
            .locate(label)
            .ok_or_else(|| IndexError::NotFound(format!("label {label}")))?;
        Ok(self.lists.vector(list, offset, self.dimension()))
    }

    fn remove_ids(&mut self, labels: &[Label]) -> Result<usize> {
        let doomed: HashSet<Label> = labels.iter().copied().collect();
        let hits: usize = (0..self.nlist())
            .map(|l| {
                self.lists
                    .labels(l)
                    .iter()
                    .filter(|&&label| doomed.contains(&label))
                    .count()
            })
            .sum();
        if hits == 0 {
            return Ok(0);
        }

        let d = self.dimension();
        for posting in self.materialize().iter_mut() {
            let mut write = 0;
            for read in 0..posting.labels.len() {
                if doomed.contains(&posting.labels[read]) {
                    continue;
                }
                if write != read {
                    posting.labels[write] = posting.labels[read];
                    posting.seqs[write] = posting.seqs[read];
                    posting.codes.copy_within(read * d..(read + 1) * d, write * d);
                }
                write += 1;
            }
            posting.labels.truncate(write);
            posting.seqs.truncate(write);
            posting.codes.truncate(write * d);
        }
        self.rebuild_direct_map();
        Ok(hits)
    }

    fn reset(&mut self) {
        self.lists = InvertedLists::resident(self.nlist());
        self.next_seq = 0;
        self.direct_map.clear();
    }

    fn ids(&self) -> Vec<Label> {
        (0..self.nlist())
            .flat_map(|l| self.lists.labels(l).into_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn trained(nlist: usize) -> IvfIndex {
        let mut index = IvfIndex::with_dimension(4, nlist, MetricType::L2).unwrap();
        index.train(&random_vectors(200, 4, 1)).unwrap();
        index
    }

    #[test]
    fn test_untrained_rejects_add_and_search() {
        let mut index = IvfIndex::with_dimension(4, 4, MetricType::L2).unwrap();
        assert!(!index.is_trained());
        assert!(matches!(index.add(&[0.0; 4]), Err(IndexError::NotTrained)));
        assert!(matches!(index.search(&[0.0; 4], 1), Err(IndexError::NotTrained)));
    }

    #[test]
    fn test_train_needs_nlist_vectors() {
        let mut index = IvfIndex::with_dimension(2, 8, MetricType::L2).unwrap();
        assert!(matches!(
            index.train(&[0.0; 14]),
            Err(IndexError::Argument(_))
        ));
        assert!(!index.is_trained());
    }

    #[test]
    fn test_prefilled_quantizer_starts_trained() {
        let mut quantizer = FlatIndex::new(2, MetricType::L2).unwrap();
        quantizer.add(&[0.0, 0.0, 10.0, 10.0]).unwrap();
        let mut index = IvfIndex::new(quantizer, 2).unwrap();
        assert!(index.is_trained());
        index.add(&[0.1, 0.0, 9.0, 9.5, 10.0, 10.0]).unwrap();
        assert_eq!(index.list_sizes(), vec![1, 2]);
        assert_eq!(index.ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_full_probe_matches_flat() {
        let data = random_vectors(300, 4, 2);
        let queries = random_vectors(10, 4, 3);
        let mut ivf = trained(8);
        ivf.add(&data).unwrap();
        ivf.set_nprobe(8);
        let mut flat = FlatIndex::new(4, MetricType::L2).unwrap();
        flat.add(&data).unwrap();

        let a = ivf.search(&queries, 5).unwrap();
        let b = flat.search(&queries, 5).unwrap();
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_nprobe_clamped() {
        let mut index = trained(4);
        assert_eq!(index.nprobe(), 1);
        index.set_nprobe(0);
        assert_eq!(index.nprobe(), 1);
        index.set_nprobe(99);
        assert_eq!(index.nprobe(), 4);
    }

    #[test]
    fn test_add_with_ids_and_reconstruct_duplicates() {
        let mut index = trained(4);
        index
            .add_with_ids(&[0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.2], &[7, 7])
            .unwrap();
        assert_eq!(index.reconstruct(7).unwrap(), vec![0.2; 4]);
        assert!(matches!(index.reconstruct(8), Err(IndexError::NotFound(_))));
    }

    /// Two fixed centroids, label 7 stored first near the second and then near the first.
    fn duplicated_seven() -> IvfIndex {
        let mut quantizer = FlatIndex::new(2, MetricType::L2).unwrap();
        quantizer.add(&[0.0, 0.0, 10.0, 10.0]).unwrap();
        let mut index = IvfIndex::new(quantizer, 2).unwrap();
        index.add_with_ids(&[10.0, 10.0], &[7]).unwrap();
        index.add_with_ids(&[0.0, 0.0, 9.0, 9.0], &[7, 8]).unwrap();
        index
    }

    #[test]
    fn test_newest_duplicate_survives_remove_and_retrain() {
        let mut index = duplicated_seven();
        assert_eq!(index.next_seq(), 3);
        assert_eq!(index.reconstruct(7).unwrap(), vec![0.0, 0.0]);

        assert_eq!(index.remove_ids(&[8]).unwrap(), 1);
        assert_eq!(index.reconstruct(7).unwrap(), vec![0.0, 0.0]);

        index.train(&[10.0, 10.0, 11.0, 11.0, 0.0, 0.0, 1.0, 1.0]).unwrap();
        assert_eq!(index.ntotal(), 2);
        assert_eq!(index.reconstruct(7).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_merged_entries_are_newer() {
        let mut older = duplicated_seven();
        let mut newer = IvfIndex::new(older.quantizer().clone(), 2).unwrap();
        newer.add_with_ids(&[10.0, 9.0], &[7]).unwrap();
        older.merge_from(&newer).unwrap();
        assert_eq!(older.reconstruct(7).unwrap(), vec![10.0, 9.0]);
        assert_eq!(older.next_seq(), 4);
        assert_eq!(older.remove_ids(&[8]).unwrap(), 1);
        assert_eq!(older.reconstruct(7).unwrap(), vec![10.0, 9.0]);
    }

    #[test]
    fn test_from_parts_rejects_sequence_past_counter() {
        let index = duplicated_seven();
        let lists = match &index.lists {
            InvertedLists::Resident(lists) => lists.clone(),
            InvertedLists::Mapped(_) => unreachable!(),
        };
        let rebuilt = IvfIndex::from_parts(
            index.config(),
            index.quantizer().clone(),
            true,
            InvertedLists::Resident(lists.clone()),
            3,
        )
        .unwrap();
        assert_eq!(rebuilt.reconstruct(7).unwrap(), vec![0.0, 0.0]);

        let err = IvfIndex::from_parts(
            index.config(),
            index.quantizer().clone(),
            true,
            InvertedLists::Resident(lists),
            2,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_remove_all_duplicates() {
        let mut index = trained(4);
        let data = random_vectors(6, 4, 5);
        index.add_with_ids(&data, &[1, 2, 1, 3, 1, 4]).unwrap();
        assert_eq!(index.remove_ids(&[1, 99]).unwrap(), 3);
        assert_eq!(index.ntotal(), 3);
        let mut ids = index.ids();
        ids.sort();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(index.reconstruct(4).unwrap(), data[20..24].to_vec());
    }

    #[test]
    fn test_retrain_rebuckets_existing_entries() {
        let mut index = trained(4);
        let data = random_vectors(50, 4, 8);
        index.add(&data).unwrap();
        index.train(&random_vectors(100, 4, 9)).unwrap();
        assert_eq!(index.ntotal(), 50);
        assert_eq!(index.reconstruct(10).unwrap(), data[40..44].to_vec());
    }

    #[test]
    fn test_merge_keeps_labels() {
        let mut a = trained(4);
        let mut b = IvfIndex::new(a.quantizer().clone(), 4).unwrap();
        a.add(&random_vectors(5, 4, 10)).unwrap();
        b.add(&random_vectors(3, 4, 11)).unwrap();
        a.merge_from(&b).unwrap();
        assert_eq!(a.ntotal(), 8);
        let mut ids = a.ids();
        ids.sort();
        assert_eq!(ids, vec![0, 0, 1, 1, 2, 2, 3, 4]);
        assert_eq!(b.ntotal(), 3);
    }

    #[test]
    fn test_merge_rejects_nlist_mismatch() {
        let mut a = trained(4);
        let b = trained(8);
        assert!(matches!(a.merge_from(&b), Err(IndexError::Argument(_))));
    }

    #[test]
    fn test_reset_keeps_training() {
        let mut index = trained(4);
        index.add(&random_vectors(10, 4, 12)).unwrap();
        index.reset();
        assert_eq!(index.ntotal(), 0);
        assert!(index.is_trained());
    }
}
