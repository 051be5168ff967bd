//! Caller-chosen labels on top of any backend.
//!
//! Over positional backends (Flat, HNSW) the wrapper keeps a label table parallel to
//! storage and translates positions on the way out. IVF already stores labels in its
//! posting lists, so the wrapper passes them straight through.

use std::collections::HashSet;

use crate::error::{IndexError, Result};
use crate::index::{check_labels, check_same_shape, check_vectors, AnyIndex, IndexKind, VectorIndex};
use crate::metric::MetricType;
use crate::result::{Label, SearchResult, NO_LABEL};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Labels {
    /// `table[position]` is the caller label of the entry stored at `position`.
    Table(Vec<Label>),
    /// The inner index stores caller labels itself.
    Native,
}

#[derive(Debug)]
pub struct IdMap {
    inner: AnyIndex,
    labels: Labels,
}

impl IdMap {
    /// Wrap an empty index.
    pub fn new(inner: AnyIndex) -> Result<Self> {
        if inner.ntotal() != 0 {
            return Err(IndexError::argument(format!(
                "only an empty index can be wrapped, this one holds {} vectors",
                inner.ntotal()
            )));
        }
        if inner.kind() == IndexKind::IdMap {
            return Err(IndexError::argument("index already maps caller labels"));
        }
        let labels = match inner {
            AnyIndex::Ivf(_) => Labels::Native,
            _ => Labels::Table(Vec::new()),
        };
        Ok(Self { inner, labels })
    }

    /// Reassemble a persisted wrapper. `table` is ignored for IVF inner indexes.
    pub(crate) fn from_parts(inner: AnyIndex, table: Vec<Label>) -> Result<Self> {
        let labels = match inner {
            AnyIndex::Ivf(_) => Labels::Native,
            AnyIndex::IdMap(_) => return Err(IndexError::corrupt("nested label map")),
            _ => {
                if table.len() != inner.ntotal() {
                    return Err(IndexError::corrupt(format!(
                        "label table has {} entries for {} vectors",
                        table.len(),
                        inner.ntotal()
                    )));
                }
                Labels::Table(table)
            }
        };
        Ok(Self { inner, labels })
    }

    pub fn inner(&self) -> &AnyIndex {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut AnyIndex {
        &mut self.inner
    }

    /// Persisted label table: empty when the inner index stores labels itself.
    pub(crate) fn label_table(&self) -> &[Label] {
        match &self.labels {
            Labels::Table(table) => table,
            Labels::Native => &[],
        }
    }

    /// Append `other`'s (label, vector) entries.
    pub fn merge_from(&mut self, other: &IdMap) -> Result<()> {
        check_same_shape(&self.inner, &other.inner)?;
        let incoming = other.ids();
        self.inner.merge_from(&other.inner)?;
        if let Labels::Table(table) = &mut self.labels {
            table.extend(incoming);
        }
        Ok(())
    }
}

impl VectorIndex for IdMap {
    fn kind(&self) -> IndexKind {
        IndexKind::IdMap
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn metric(&self) -> MetricType {
        self.inner.metric()
    }

    fn metric_arg(&self) -> f32 {
        self.inner.metric_arg()
    }

    fn is_trained(&self) -> bool {
        self.inner.is_trained()
    }

    fn ntotal(&self) -> usize {
        self.inner.ntotal()
    }

    fn code_size(&self) -> usize {
        self.inner.code_size()
    }

    fn train(&mut self, vectors: &[f32]) -> Result<()> {
        self.inner.train(vectors)
    }

    fn add(&mut self, _vectors: &[f32]) -> Result<()> {
        Err(IndexError::unsupported("IDMap", "add without labels"))
    }

    fn add_with_ids(&mut self, vectors: &[f32], labels: &[Label]) -> Result<()> {
        let n = check_vectors(self.dimension(), vectors)?;
        check_labels(n, labels)?;
        match &mut self.labels {
            Labels::Native => self.inner.add_with_ids(vectors, labels),
            Labels::Table(table) => {
                self.inner.add(vectors)?;
                table.extend_from_slice(labels);
                Ok(())
            }
        }
    }

    /// Rows are ordered by (distance, caller label) whatever the inner backend. Over a
    /// label table the inner search is widened until the entries tied with the k-th hit
    /// are all in view, so the cut at `k` is made on caller labels.
    fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        let Labels::Table(table) = &self.labels else {
            return self.inner.search(queries, k);
        };
        let ntotal = self.inner.ntotal();
        if k == 0 || ntotal == 0 {
            return self.inner.search(queries, k);
        }

        let mut fetch = (k + 1).min(ntotal);
        loop {
            let wide = self.inner.search(queries, fetch)?;
            if fetch >= ntotal || boundary_settled(&wide, k) {
                return Ok(relabel_rows(&wide, table, k, self.metric()));
            }
            fetch = fetch.saturating_mul(2).min(ntotal);
        }
    }

    /// The most recently inserted entry wins for duplicated labels.
    fn reconstruct(&self, label: Label) -> Result<Vec<f32>> {
        match &self.labels {
            Labels::Native => self.inner.reconstruct(label),
            Labels::Table(table) => {
                let position = table
                    .iter()
                    .rposition(|&l| l == label)
                    .ok_or_else(|| IndexError::NotFound(format!("label {label}")))?;
                self.inner.reconstruct(position as Label)
            }
        }
    }

    fn remove_ids(&mut self, labels: &[Label]) -> Result<usize> {
        match &mut self.labels {
            Labels::Native => self.inner.remove_ids(labels),
            Labels::Table(table) => {
                let doomed: HashSet<Label> = labels.iter().copied().collect();
                let positions: Vec<Label> = table
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| doomed.contains(l))
                    .map(|(p, _)| p as Label)
                    .collect();
                if positions.is_empty() {
                    return Ok(0);
                }
                let removed = self.inner.remove_ids(&positions)?;
                table.retain(|l| !doomed.contains(l));
                Ok(removed)
            }
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
        if let Labels::Table(table) = &mut self.labels {
            table.clear();
        }
    }

    fn ids(&self) -> Vec<Label> {
        match &self.labels {
            Labels::Native => self.inner.ids(),
            Labels::Table(table) => table.clone(),
        }
    }
}

/// Whether every row of `wide` has seen past the distance of its k-th hit.
fn boundary_settled(wide: &SearchResult, k: usize) -> bool {
    (0..wide.nq()).all(|q| {
        let (distances, labels) = wide.row(q);
        match (labels.last(), distances.last()) {
            (Some(&NO_LABEL), _) => true,
            (Some(_), Some(&last)) => wide.k <= k || last != distances[k - 1],
            _ => true,
        }
    })
}

/// Translate positions through `table`, sort each row by (distance, caller label) and keep
/// the first `k` entries.
fn relabel_rows(wide: &SearchResult, table: &[Label], k: usize, metric: MetricType) -> SearchResult {
    let mut result = SearchResult::empty(wide.nq(), k, metric);
    for q in 0..wide.nq() {
        let (distances, labels) = wide.row(q);
        let mut hits: Vec<(f32, Label)> = distances
            .iter()
            .zip(labels)
            .filter(|(_, position)| **position != NO_LABEL)
            .map(|(&d, &position)| (d, table[position as usize]))
            .collect();
        hits.sort_by(|a, b| {
            let by_distance = if metric.is_similarity() {
                b.0.total_cmp(&a.0)
            } else {
                a.0.total_cmp(&b.0)
            };
            by_distance.then(a.1.cmp(&b.1))
        });
        for (slot, (d, label)) in hits.into_iter().take(k).enumerate() {
            result.distances[q * k + slot] = d;
            result.labels[q * k + slot] = label;
        }
    }
    result
}
