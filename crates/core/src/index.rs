//! The contract every backend obeys, plus the closed set of backends used for dispatch
//! and persistence.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{IndexError, Result};
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::idmap::IdMap;
use crate::ivf::IvfIndex;
use crate::metric::MetricType;
use crate::result::{Label, SearchResult};

/// Structural kind of an index. Persisted in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Flat,
    Hnsw,
    Ivf,
    IdMap,
}

impl IndexKind {
    pub fn name(self) -> &'static str {
        match self {
            IndexKind::Flat => "Flat",
            IndexKind::Hnsw => "HNSW",
            IndexKind::Ivf => "IVF",
            IndexKind::IdMap => "IDMap",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared contract of all index backends.
///
/// Vectors are passed as flat row-major `n * dimension` slices. Every mutating method
/// validates its arguments before touching storage, so an `Err` has no partial effect.
/// Optional capabilities default to [`IndexError::Unsupported`].
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> IndexKind;
    fn dimension(&self) -> usize;
    fn metric(&self) -> MetricType;

    /// Metric parameter: the exponent of an `Lp` metric, `0.0` otherwise.
    fn metric_arg(&self) -> f32 {
        self.metric().arg()
    }

    fn is_trained(&self) -> bool {
        true
    }

    /// Number of stored entries, counting duplicate labels separately.
    fn ntotal(&self) -> usize;

    /// Bytes per encoded vector.
    fn code_size(&self) -> usize {
        self.dimension() * std::mem::size_of::<f32>()
    }

    /// Fit backend parameters. Backends without a model only validate the shape.
    fn train(&mut self, vectors: &[f32]) -> Result<()> {
        check_vectors(self.dimension(), vectors)?;
        Ok(())
    }

    /// Append vectors, labelling them `ntotal..ntotal + n`.
    fn add(&mut self, vectors: &[f32]) -> Result<()>;

    /// Append vectors under caller-chosen labels.
    fn add_with_ids(&mut self, _vectors: &[f32], _labels: &[Label]) -> Result<()> {
        Err(IndexError::unsupported(self.kind().name(), "add_with_ids"))
    }

    fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult>;

    fn reconstruct(&self, _label: Label) -> Result<Vec<f32>> {
        Err(IndexError::unsupported(self.kind().name(), "reconstruct"))
    }

    /// Reconstruct several labels into one row-major buffer. Fails on the first missing
    /// label without returning partial output.
    fn reconstruct_batch(&self, labels: &[Label]) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(labels.len() * self.dimension());
        for &label in labels {
            out.extend_from_slice(&self.reconstruct(label)?);
        }
        Ok(out)
    }

    /// Remove every entry whose label appears in `labels`. Returns the number removed.
    fn remove_ids(&mut self, labels: &[Label]) -> Result<usize>;

    /// Drop all entries. Dimension, metric and trained state are kept.
    fn reset(&mut self);

    /// Labels in storage order.
    fn ids(&self) -> Vec<Label>;
}

/// Validate a row-major vector buffer against `dimension`, returning the row count.
pub fn check_vectors(dimension: usize, vectors: &[f32]) -> Result<usize> {
    if dimension == 0 || vectors.len() % dimension != 0 {
        return Err(IndexError::argument(format!(
            "vector buffer of length {} is not a multiple of dimension {dimension}",
            vectors.len()
        )));
    }
    Ok(vectors.len() / dimension)
}

pub(crate) fn check_labels(n: usize, labels: &[Label]) -> Result<()> {
    if labels.len() != n {
        return Err(IndexError::argument(format!(
            "{} labels supplied for {n} vectors",
            labels.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_dimension(dimension: usize) -> Result<()> {
    if dimension == 0 || dimension > config::MAX_DIMENSION {
        return Err(IndexError::argument(format!(
            "dimension must be in 1..={}, got {dimension}",
            config::MAX_DIMENSION
        )));
    }
    Ok(())
}

pub(crate) fn check_same_shape(a: &dyn VectorIndex, b: &dyn VectorIndex) -> Result<()> {
    if a.dimension() != b.dimension() {
        return Err(IndexError::DimensionMismatch {
            expected: a.dimension(),
            actual: b.dimension(),
        });
    }
    if a.kind() != b.kind() {
        return Err(IndexError::argument(format!(
            "cannot merge a {} index into a {} index",
            b.kind(),
            a.kind()
        )));
    }
    if a.metric() != b.metric() {
        return Err(IndexError::argument(format!(
            "cannot merge a {} index into a {} index",
            b.metric(),
            a.metric()
        )));
    }
    Ok(())
}

/// Closed set of backends.
#[derive(Debug)]
pub enum AnyIndex {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
    Ivf(IvfIndex),
    IdMap(Box<IdMap>),
}

macro_rules! dispatch {
    ($self:expr, $idx:ident => $body:expr) => {
        match $self {
            AnyIndex::Flat($idx) => $body,
            AnyIndex::Hnsw($idx) => $body,
            AnyIndex::Ivf($idx) => $body,
            AnyIndex::IdMap($idx) => $body,
        }
    };
}

impl AnyIndex {
    /// Append `other`'s entries. `other` is left unchanged.
    pub fn merge_from(&mut self, other: &AnyIndex) -> Result<()> {
        check_same_shape(&*self, other)?;
        match (self, other) {
            (AnyIndex::Flat(a), AnyIndex::Flat(b)) => a.merge_from(b),
            (AnyIndex::Hnsw(a), AnyIndex::Hnsw(b)) => a.merge_from(b),
            (AnyIndex::Ivf(a), AnyIndex::Ivf(b)) => a.merge_from(b),
            (AnyIndex::IdMap(a), AnyIndex::IdMap(b)) => a.merge_from(b),
            _ => unreachable!("kinds checked above"),
        }
    }

    pub fn as_flat(&self) -> Option<&FlatIndex> {
        match self {
            AnyIndex::Flat(f) => Some(f),
            AnyIndex::IdMap(m) => m.inner().as_flat(),
            _ => None,
        }
    }

    pub fn as_flat_mut(&mut self) -> Option<&mut FlatIndex> {
        match self {
            AnyIndex::Flat(f) => Some(f),
            AnyIndex::IdMap(m) => m.inner_mut().as_flat_mut(),
            _ => None,
        }
    }

    pub fn as_hnsw(&self) -> Option<&HnswIndex> {
        match self {
            AnyIndex::Hnsw(h) => Some(h),
            AnyIndex::IdMap(m) => m.inner().as_hnsw(),
            _ => None,
        }
    }

    pub fn as_hnsw_mut(&mut self) -> Option<&mut HnswIndex> {
        match self {
            AnyIndex::Hnsw(h) => Some(h),
            AnyIndex::IdMap(m) => m.inner_mut().as_hnsw_mut(),
            _ => None,
        }
    }

    pub fn as_ivf(&self) -> Option<&IvfIndex> {
        match self {
            AnyIndex::Ivf(i) => Some(i),
            AnyIndex::IdMap(m) => m.inner().as_ivf(),
            _ => None,
        }
    }

    pub fn as_ivf_mut(&mut self) -> Option<&mut IvfIndex> {
        match self {
            AnyIndex::Ivf(i) => Some(i),
            AnyIndex::IdMap(m) => m.inner_mut().as_ivf_mut(),
            _ => None,
        }
    }
}

impl VectorIndex for AnyIndex {
    fn kind(&self) -> IndexKind {
        dispatch!(self, i => i.kind())
    }

    fn dimension(&self) -> usize {
        dispatch!(self, i => i.dimension())
    }

    fn metric(&self) -> MetricType {
        dispatch!(self, i => i.metric())
    }

    fn metric_arg(&self) -> f32 {
        dispatch!(self, i => i.metric_arg())
    }

    fn is_trained(&self) -> bool {
        dispatch!(self, i => i.is_trained())
    }

    fn ntotal(&self) -> usize {
        dispatch!(self, i => i.ntotal())
    }

    fn code_size(&self) -> usize {
        dispatch!(self, i => i.code_size())
    }

    fn train(&mut self, vectors: &[f32]) -> Result<()> {
        dispatch!(self, i => i.train(vectors))
    }

    fn add(&mut self, vectors: &[f32]) -> Result<()> {
        dispatch!(self, i => i.add(vectors))
    }

    fn add_with_ids(&mut self, vectors: &[f32], labels: &[Label]) -> Result<()> {
        dispatch!(self, i => i.add_with_ids(vectors, labels))
    }

    fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        dispatch!(self, i => i.search(queries, k))
    }

    fn reconstruct(&self, label: Label) -> Result<Vec<f32>> {
        dispatch!(self, i => i.reconstruct(label))
    }

    fn reconstruct_batch(&self, labels: &[Label]) -> Result<Vec<f32>> {
        dispatch!(self, i => i.reconstruct_batch(labels))
    }

    fn remove_ids(&mut self, labels: &[Label]) -> Result<usize> {
        dispatch!(self, i => i.remove_ids(labels))
    }

    fn reset(&mut self) {
        dispatch!(self, i => i.reset())
    }

    fn ids(&self) -> Vec<Label> {
        dispatch!(self, i => i.ids())
    }
}

impl From<FlatIndex> for AnyIndex {
    fn from(index: FlatIndex) -> Self {
        AnyIndex::Flat(index)
    }
}

impl From<HnswIndex> for AnyIndex {
    fn from(index: HnswIndex) -> Self {
        AnyIndex::Hnsw(index)
    }
}

impl From<IvfIndex> for AnyIndex {
    fn from(index: IvfIndex) -> Self {
        AnyIndex::Ivf(index)
    }
}

impl From<IdMap> for AnyIndex {
    fn from(index: IdMap) -> Self {
        AnyIndex::IdMap(Box::new(index))
    }
}
