//! The owning [`Index`] handle.
//!
//! `Index` is what applications hold: one backend behind a single type, with constructors
//! for every backend, persistence, merging and explicit disposal. After
//! [`dispose`](Index::dispose) every call returns [`IndexError::Disposed`].

use std::ops::RangeBounds;
use std::path::Path;

use crate::codec;
use crate::error::{IndexError, Result};
use crate::factory::index_factory;
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::idmap::IdMap;
use crate::index::{AnyIndex, IndexKind, VectorIndex};
use crate::ivf::IvfIndex;
use crate::merge::{self, MergePart};
use crate::metric::MetricType;
use crate::result::{Label, SearchResult};

#[derive(Debug)]
pub struct Index {
    inner: Option<AnyIndex>,
}

impl From<AnyIndex> for Index {
    fn from(index: AnyIndex) -> Self {
        Self { inner: Some(index) }
    }
}

impl Index {
    pub fn flat(dimension: usize, metric: MetricType) -> Result<Self> {
        Ok(FlatIndex::new(dimension, metric)?.into())
    }

    pub fn flat_l2(dimension: usize) -> Result<Self> {
        Self::flat(dimension, MetricType::L2)
    }

    pub fn flat_ip(dimension: usize) -> Result<Self> {
        Self::flat(dimension, MetricType::InnerProduct)
    }

    pub fn hnsw(dimension: usize, m: usize, metric: MetricType) -> Result<Self> {
        Ok(HnswIndex::new(dimension, m, metric)?.into())
    }

    /// IVF over `quantizer`, which must be a flat index of the same dimension and metric.
    /// The quantizer handle is consumed: the IVF index owns it from now on.
    pub fn ivf_flat(quantizer: Index, dimension: usize, nlist: usize, metric: MetricType) -> Result<Self> {
        let quantizer = match quantizer.into_inner()? {
            AnyIndex::Flat(flat) => flat,
            other => {
                return Err(IndexError::argument(format!(
                    "IVF quantizer must be a Flat index, got {}",
                    other.kind()
                )))
            }
        };
        Ok(IvfIndex::with_quantizer(quantizer, dimension, nlist, metric)?.into())
    }

    /// Build from a factory descriptor such as `"IVF100,Flat"`.
    pub fn from_factory(dimension: usize, descriptor: &str, metric: MetricType) -> Result<Self> {
        Ok(index_factory(dimension, descriptor, metric)?.into())
    }

    /// Load an index file. A missing file is [`IndexError::NotFound`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Ok(codec::read_file(path)?.into())
    }

    pub fn from_buffer(bytes: &[u8]) -> Result<Self> {
        Ok(codec::from_bytes(bytes)?.into())
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        codec::write_file(path, self.get()?)
    }

    pub fn to_buffer(&self) -> Result<Vec<u8>> {
        codec::to_bytes(self.get()?)
    }

    pub(crate) fn get(&self) -> Result<&AnyIndex> {
        self.inner.as_ref().ok_or(IndexError::Disposed)
    }

    pub(crate) fn get_mut(&mut self) -> Result<&mut AnyIndex> {
        self.inner.as_mut().ok_or(IndexError::Disposed)
    }

    pub(crate) fn replace(&mut self, index: AnyIndex) {
        self.inner = Some(index);
    }

    /// Borrow the backend.
    pub fn as_any(&self) -> Result<&AnyIndex> {
        self.get()
    }

    /// Take the backend out of the handle.
    pub fn into_inner(self) -> Result<AnyIndex> {
        self.inner.ok_or(IndexError::Disposed)
    }

    /// Release storage. Every later call fails with [`IndexError::Disposed`].
    pub fn dispose(&mut self) {
        self.inner = None;
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_none()
    }

    /// Wrap this (empty) index in an [`IdMap`] in place.
    pub fn to_id_map(&mut self) -> Result<()> {
        let current = self.get()?;
        if current.ntotal() != 0 {
            return Err(IndexError::argument(format!(
                "only an empty index can be wrapped, this one holds {} vectors",
                current.ntotal()
            )));
        }
        if current.kind() == IndexKind::IdMap {
            return Err(IndexError::argument("index already maps caller labels"));
        }
        if let Some(inner) = self.inner.take() {
            self.inner = Some(IdMap::new(inner)?.into());
        }
        Ok(())
    }

    pub fn kind(&self) -> Result<IndexKind> {
        Ok(self.get()?.kind())
    }

    pub fn dimension(&self) -> Result<usize> {
        Ok(self.get()?.dimension())
    }

    pub fn metric_type(&self) -> Result<MetricType> {
        Ok(self.get()?.metric())
    }

    pub fn metric_arg(&self) -> Result<f32> {
        Ok(self.get()?.metric_arg())
    }

    pub fn is_trained(&self) -> Result<bool> {
        Ok(self.get()?.is_trained())
    }

    pub fn ntotal(&self) -> Result<usize> {
        Ok(self.get()?.ntotal())
    }

    pub fn code_size(&self) -> Result<usize> {
        Ok(self.get()?.code_size())
    }

    pub fn ids(&self) -> Result<Vec<Label>> {
        Ok(self.get()?.ids())
    }

    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        self.get_mut()?.train(vectors)
    }

    pub fn add(&mut self, vectors: &[f32]) -> Result<()> {
        self.get_mut()?.add(vectors)
    }

    pub fn add_with_ids(&mut self, vectors: &[f32], labels: &[Label]) -> Result<()> {
        self.get_mut()?.add_with_ids(vectors, labels)
    }

    pub fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        self.get()?.search(queries, k)
    }

    /// Search with `k` equal to the current total.
    pub fn search_all(&self, queries: &[f32]) -> Result<SearchResult> {
        let index = self.get()?;
        index.search(queries, index.ntotal())
    }

    pub fn reconstruct(&self, label: Label) -> Result<Vec<f32>> {
        self.get()?.reconstruct(label)
    }

    pub fn reconstruct_batch(&self, labels: &[Label]) -> Result<Vec<f32>> {
        self.get()?.reconstruct_batch(labels)
    }

    pub fn remove_ids(&mut self, labels: &[Label]) -> Result<usize> {
        self.get_mut()?.remove_ids(labels)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.get_mut()?.reset();
        Ok(())
    }

    /// Append `other`'s entries. `other` is left unchanged.
    pub fn merge_from(&mut self, other: &Index) -> Result<()> {
        let other = other.get()?;
        self.get_mut()?.merge_from(other)
    }

    /// See [`merge::merge_on_disk`].
    pub fn merge_on_disk(
        parts: &mut [MergePart<'_>],
        out_index: impl AsRef<Path>,
        out_data: impl AsRef<Path>,
    ) -> Result<()> {
        merge::merge_on_disk(parts, out_index, out_data)
    }

    pub fn is_on_disk_supported() -> bool {
        merge::is_on_disk_supported()
    }

    /// Copy of the whole code region of a flat index.
    pub fn codes(&self) -> Result<Vec<u8>> {
        let index = self.get()?;
        Ok(require(index.as_flat(), index.kind(), "codes")?.codes())
    }

    pub fn get_codes_by_range(&self, range: impl RangeBounds<usize>) -> Result<Vec<u8>> {
        let index = self.get()?;
        require(index.as_flat(), index.kind(), "get_codes_by_range")?.get_codes_by_range(range)
    }

    pub fn set_codes_by_range(&mut self, bytes: &[u8], start: usize) -> Result<()> {
        let index = self.get_mut()?;
        let kind = index.kind();
        require(index.as_flat_mut(), kind, "set_codes_by_range")?.set_codes_by_range(bytes, start)
    }

    pub fn ef_search(&self) -> Result<usize> {
        let index = self.get()?;
        Ok(require(index.as_hnsw(), index.kind(), "ef_search")?.ef_search())
    }

    pub fn set_ef_search(&mut self, ef: usize) -> Result<()> {
        let index = self.get_mut()?;
        let kind = index.kind();
        require(index.as_hnsw_mut(), kind, "set_ef_search")?.set_ef_search(ef);
        Ok(())
    }

    pub fn ef_construction(&self) -> Result<usize> {
        let index = self.get()?;
        Ok(require(index.as_hnsw(), index.kind(), "ef_construction")?.ef_construction())
    }

    pub fn set_ef_construction(&mut self, ef: usize) -> Result<()> {
        let index = self.get_mut()?;
        let kind = index.kind();
        require(index.as_hnsw_mut(), kind, "set_ef_construction")?.set_ef_construction(ef);
        Ok(())
    }

    pub fn nprobe(&self) -> Result<usize> {
        let index = self.get()?;
        Ok(require(index.as_ivf(), index.kind(), "nprobe")?.nprobe())
    }

    pub fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        let index = self.get_mut()?;
        let kind = index.kind();
        require(index.as_ivf_mut(), kind, "set_nprobe")?.set_nprobe(nprobe);
        Ok(())
    }

    pub fn nlist(&self) -> Result<usize> {
        let index = self.get()?;
        Ok(require(index.as_ivf(), index.kind(), "nlist")?.nlist())
    }

    pub fn list_sizes(&self) -> Result<Vec<usize>> {
        let index = self.get()?;
        Ok(require(index.as_ivf(), index.kind(), "list_sizes")?.list_sizes())
    }
}

fn require<T>(capability: Option<T>, kind: IndexKind, operation: &'static str) -> Result<T> {
    capability.ok_or_else(|| IndexError::unsupported(kind.name(), operation))
}

impl From<FlatIndex> for Index {
    fn from(index: FlatIndex) -> Self {
        AnyIndex::from(index).into()
    }
}

impl From<HnswIndex> for Index {
    fn from(index: HnswIndex) -> Self {
        AnyIndex::from(index).into()
    }
}

impl From<IvfIndex> for Index {
    fn from(index: IvfIndex) -> Self {
        AnyIndex::from(index).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_dispose_is_terminal() {
        let mut index = Index::flat_l2(2).unwrap();
        index.add(&[1.0, 2.0]).unwrap();
        index.dispose();
        assert!(index.is_disposed());
        assert_eq!(index.ntotal().unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(index.add(&[1.0, 2.0]).unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(index.to_buffer().unwrap_err().kind(), ErrorKind::Disposed);
        assert_eq!(index.ef_search().unwrap_err().kind(), ErrorKind::Disposed);
    }

    #[test]
    fn test_search_all_uses_total() {
        let mut index = Index::flat_l2(1).unwrap();
        index.add(&[0.0, 5.0, 2.0]).unwrap();
        let result = index.search_all(&[1.0]).unwrap();
        assert_eq!(result.k, 3);
        assert_eq!(result.labels, vec![0, 2, 1]);
    }

    #[test]
    fn test_to_id_map_requires_empty() {
        let mut index = Index::flat_l2(2).unwrap();
        index.to_id_map().unwrap();
        assert_eq!(index.kind().unwrap(), IndexKind::IdMap);
        index.add_with_ids(&[1.0, 1.0], &[42]).unwrap();
        assert_eq!(index.to_id_map().unwrap_err().kind(), ErrorKind::Argument);

        let mut full = Index::flat_l2(2).unwrap();
        full.add(&[1.0, 1.0]).unwrap();
        assert_eq!(full.to_id_map().unwrap_err().kind(), ErrorKind::Argument);
        assert_eq!(full.kind().unwrap(), IndexKind::Flat);
    }

    #[test]
    fn test_capabilities_by_kind() {
        let mut flat = Index::flat_l2(2).unwrap();
        assert_eq!(flat.nprobe().unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(flat.set_ef_search(10).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut hnsw = Index::hnsw(2, 8, MetricType::L2).unwrap();
        hnsw.set_ef_search(0).unwrap();
        assert_eq!(hnsw.ef_search().unwrap(), 1);
        assert_eq!(hnsw.codes().unwrap_err().kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_ivf_flat_takes_quantizer() {
        let quantizer = Index::flat_l2(2).unwrap();
        let ivf = Index::ivf_flat(quantizer, 2, 4, MetricType::L2).unwrap();
        assert!(!ivf.is_trained().unwrap());
        assert_eq!(ivf.nlist().unwrap(), 4);

        let quantizer = Index::hnsw(2, 8, MetricType::L2).unwrap();
        let err = Index::ivf_flat(quantizer, 2, 4, MetricType::L2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn test_merge_from_handle() {
        let mut a = Index::flat_l2(1).unwrap();
        a.add(&[1.0]).unwrap();
        let mut b = Index::flat_l2(1).unwrap();
        b.add(&[2.0, 3.0]).unwrap();
        a.merge_from(&b).unwrap();
        assert_eq!(a.ntotal().unwrap(), 3);
        assert_eq!(b.ntotal().unwrap(), 2);
    }
}
