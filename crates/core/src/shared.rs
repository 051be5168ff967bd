//! Thread-safe shared handle over an [`Index`].
//!
//! Searches take the read lock and run concurrently; mutations take the write lock and are
//! exclusive. Cloning the handle is cheap and shares the same index.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::handle::Index;
use crate::result::{Label, SearchResult};

#[derive(Debug, Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<Index>>,
}

impl SharedIndex {
    pub fn new(index: Index) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.inner.write()
    }

    pub fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        self.inner.read().search(queries, k)
    }

    pub fn add(&self, vectors: &[f32]) -> Result<()> {
        self.inner.write().add(vectors)
    }

    pub fn add_with_ids(&self, vectors: &[f32], labels: &[Label]) -> Result<()> {
        self.inner.write().add_with_ids(vectors, labels)
    }

    pub fn remove_ids(&self, labels: &[Label]) -> Result<usize> {
        self.inner.write().remove_ids(labels)
    }

    pub fn ntotal(&self) -> Result<usize> {
        self.inner.read().ntotal()
    }
}

impl From<Index> for SharedIndex {
    fn from(index: Index) -> Self {
        Self::new(index)
    }
}
