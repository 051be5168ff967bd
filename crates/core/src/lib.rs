//! # vecindex-core
//!
//! Vector similarity search engine: exact flat scan, HNSW graph search and inverted-file
//! (IVF) search behind one [`VectorIndex`] contract, with caller-chosen labels through
//! [`IdMap`], a checksummed binary codec, and in-memory and out-of-core merging.
//!
//! Most applications hold an [`Index`] handle:
//!
//! ```no_run
//! use vecindex_core::{Index, MetricType};
//!
//! # fn main() -> vecindex_core::Result<()> {
//! let mut index = Index::from_factory(2, "HNSW16,Flat", MetricType::L2)?;
//! index.add(&[1.0, 0.0, 1.0, 2.0])?;
//! let result = index.search(&[1.0, 1.0], 1)?;
//! assert_eq!(result.labels.len(), 1);
//! index.write("vectors.index")?;
//! # Ok(())
//! # }
//! ```

/// Binary persistence: header, payloads and CRC32 footer.
pub mod codec;
/// Global configuration constants: limits, defaults, and on-disk format markers.
pub mod config;
/// Error enum, `Result` alias and machine-checkable error kinds.
pub mod error;
/// Factory descriptor parsing (`"IVF100,Flat"`, `"IDMap,HNSW32,Flat"`).
pub mod factory;
/// Exact brute-force backend.
pub mod flat;
/// Owning index handle with explicit disposal.
pub mod handle;
/// HNSW approximate nearest neighbor backend.
pub mod hnsw;
/// Caller-chosen labels over any backend.
pub mod idmap;
/// The `VectorIndex` contract and the `AnyIndex` dispatch enum.
pub mod index;
/// Inverted-file backend, k-means training and mapped posting lists.
pub mod ivf;
/// In-memory and on-disk merging.
pub mod merge;
/// L2 and inner-product metrics with SIMD kernels.
pub mod metric;
/// Search results and top-k selection.
pub mod result;
/// `Arc<RwLock<_>>` handle for sharing an index across threads.
pub mod shared;

pub use error::{ErrorKind, IndexError, Result};
pub use factory::index_factory;
pub use flat::FlatIndex;
pub use handle::Index;
pub use hnsw::HnswIndex;
pub use idmap::IdMap;
pub use index::{AnyIndex, IndexKind, VectorIndex};
pub use ivf::IvfIndex;
pub use merge::{is_on_disk_supported, merge_on_disk, MergePart};
pub use metric::MetricType;
pub use result::{Label, SearchResult, NO_LABEL};
pub use shared::SharedIndex;
