//! Global configuration constants for vecindex.
//!
//! All tuning defaults, validation limits, and on-disk format constants are defined here.
//! Per-index tunables that change at runtime (`ef_search`, `nprobe`, ...) live in the
//! serializable config structs of each backend and are persisted with the index.

/// Default number of bidirectional links per HNSW node on layers above 0.
///
/// Layer 0 uses `2 * m`. Higher values improve recall but increase memory and build time.
pub const HNSW_DEFAULT_M: usize = 32;

/// Default ef parameter during HNSW index construction.
///
/// Raised to `m` when a larger `m` is configured.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 40;

/// Default ef parameter during HNSW search.
///
/// Raised to `m` when a larger `m` is configured.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 16;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Seed for the per-index level generator, so identical insert sequences build identical graphs.
pub const HNSW_LEVEL_SEED: u64 = 0x5eed_4e57_0000_0001;

/// Default number of inverted lists probed per IVF query.
pub const IVF_DEFAULT_NPROBE: usize = 1;

/// Upper bound on Lloyd iterations during IVF training.
pub const KMEANS_MAX_ITERATIONS: usize = 25;

/// Seed for k-means++ initialization.
pub const KMEANS_SEED: u64 = 1234;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Magic bytes at the start of every serialized index.
pub const INDEX_MAGIC: &[u8; 4] = b"VIDX";

/// Version of the serialized index layout.
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes preceding the CRC32 footer.
pub const FOOTER_MAGIC: &[u8; 4] = b"VCR1";

/// Chunk size (bytes) for streaming vector payloads during I/O and on-disk merge.
pub const IO_CHUNK_BYTES: usize = 1 << 20;
