//! Binary persistence for every index kind.
//!
//! Layout of a serialized index (file or buffer):
//!
//! ```text
//! "VIDX" | u32 version (LE) | IndexHeader (bincode) | payload | "VCR1" | u32 CRC32 (BE)
//! ```
//!
//! The CRC covers everything before the footer. Metadata is bincode, vector and label
//! sections are raw little-endian so they can be streamed in bounded chunks. Nested
//! indexes (an IVF quantizer, the index under an IDMap) are written as header + payload.
//! Files are written to a temporary sibling and renamed into place.
//!
//! An IVF payload is `quantizer | IvfConfig | u64 next_seq | list tag | lists`. Inline
//! lists are `u64 count | labels | insertion sequences | codes` each. Mapped lists store
//! the data file path and one (offset, count) pair per list.

/// Checksumming adapters and little-endian section helpers.
pub mod io;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use self::io::{
    read_f32s, read_labels, read_u32, read_u64, read_u64s, write_f32s, write_labels, write_u32,
    write_u64, write_u64s, HashingReader, HashingWriter,
};
use crate::config;
use crate::error::{IndexError, Result};
use crate::flat::FlatIndex;
use crate::hnsw::{Graph, HnswConfig, HnswIndex};
use crate::idmap::IdMap;
use crate::index::{check_dimension, AnyIndex, IndexKind, VectorIndex};
use crate::ivf::{InvertedList, InvertedLists, IvfConfig, IvfIndex, MappedList, MappedLists};
use crate::metric::MetricType;
use crate::result::Label;

const LISTS_INLINE: u8 = 0;
const LISTS_MAPPED: u8 = 1;

/// Self-describing header written before every payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub kind: IndexKind,
    pub dimension: u64,
    /// [`MetricType::code`].
    pub metric: u32,
    /// [`MetricType::arg`].
    pub metric_arg: f32,
    pub is_trained: bool,
    pub ntotal: u64,
}

impl IndexHeader {
    pub fn of(index: &dyn VectorIndex) -> Self {
        Self {
            kind: index.kind(),
            dimension: index.dimension() as u64,
            metric: index.metric().code(),
            metric_arg: index.metric_arg(),
            is_trained: index.is_trained(),
            ntotal: index.ntotal() as u64,
        }
    }

    pub fn dimension(&self) -> Result<usize> {
        let d = usize::try_from(self.dimension)
            .map_err(|_| IndexError::corrupt("dimension does not fit in memory"))?;
        check_dimension(d).map_err(|e| IndexError::corrupt(e.to_string()))?;
        Ok(d)
    }

    pub fn metric(&self) -> Result<MetricType> {
        MetricType::from_code(self.metric, self.metric_arg).map_err(|e| IndexError::corrupt(e.to_string()))
    }

    pub fn ntotal(&self) -> Result<usize> {
        usize::try_from(self.ntotal).map_err(|_| IndexError::corrupt("ntotal does not fit in memory"))
    }
}

/// Serialize `index` into a self-contained buffer.
pub fn to_bytes(index: &AnyIndex) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_framed(&mut out, index)?;
    Ok(out)
}

/// Rebuild an index from a buffer produced by [`to_bytes`] or [`write_file`].
pub fn from_bytes(bytes: &[u8]) -> Result<AnyIndex> {
    read_framed(bytes)
}

/// Atomically write `index` to `path`.
pub fn write_file(path: impl AsRef<Path>, index: &AnyIndex) -> Result<()> {
    let path = path.as_ref();
    let tmp = tmp_path(path);
    let written = File::create(&tmp).map_err(IndexError::from).and_then(|file| {
        let mut out = BufWriter::with_capacity(config::IO_CHUNK_BYTES, file);
        let stats = write_framed(&mut out, index)?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(stats)
    });
    let (bytes, crc) = match written {
        Ok(stats) => stats,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };
    fs::rename(&tmp, path)?;

    tracing::info!(
        "Saved {} index to {:?} ({} vectors, {} bytes, CRC32={:#010x})",
        index.kind(),
        path,
        index.ntotal(),
        bytes,
        crc
    );
    Ok(())
}

/// Read an index file. A missing file is [`IndexError::NotFound`].
pub fn read_file(path: impl AsRef<Path>) -> Result<AnyIndex> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let index = read_framed(BufReader::with_capacity(config::IO_CHUNK_BYTES, file))?;
    tracing::info!(
        "Loaded {} index from {:?} ({} vectors)",
        index.kind(),
        path,
        index.ntotal()
    );
    Ok(index)
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Returns (bytes written, CRC32).
fn write_framed<W: Write>(out: &mut W, index: &AnyIndex) -> Result<(u64, u32)> {
    let mut w = HashingWriter::new(out);
    w.write_all(config::INDEX_MAGIC)?;
    write_u32(&mut w, config::FORMAT_VERSION)?;
    write_index(&mut w, index)?;
    let body = w.written();
    let (crc, out) = w.finish();
    out.write_all(config::FOOTER_MAGIC)?;
    out.write_all(&crc.to_be_bytes())?;
    Ok((body + 8, crc))
}

fn read_framed<R: Read>(input: R) -> Result<AnyIndex> {
    let mut r = HashingReader::new(input);
    read_preamble(&mut r)?;
    let index = read_index(&mut r)?;
    verify_footer(r)?;
    Ok(index)
}

fn read_preamble<R: Read>(r: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != config::INDEX_MAGIC {
        return Err(IndexError::corrupt("not a vecindex file (bad magic)"));
    }
    let version = read_u32(r)?;
    if version != config::FORMAT_VERSION {
        return Err(IndexError::corrupt(format!(
            "unsupported format version {version} (expected {})",
            config::FORMAT_VERSION
        )));
    }
    Ok(())
}

fn verify_footer<R: Read>(r: HashingReader<R>) -> Result<()> {
    let computed = r.checksum();
    let mut inner = r.into_inner();
    let mut footer = [0u8; 8];
    inner.read_exact(&mut footer)?;
    if &footer[..4] != config::FOOTER_MAGIC {
        return Err(IndexError::corrupt("missing checksum footer"));
    }
    let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    if stored != computed {
        return Err(IndexError::corrupt(format!(
            "CRC32 mismatch: expected {stored:#010x}, got {computed:#010x}"
        )));
    }
    let mut probe = [0u8; 1];
    if inner.read(&mut probe)? != 0 {
        return Err(IndexError::corrupt("trailing bytes after checksum footer"));
    }
    tracing::debug!("Index CRC32 verified: {:#010x}", stored);
    Ok(())
}

/// Header + payload of one (possibly nested) index.
pub fn write_index<W: Write>(w: &mut W, index: &AnyIndex) -> Result<()> {
    bincode::serialize_into(&mut *w, &IndexHeader::of(index))?;
    match index {
        AnyIndex::Flat(flat) => write_f32s(w, flat.vectors())?,
        AnyIndex::Hnsw(hnsw) => {
            bincode::serialize_into(&mut *w, &(hnsw.config(), hnsw.graph()))?;
            write_f32s(w, hnsw.storage().vectors())?;
        }
        AnyIndex::Ivf(ivf) => write_ivf_payload(w, ivf)?,
        AnyIndex::IdMap(map) => {
            bincode::serialize_into(&mut *w, map.label_table())?;
            write_index(w, map.inner())?;
        }
    }
    Ok(())
}

fn write_ivf_payload<W: Write>(w: &mut W, ivf: &IvfIndex) -> Result<()> {
    bincode::serialize_into(&mut *w, &IndexHeader::of(ivf.quantizer()))?;
    write_f32s(w, ivf.quantizer().vectors())?;
    bincode::serialize_into(&mut *w, &ivf.config())?;
    write_u64(w, ivf.next_seq())?;

    match ivf.lists() {
        InvertedLists::Mapped(mapped) => {
            w.write_all(&[LISTS_MAPPED])?;
            let data_path = mapped.data_path().to_string_lossy();
            bincode::serialize_into(&mut *w, &(&*data_path, mapped.lists()))?;
        }
        lists @ InvertedLists::Resident(_) => {
            w.write_all(&[LISTS_INLINE])?;
            for l in 0..lists.nlist() {
                let labels = lists.labels(l);
                write_u64(w, labels.len() as u64)?;
                write_labels(w, &labels)?;
                write_u64s(w, &lists.seqs(l))?;
                lists.write_codes(l, w)?;
            }
        }
    }
    Ok(())
}

/// Read one header + payload and check the rebuilt index agrees with its header.
pub fn read_index<R: Read>(r: &mut R) -> Result<AnyIndex> {
    let header: IndexHeader = bincode::deserialize_from(&mut *r)?;
    let d = header.dimension()?;
    let metric = header.metric()?;
    let n = header.ntotal()?;

    let index: AnyIndex = match header.kind {
        IndexKind::Flat => read_flat_payload(r, d, metric, n)?.into(),
        IndexKind::Hnsw => {
            let (config, graph): (HnswConfig, Graph) = bincode::deserialize_from(&mut *r)?;
            let storage = read_flat_payload(r, d, metric, n)?;
            HnswIndex::from_parts(config, storage, graph)?.into()
        }
        IndexKind::Ivf => {
            let (config, next_seq, quantizer, lists) = read_ivf_parts(r, d, metric, |r, nlist| {
                read_lists(r, d, nlist)
            })?;
            IvfIndex::from_parts(config, quantizer, header.is_trained, lists, next_seq)?.into()
        }
        IndexKind::IdMap => {
            let table: Vec<Label> = bincode::deserialize_from(&mut *r)?;
            let inner = read_index(r)?;
            IdMap::from_parts(inner, table)?.into()
        }
    };

    let actual = IndexHeader::of(&index);
    if actual.dimension != header.dimension
        || actual.metric != header.metric
        || actual.ntotal != header.ntotal
        || actual.is_trained != header.is_trained
    {
        return Err(IndexError::corrupt(format!(
            "{} payload does not match its header",
            header.kind
        )));
    }
    Ok(index)
}

fn read_flat_payload<R: Read>(r: &mut R, d: usize, metric: MetricType, n: usize) -> Result<FlatIndex> {
    let count = n
        .checked_mul(d)
        .ok_or_else(|| IndexError::corrupt("vector count overflows"))?;
    FlatIndex::from_vectors(d, metric, read_f32s(r, count)?)
}

/// Quantizer, config and sequence counter of an IVF payload, then the list section via
/// `lists_section`.
fn read_ivf_parts<R, L, F>(
    r: &mut R,
    d: usize,
    metric: MetricType,
    lists_section: F,
) -> Result<(IvfConfig, u64, FlatIndex, L)>
where
    R: Read,
    F: FnOnce(&mut R, usize) -> Result<L>,
{
    let qheader: IndexHeader = bincode::deserialize_from(&mut *r)?;
    if qheader.kind != IndexKind::Flat
        || qheader.dimension()? != d
        || qheader.metric()? != metric
    {
        return Err(IndexError::corrupt("IVF quantizer header is inconsistent"));
    }
    let quantizer = read_flat_payload(r, d, metric, qheader.ntotal()?)?;
    let config: IvfConfig = bincode::deserialize_from(&mut *r)?;
    let next_seq = read_u64(r)?;
    let lists = lists_section(r, config.nlist)?;
    Ok((config, next_seq, quantizer, lists))
}

fn read_list_tag<R: Read>(r: &mut R) -> Result<u8> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    match tag[0] {
        LISTS_INLINE | LISTS_MAPPED => Ok(tag[0]),
        other => Err(IndexError::corrupt(format!("unknown list storage tag {other}"))),
    }
}

fn read_lists<R: Read>(r: &mut R, d: usize, nlist: usize) -> Result<InvertedLists> {
    if read_list_tag(r)? == LISTS_MAPPED {
        let (data_path, lists): (String, Vec<MappedList>) = bincode::deserialize_from(&mut *r)?;
        if lists.len() != nlist {
            return Err(IndexError::corrupt("mapped list count does not match nlist"));
        }
        return Ok(InvertedLists::Mapped(MappedLists::open(data_path, d, lists)?));
    }

    let mut lists = Vec::with_capacity(nlist.min(1 << 16));
    for _ in 0..nlist {
        let count = usize::try_from(read_u64(r)?)
            .map_err(|_| IndexError::corrupt("list length does not fit in memory"))?;
        let labels = read_labels(r, count)?;
        let seqs = read_u64s(r, count)?;
        let codes = read_f32s(
            r,
            count
                .checked_mul(d)
                .ok_or_else(|| IndexError::corrupt("list length overflows"))?,
        )?;
        lists.push(InvertedList { labels, seqs, codes });
    }
    Ok(InvertedLists::Resident(lists))
}

/// Where one inline list sits inside an index file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListExtent {
    pub count: usize,
    pub labels_at: u64,
    pub seqs_at: u64,
    pub codes_at: u64,
}

/// List section of an IVF file, located without loading postings.
#[derive(Debug)]
pub(crate) enum ListLayout {
    Inline(Vec<ListExtent>),
    Mapped {
        data_path: PathBuf,
        lists: Vec<MappedList>,
    },
}

/// An IVF index file surveyed with bounded memory.
#[derive(Debug)]
pub(crate) struct IvfLayout {
    pub header: IndexHeader,
    pub config: IvfConfig,
    pub next_seq: u64,
    pub quantizer: FlatIndex,
    pub lists: ListLayout,
}

/// Stream through an IVF index file, verifying its checksum and recording where each
/// list lives. Postings are skipped, not retained.
pub(crate) fn scan_ivf_file(path: &Path) -> Result<IvfLayout> {
    let file = File::open(path)?;
    let mut r = HashingReader::new(BufReader::with_capacity(config::IO_CHUNK_BYTES, file));
    read_preamble(&mut r)?;
    let header: IndexHeader = bincode::deserialize_from(&mut r)?;
    if header.kind != IndexKind::Ivf {
        return Err(IndexError::argument(format!(
            "{} holds a {} index, on-disk merge needs IVF",
            path.display(),
            header.kind
        )));
    }
    let d = header.dimension()?;
    let code_size = (d * std::mem::size_of::<f32>()) as u64;
    let metric = header.metric()?;

    let (config, next_seq, quantizer, lists) = read_ivf_parts(&mut r, d, metric, |r, nlist| {
        if read_list_tag(r)? == LISTS_MAPPED {
            let (data_path, lists): (String, Vec<MappedList>) = bincode::deserialize_from(&mut *r)?;
            if lists.len() != nlist {
                return Err(IndexError::corrupt("mapped list count does not match nlist"));
            }
            return Ok(ListLayout::Mapped {
                data_path: PathBuf::from(data_path),
                lists,
            });
        }
        let mut extents = Vec::with_capacity(nlist.min(1 << 16));
        for _ in 0..nlist {
            let count = read_u64(r)?;
            let section = count
                .checked_mul(8)
                .ok_or_else(|| IndexError::corrupt("list length overflows"))?;
            let labels_at = r.position();
            r.skip(section)?;
            let seqs_at = r.position();
            r.skip(section)?;
            let codes_at = r.position();
            r.skip(
                count
                    .checked_mul(code_size)
                    .ok_or_else(|| IndexError::corrupt("list length overflows"))?,
            )?;
            extents.push(ListExtent {
                count: usize::try_from(count)
                    .map_err(|_| IndexError::corrupt("list length does not fit in memory"))?,
                labels_at,
                seqs_at,
                codes_at,
            });
        }
        Ok(ListLayout::Inline(extents))
    })?;
    verify_footer(r)?;

    Ok(IvfLayout {
        header,
        config,
        next_seq,
        quantizer,
        lists,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn flat() -> AnyIndex {
        let mut f = FlatIndex::new(2, MetricType::L2).unwrap();
        f.add(&[1.0, 0.0, 1.0, 2.0, 1.0, 3.0]).unwrap();
        f.into()
    }

    #[test]
    fn test_buffer_round_trip_flat() {
        let bytes = to_bytes(&flat()).unwrap();
        assert_eq!(&bytes[..4], b"VIDX");
        assert_eq!(&bytes[bytes.len() - 8..bytes.len() - 4], b"VCR1");
        let back = from_bytes(&bytes).unwrap();
        assert_eq!(back.kind(), IndexKind::Flat);
        assert_eq!(back.ntotal(), 3);
        assert_eq!(back.reconstruct(2).unwrap(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = to_bytes(&flat()).unwrap();
        let mid = bytes.len() - 12;
        bytes[mid] ^= 0xff;
        let err = from_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        let bytes = to_bytes(&flat()).unwrap();
        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert_eq!(from_bytes(&bad).unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(from_bytes(&bytes[..bytes.len() - 3]).unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(from_bytes(&[]).unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = to_bytes(&flat()).unwrap();
        bytes.push(0);
        assert_eq!(from_bytes(&bytes).unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = read_file("/definitely/not/here.index").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_file_round_trip_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flat.index");
        write_file(&path, &flat()).unwrap();
        assert!(!tmp_path(&path).exists());
        let back = read_file(&path).unwrap();
        assert_eq!(back.ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_header_metric_code() {
        let header = IndexHeader::of(&flat());
        assert_eq!(header.metric, 1);
        assert_eq!(header.dimension, 2);
        assert!(header.is_trained);
    }

    #[test]
    fn test_scan_ivf_file_records_extents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ivf.index");
        let mut quantizer = FlatIndex::new(2, MetricType::L2).unwrap();
        quantizer.add(&[0.0, 0.0, 10.0, 10.0]).unwrap();
        let mut ivf = IvfIndex::new(quantizer, 2).unwrap();
        ivf.add(&[0.0, 1.0, 9.0, 9.0, 10.0, 11.0]).unwrap();
        write_file(&path, &ivf.into()).unwrap();

        let layout = scan_ivf_file(&path).unwrap();
        assert_eq!(layout.header.ntotal, 3);
        assert_eq!(layout.config.nlist, 2);
        assert_eq!(layout.next_seq, 3);
        match layout.lists {
            ListLayout::Inline(extents) => {
                assert_eq!(extents[0].count, 1);
                assert_eq!(extents[1].count, 2);
                assert_eq!(extents[1].seqs_at - extents[1].labels_at, 16);
                assert_eq!(extents[1].codes_at - extents[1].seqs_at, 16);
            }
            other => panic!("expected inline lists, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_rejects_non_ivf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flat.index");
        write_file(&path, &flat()).unwrap();
        assert_eq!(scan_ivf_file(&path).unwrap_err().kind(), ErrorKind::Argument);
    }
}
