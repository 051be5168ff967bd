//! Out-of-core IVF merge.
//!
//! Every part is an IVF index sharing the first part's quantizer. The output is an index
//! file whose lists are mapped onto a separate data file. Postings are copied list by list:
//! codes stream through in bounded chunks and only the labels and insertion sequences of
//! the list being merged are buffered. The output index keeps one (offset, count) pair per
//! list. Entries of later parts count as newer than entries of earlier parts.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::io::{read_labels, read_u64s, write_labels, write_u64s};
use crate::codec::{self, IvfLayout, ListLayout};
use crate::config;
use crate::error::{IndexError, Result};
use crate::flat::FlatIndex;
use crate::handle::Index;
use crate::index::{AnyIndex, VectorIndex};
use crate::ivf::{InvertedLists, IvfConfig, IvfIndex, MappedList, MappedLists};
use crate::metric::MetricType;
use crate::result::Label;

/// One input of [`merge_on_disk`].
pub enum MergePart<'a> {
    /// An IVF index file written by [`Index::write`] or a previous merge.
    Path(PathBuf),
    /// A live IVF index. When it is the first part it becomes the merged index.
    Index(&'a mut Index),
}

impl From<PathBuf> for MergePart<'_> {
    fn from(path: PathBuf) -> Self {
        MergePart::Path(path)
    }
}

impl From<&Path> for MergePart<'_> {
    fn from(path: &Path) -> Self {
        MergePart::Path(path.to_path_buf())
    }
}

impl<'a> From<&'a mut Index> for MergePart<'a> {
    fn from(index: &'a mut Index) -> Self {
        MergePart::Index(index)
    }
}

/// Whether [`merge_on_disk`] can run on this platform.
pub fn is_on_disk_supported() -> bool {
    cfg!(unix)
}

#[derive(Debug, Clone, Copy)]
struct Shape {
    dimension: usize,
    nlist: usize,
    metric: MetricType,
    is_trained: bool,
    ntotal: usize,
    next_seq: u64,
}

enum Source<'p> {
    File {
        layout: IvfLayout,
        index_file: File,
        data_file: Option<File>,
    },
    Memory(&'p IvfIndex),
}

struct Input<'p> {
    position: usize,
    shape: Shape,
    /// Added to this part's insertion sequences in the merged index.
    seq_base: u64,
    source: Source<'p>,
}

impl<'p> Input<'p> {
    fn open(position: usize, part: &'p MergePart<'_>) -> Result<Self> {
        match part {
            MergePart::Path(path) => {
                let layout = codec::scan_ivf_file(path)?;
                let shape = Shape {
                    dimension: layout.header.dimension()?,
                    nlist: layout.config.nlist,
                    metric: layout.header.metric()?,
                    is_trained: layout.header.is_trained,
                    ntotal: layout.header.ntotal()?,
                    next_seq: layout.next_seq,
                };
                let index_file = File::open(path)?;
                let data_file = match &layout.lists {
                    ListLayout::Mapped { data_path, .. } => Some(File::open(data_path)?),
                    ListLayout::Inline(_) => None,
                };
                Ok(Self {
                    position,
                    shape,
                    seq_base: 0,
                    source: Source::File {
                        layout,
                        index_file,
                        data_file,
                    },
                })
            }
            MergePart::Index(index) => match index.get()? {
                AnyIndex::Ivf(ivf) => Ok(Self {
                    position,
                    shape: Shape {
                        dimension: ivf.dimension(),
                        nlist: ivf.nlist(),
                        metric: ivf.metric(),
                        is_trained: ivf.is_trained(),
                        ntotal: ivf.ntotal(),
                        next_seq: ivf.next_seq(),
                    },
                    seq_base: 0,
                    source: Source::Memory(ivf),
                }),
                other => Err(IndexError::argument(format!(
                    "part {position} is a {} index, on-disk merge needs IVF",
                    other.kind()
                ))),
            },
        }
    }

    fn config(&self) -> IvfConfig {
        match &self.source {
            Source::File { layout, .. } => layout.config,
            Source::Memory(ivf) => ivf.config(),
        }
    }

    fn quantizer(&self) -> &FlatIndex {
        match &self.source {
            Source::File { layout, .. } => &layout.quantizer,
            Source::Memory(ivf) => ivf.quantizer(),
        }
    }

    /// Stream list `l`'s codes to `out` and append its labels and rebased insertion
    /// sequences to `labels` and `seqs`. Returns the number of entries copied.
    fn copy_list<W: Write>(
        &mut self,
        l: usize,
        code_size: u64,
        labels: &mut Vec<Label>,
        seqs: &mut Vec<u64>,
        out: &mut W,
    ) -> Result<usize> {
        let base = self.seq_base;
        let before = labels.len();
        let (list_labels, list_seqs) = match &mut self.source {
            Source::Memory(ivf) => {
                ivf.lists().write_codes(l, out)?;
                (ivf.lists().labels(l).into_owned(), ivf.lists().seqs(l).into_owned())
            }
            Source::File {
                layout,
                index_file,
                data_file,
            } => match (&layout.lists, data_file) {
                (ListLayout::Inline(extents), _) => {
                    let extent = extents[l];
                    index_file.seek(SeekFrom::Start(extent.codes_at))?;
                    copy_exact(&mut *index_file, out, extent.count as u64 * code_size)?;
                    index_file.seek(SeekFrom::Start(extent.labels_at))?;
                    let mut reader = BufReader::with_capacity(config::IO_CHUNK_BYTES, &mut *index_file);
                    let list_labels = read_labels(&mut reader, extent.count)?;
                    let list_seqs = read_u64s(&mut reader, extent.count)?;
                    (list_labels, list_seqs)
                }
                (ListLayout::Mapped { lists, .. }, Some(data)) => {
                    let list = lists[l];
                    let count = usize::try_from(list.count)
                        .map_err(|_| IndexError::corrupt("list length does not fit in memory"))?;
                    let codes_len = list
                        .count
                        .checked_mul(code_size)
                        .ok_or_else(|| IndexError::corrupt("list length overflows"))?;
                    data.seek(SeekFrom::Start(list.offset))?;
                    copy_exact(&mut *data, out, codes_len)?;
                    data.seek(SeekFrom::Start(list.offset.saturating_add(codes_len)))?;
                    let mut reader = BufReader::with_capacity(config::IO_CHUNK_BYTES, &mut *data);
                    let list_labels = read_labels(&mut reader, count)?;
                    let list_seqs = read_u64s(&mut reader, count)?;
                    (list_labels, list_seqs)
                }
                (ListLayout::Mapped { .. }, None) => {
                    return Err(IndexError::corrupt(format!(
                        "part {} has mapped lists but no data file",
                        self.position
                    )));
                }
            },
        };
        labels.extend_from_slice(&list_labels);
        seqs.extend(list_seqs.iter().map(|&seq| base.saturating_add(seq)));
        Ok(labels.len() - before)
    }
}

fn copy_exact<R: Read, W: Write>(from: R, to: &mut W, len: u64) -> Result<()> {
    let copied = io::copy(&mut BufReader::with_capacity(config::IO_CHUNK_BYTES, from).take(len), to)?;
    if copied != len {
        return Err(IndexError::corrupt(format!(
            "posting data ends after {copied} of {len} bytes"
        )));
    }
    Ok(())
}

fn check_compatible(first: &Shape, input: &Input<'_>) -> Result<()> {
    let shape = &input.shape;
    if shape.dimension != first.dimension {
        return Err(IndexError::DimensionMismatch {
            expected: first.dimension,
            actual: shape.dimension,
        });
    }
    if shape.nlist != first.nlist {
        return Err(IndexError::argument(format!(
            "part {} has nlist {}, expected {}",
            input.position, shape.nlist, first.nlist
        )));
    }
    if shape.metric != first.metric {
        return Err(IndexError::argument(format!(
            "part {} uses metric {}, expected {}",
            input.position, shape.metric, first.metric
        )));
    }
    Ok(())
}

/// Write every list of every input into `path`, returning where each merged list lives.
fn write_postings(
    inputs: &mut [Input<'_>],
    nlist: usize,
    dimension: usize,
    path: &Path,
) -> Result<Vec<MappedList>> {
    let code_size = (dimension * std::mem::size_of::<f32>()) as u64;
    let file = File::create(path)?;
    let mut out = BufWriter::with_capacity(config::IO_CHUNK_BYTES, file);
    let mut lists = Vec::with_capacity(nlist);
    let mut offset = 0u64;
    let mut labels = Vec::new();
    let mut seqs = Vec::new();

    for l in 0..nlist {
        labels.clear();
        seqs.clear();
        for input in inputs.iter_mut() {
            input.copy_list(l, code_size, &mut labels, &mut seqs, &mut out)?;
        }
        write_labels(&mut out, &labels)?;
        write_u64s(&mut out, &seqs)?;

        let count = labels.len() as u64;
        tracing::debug!(list = l, postings = count, offset, "merged inverted list");
        lists.push(MappedList { offset, count });
        offset += MappedList::extent_bytes(count, dimension)
            .ok_or_else(|| IndexError::corrupt("merged list is too large"))?;
    }

    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(lists)
}

/// Merge IVF `parts` into `out_index`, with postings in `out_data`.
///
/// The first part must be trained and supplies the quantizer. The merged total is the sum
/// of the inputs' totals, with duplicate labels preserved. If the first part is an
/// in-memory index it is replaced by the merged index, whose lists map `out_data`.
/// Non-Unix platforms fail with [`IndexError::Unsupported`]; use
/// [`Index::merge_from`] there.
pub fn merge_on_disk(
    parts: &mut [MergePart<'_>],
    out_index: impl AsRef<Path>,
    out_data: impl AsRef<Path>,
) -> Result<()> {
    if !is_on_disk_supported() {
        return Err(IndexError::unsupported("IVF", "merge_on_disk"));
    }
    if parts.is_empty() {
        return Err(IndexError::argument("merge_on_disk needs at least one part"));
    }
    let (out_index, out_data) = (out_index.as_ref(), out_data.as_ref());

    let merged = {
        let mut inputs = parts
            .iter()
            .enumerate()
            .map(|(i, part)| Input::open(i, part))
            .collect::<Result<Vec<_>>>()?;

        let first = inputs[0].shape;
        if !first.is_trained {
            return Err(IndexError::NotTrained);
        }
        for input in &inputs[1..] {
            check_compatible(&first, input)?;
        }
        let expected: usize = inputs.iter().map(|input| input.shape.ntotal).sum();
        let mut next_seq = 0u64;
        for input in inputs.iter_mut() {
            input.seq_base = next_seq;
            next_seq = next_seq.saturating_add(input.shape.next_seq);
        }
        let config = inputs[0].config();
        let quantizer = inputs[0].quantizer().clone();

        let tmp = codec::tmp_path(out_data);
        let lists = match write_postings(&mut inputs, first.nlist, first.dimension, &tmp) {
            Ok(lists) => lists,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        drop(inputs);

        let total: u64 = lists.iter().map(|list| list.count).sum();
        if total != expected as u64 {
            let _ = fs::remove_file(&tmp);
            return Err(IndexError::corrupt(format!(
                "merged {total} postings but the inputs declare {expected}"
            )));
        }
        fs::rename(&tmp, out_data)?;

        let data_path = fs::canonicalize(out_data)?;
        let mapped = MappedLists::open(&data_path, first.dimension, lists)?;
        AnyIndex::Ivf(IvfIndex::from_parts(
            config,
            quantizer,
            true,
            InvertedLists::Mapped(mapped),
            next_seq,
        )?)
    };

    codec::write_file(out_index, &merged)?;
    tracing::info!(
        "Merged {} parts into {:?} ({} vectors, postings in {:?})",
        parts.len(),
        out_index,
        merged.ntotal(),
        out_data
    );

    if let MergePart::Index(first) = &mut parts[0] {
        first.replace(merged);
    }
    Ok(())
}
