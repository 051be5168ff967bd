//! Inverted-list storage for the IVF backend.
//!
//! Lists are either resident (owned vectors) or mapped onto an external data file produced
//! by on-disk merge and read through `memmap2`. A mapped list occupies one contiguous
//! extent of the data file:
//!
//! ```text
//! codes (count * d f32 LE) | labels (count i64 LE) | insertion sequences (count u64 LE)
//! ```
//!
//! Only offsets and counts stay in memory for mapped lists. Read paths work on both forms.
//! Mutation first materializes mapped lists.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{IndexError, Result};
use crate::result::Label;

const F32_BYTES: usize = std::mem::size_of::<f32>();
const U64_BYTES: usize = std::mem::size_of::<u64>();

/// One resident posting list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvertedList {
    pub labels: Vec<Label>,
    /// Insertion sequence of each entry. Larger is newer.
    pub seqs: Vec<u64>,
    /// Row-major, `labels.len() * dimension` floats.
    pub codes: Vec<f32>,
}

impl InvertedList {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Location of one list inside a data file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedList {
    /// Byte offset of the list's extent.
    pub offset: u64,
    pub count: u64,
}

impl MappedList {
    /// Bytes taken by a list of `count` entries of `dimension` floats.
    pub fn extent_bytes(count: u64, dimension: usize) -> Option<u64> {
        let per_entry = (dimension * F32_BYTES + 2 * U64_BYTES) as u64;
        count.checked_mul(per_entry)
    }
}

/// Lists whose postings live in an external data file.
#[derive(Debug)]
pub struct MappedLists {
    data_path: PathBuf,
    dimension: usize,
    lists: Vec<MappedList>,
    mmap: Option<Mmap>,
}

impl MappedLists {
    /// Map `data_path` and check every list lies inside it.
    pub fn open(data_path: impl AsRef<Path>, dimension: usize, lists: Vec<MappedList>) -> Result<Self> {
        let data_path = data_path.as_ref().to_path_buf();
        let file = File::open(&data_path)?;
        let len = file.metadata()?.len();

        for (i, list) in lists.iter().enumerate() {
            let end = MappedList::extent_bytes(list.count, dimension)
                .and_then(|bytes| bytes.checked_add(list.offset));
            if end.map_or(true, |end| end > len) || usize::try_from(list.count).is_err() {
                return Err(IndexError::corrupt(format!(
                    "list {i} extends past the end of {}",
                    data_path.display()
                )));
            }
        }

        // Zero-length maps are rejected on some platforms.
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { MmapOptions::new().map(&file)? })
        };
        tracing::debug!(path = %data_path.display(), bytes = len, "mapped inverted lists");
        Ok(Self {
            data_path,
            dimension,
            lists,
            mmap,
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn lists(&self) -> &[MappedList] {
        &self.lists
    }

    fn count(&self, list: usize) -> usize {
        self.lists[list].count as usize
    }

    /// Bytes `[skip, skip + len)` of list `list`'s extent.
    fn extent(&self, list: usize, skip: usize, len: usize) -> &[u8] {
        match &self.mmap {
            Some(map) => {
                let start = self.lists[list].offset as usize + skip;
                &map[start..start + len]
            }
            None => &[],
        }
    }

    fn code_bytes(&self, list: usize) -> &[u8] {
        let n = self.count(list);
        self.extent(list, 0, n * self.dimension * F32_BYTES)
    }

    fn label_bytes(&self, list: usize) -> &[u8] {
        let n = self.count(list);
        self.extent(list, n * self.dimension * F32_BYTES, n * U64_BYTES)
    }

    fn seq_bytes(&self, list: usize) -> &[u8] {
        let n = self.count(list);
        self.extent(list, n * (self.dimension * F32_BYTES + U64_BYTES), n * U64_BYTES)
    }
}

/// Resident or mapped posting lists.
#[derive(Debug)]
pub enum InvertedLists {
    Resident(Vec<InvertedList>),
    Mapped(MappedLists),
}

impl InvertedLists {
    pub fn resident(nlist: usize) -> Self {
        InvertedLists::Resident(vec![InvertedList::default(); nlist])
    }

    pub fn nlist(&self) -> usize {
        match self {
            InvertedLists::Resident(lists) => lists.len(),
            InvertedLists::Mapped(m) => m.lists.len(),
        }
    }

    /// Labels of one list. Borrowed for resident lists, decoded for mapped ones.
    pub fn labels(&self, list: usize) -> Cow<'_, [Label]> {
        match self {
            InvertedLists::Resident(lists) => Cow::Borrowed(&lists[list].labels),
            InvertedLists::Mapped(m) => Cow::Owned(
                m.label_bytes(list)
                    .chunks_exact(U64_BYTES)
                    .map(|b| Label::from_le_bytes(b.try_into().unwrap_or_default()))
                    .collect(),
            ),
        }
    }

    /// Insertion sequences of one list, parallel to [`labels`](Self::labels).
    pub fn seqs(&self, list: usize) -> Cow<'_, [u64]> {
        match self {
            InvertedLists::Resident(lists) => Cow::Borrowed(&lists[list].seqs),
            InvertedLists::Mapped(m) => Cow::Owned(
                m.seq_bytes(list)
                    .chunks_exact(U64_BYTES)
                    .map(|b| u64::from_le_bytes(b.try_into().unwrap_or_default()))
                    .collect(),
            ),
        }
    }

    pub fn list_len(&self, list: usize) -> usize {
        match self {
            InvertedLists::Resident(lists) => lists[list].len(),
            InvertedLists::Mapped(m) => m.count(list),
        }
    }

    pub fn total(&self) -> usize {
        (0..self.nlist()).map(|l| self.list_len(l)).sum()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, InvertedLists::Mapped(_))
    }

    /// Codes of one list as floats. Borrowed for resident lists, decoded for mapped ones.
    pub fn codes(&self, list: usize) -> Cow<'_, [f32]> {
        match self {
            InvertedLists::Resident(lists) => Cow::Borrowed(&lists[list].codes),
            InvertedLists::Mapped(m) => Cow::Owned(decode_f32s(m.code_bytes(list))),
        }
    }

    /// Vector at `offset` within `list`.
    pub fn vector(&self, list: usize, offset: usize, dimension: usize) -> Vec<f32> {
        match self {
            InvertedLists::Resident(lists) => {
                lists[list].codes[offset * dimension..(offset + 1) * dimension].to_vec()
            }
            InvertedLists::Mapped(m) => {
                let row = dimension * F32_BYTES;
                decode_f32s(&m.code_bytes(list)[offset * row..(offset + 1) * row])
            }
        }
    }

    /// Stream one list's codes as little-endian bytes, in bounded chunks.
    pub fn write_codes<W: Write>(&self, list: usize, out: &mut W) -> io::Result<()> {
        match self {
            InvertedLists::Resident(lists) => {
                let per_chunk = (config::IO_CHUNK_BYTES / F32_BYTES).max(1);
                let mut buf = Vec::with_capacity(per_chunk * F32_BYTES);
                for chunk in lists[list].codes.chunks(per_chunk) {
                    buf.clear();
                    for v in chunk {
                        buf.extend_from_slice(&v.to_le_bytes());
                    }
                    out.write_all(&buf)?;
                }
                Ok(())
            }
            InvertedLists::Mapped(m) => {
                for chunk in m.code_bytes(list).chunks(config::IO_CHUNK_BYTES) {
                    out.write_all(chunk)?;
                }
                Ok(())
            }
        }
    }

    /// Resident lists for mutation, materializing mapped lists first.
    pub fn make_resident(&mut self) -> &mut Vec<InvertedList> {
        if self.is_mapped() {
            let lists: Vec<InvertedList> = (0..self.nlist())
                .map(|l| InvertedList {
                    labels: self.labels(l).into_owned(),
                    seqs: self.seqs(l).into_owned(),
                    codes: self.codes(l).into_owned(),
                })
                .collect();
            if let InvertedLists::Mapped(m) = self {
                tracing::debug!(path = %m.data_path.display(), "materialized mapped inverted lists");
            }
            *self = InvertedLists::Resident(lists);
        }
        match self {
            InvertedLists::Resident(lists) => lists,
            InvertedLists::Mapped(_) => unreachable!("converted above"),
        }
    }
}

pub(crate) fn decode_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(F32_BYTES)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
