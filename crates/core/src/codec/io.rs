//! Checksumming stream adapters and little-endian section helpers.

use std::io::{self, Read, Write};

use crate::config;
use crate::result::Label;

/// Writer that feeds every byte it passes through into a CRC32.
pub struct HashingWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Checksum of everything written so far, plus the wrapped writer.
    pub fn finish(self) -> (u32, W) {
        (self.hasher.finalize(), self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that checksums every byte handed out and tracks its position.
pub struct HashingReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Checksum of everything read so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// The wrapped reader, for reading the unhashed footer.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Consume and hash `len` bytes without keeping them.
    pub fn skip(&mut self, len: u64) -> io::Result<()> {
        let copied = io::copy(&mut self.by_ref().take(len), &mut io::sink())?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "index data ends inside a section",
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

pub fn write_u32<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_u64<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Write floats as little-endian bytes in bounded chunks.
pub fn write_f32s<W: Write>(w: &mut W, values: &[f32]) -> io::Result<()> {
    let per_chunk = config::IO_CHUNK_BYTES / 4;
    let mut buf = Vec::with_capacity(per_chunk.min(values.len()) * 4);
    for chunk in values.chunks(per_chunk) {
        buf.clear();
        for v in chunk {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

/// Read `count` little-endian floats. Storage grows as data arrives, so a corrupt count
/// fails with `UnexpectedEof` instead of a huge allocation.
pub fn read_f32s<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<f32>> {
    let per_chunk = config::IO_CHUNK_BYTES / 4;
    let mut out = Vec::with_capacity(count.min(per_chunk));
    let mut buf = vec![0u8; per_chunk.min(count) * 4];
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(per_chunk);
        let bytes = &mut buf[..take * 4];
        r.read_exact(bytes)?;
        out.extend(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
        remaining -= take;
    }
    Ok(out)
}

pub fn write_labels<W: Write>(w: &mut W, labels: &[Label]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(labels.len().min(config::IO_CHUNK_BYTES / 8) * 8);
    for chunk in labels.chunks(config::IO_CHUNK_BYTES / 8) {
        buf.clear();
        for l in chunk {
            buf.extend_from_slice(&l.to_le_bytes());
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

pub fn read_labels<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<Label>> {
    let per_chunk = config::IO_CHUNK_BYTES / 8;
    let mut out = Vec::with_capacity(count.min(per_chunk));
    let mut buf = [0u8; 8];
    for _ in 0..count {
        r.read_exact(&mut buf)?;
        out.push(Label::from_le_bytes(buf));
    }
    Ok(out)
}

/// Write unsigned 64-bit values (insertion sequences) as little-endian bytes.
pub fn write_u64s<W: Write>(w: &mut W, values: &[u64]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(values.len().min(config::IO_CHUNK_BYTES / 8) * 8);
    for chunk in values.chunks(config::IO_CHUNK_BYTES / 8) {
        buf.clear();
        for v in chunk {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

pub fn read_u64s<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<u64>> {
    let mut out = Vec::with_capacity(count.min(config::IO_CHUNK_BYTES / 8));
    for _ in 0..count {
        out.push(read_u64(r)?);
    }
    Ok(out)
}
