//! Random-access body snapshots.
//!
//! A [`Section`] is a finite, re-readable view over the bytes of one body.
//! Small bodies live in memory; large ones are spilled by the
//! [`Materializer`] into an anonymous temp file and memory-mapped.

pub mod materializer;

use std::io::{self, Read, Seek, SeekFrom};

pub use materializer::{Materializer, DEFAULT_THRESHOLD};

/// Positional reads over a fixed-size byte source.
pub trait ReadAt {
    /// Read into `buf` starting at `offset`. Returns `Ok(0)` at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size in bytes.
    fn size(&self) -> u64;
}

/// An owned body snapshot, either in memory or backed by a read-only mapping.
pub enum Section {
    Memory(Vec<u8>),
    Mapped(memmap2::Mmap),
}

impl Section {
    /// Wrap bytes that are already in memory.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::Memory(data)
    }

    /// The whole section as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Memory(data) => data,
            Self::Mapped(map) => map,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if the bytes live in a mapped temp file.
    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }

    /// A fresh cursor positioned at offset 0.
    pub fn reader(&self) -> SectionReader<'_> {
        SectionReader {
            section: self,
            pos: 0,
        }
    }
}

impl ReadAt for Section {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.as_bytes();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.as_bytes().len() as u64
    }
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_mapped() { "Mapped" } else { "Memory" };
        f.debug_struct("Section")
            .field("kind", &kind)
            .field("size", &self.size())
            .finish()
    }
}

/// Sequential `Read + Seek` cursor over a [`Section`].
///
/// Cursors are independent: creating a new one always starts at offset 0,
/// whatever other readers have consumed.
#[derive(Debug, Clone)]
pub struct SectionReader<'a> {
    section: &'a Section,
    pos: u64,
}

impl Read for SectionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.section.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SectionReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.section.size() as i128;
        let target = match pos {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::End(delta) => size + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of section",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_at_bounds() {
        let section = Section::from_vec(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        assert_eq!(section.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(section.read_at(9, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ld");
        assert_eq!(section.read_at(11, &mut buf).unwrap(), 0);
        assert_eq!(section.read_at(u64::MAX, &mut buf).unwrap(), 0);
        assert_eq!(section.size(), 11);
    }

    #[test]
    fn test_reader_seek_and_reread() {
        let section = Section::from_vec(b"abcdef".to_vec());
        let mut reader = section.reader();
        let mut first = String::new();
        reader.read_to_string(&mut first).unwrap();
        assert_eq!(first, "abcdef");

        reader.seek(SeekFrom::End(-2)).unwrap();
        let mut tail = String::new();
        reader.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "ef");

        assert!(reader.seek(SeekFrom::Current(-100)).is_err());

        let mut again = String::new();
        section.reader().read_to_string(&mut again).unwrap();
        assert_eq!(again, "abcdef");
    }
}
