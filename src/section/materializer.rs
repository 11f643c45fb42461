//! Turns a one-shot byte stream into a [`Section`].
//!
//! Up to `threshold` bytes are kept in memory. Anything larger is written to
//! an anonymous temp file (unlinked from the start) and mapped read-only, so
//! big attachments never grow the heap.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::Section;
use crate::error::{MailError, Result};

/// Default spill threshold (1 MiB).
pub const DEFAULT_THRESHOLD: usize = 1 << 20;

/// Builds sections, spilling to disk above a size threshold.
#[derive(Debug)]
pub struct Materializer {
    threshold: usize,
    temp_dir: Option<PathBuf>,
    spills: AtomicU64,
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl Materializer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            temp_dir: None,
            spills: AtomicU64::new(0),
        }
    }

    /// Create spill files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of sections that were spilled to a temp file so far.
    pub fn spills(&self) -> u64 {
        self.spills.load(Ordering::Relaxed)
    }

    /// Read `reader` to the end and return a random-access snapshot of it.
    pub fn materialize<R: Read>(&self, mut reader: R) -> Result<Section> {
        let limit = self.threshold as u64 + 1;
        let mut buf = Vec::with_capacity(self.threshold.min(64 * 1024));
        reader
            .by_ref()
            .take(limit)
            .read_to_end(&mut buf)
            .map_err(|source| MailError::Materialize {
                context: "read",
                source,
            })?;

        if buf.len() <= self.threshold {
            return Ok(Section::Memory(buf));
        }

        let section = self.spill(&buf, reader)?;
        self.spills.fetch_add(1, Ordering::Relaxed);
        debug!(size = section.len(), "Spilled section to temp file");
        Ok(section)
    }

    fn spill<R: Read>(&self, prefix: &[u8], mut rest: R) -> Result<Section> {
        let mut file = self.temp_file().map_err(|source| MailError::Materialize {
            context: "create temp file",
            source,
        })?;
        file.write_all(prefix)
            .map_err(|source| MailError::Materialize {
                context: "write temp file",
                source,
            })?;
        copy_rest(&mut rest, &mut file)?;
        file.flush().map_err(|source| MailError::Materialize {
            context: "flush temp file",
            source,
        })?;

        // SAFETY: the file is anonymous (already unlinked) and owned by us, so
        // nobody else can truncate or modify it while the mapping is alive.
        let map = unsafe { memmap2::Mmap::map(&file) }.map_err(|source| {
            MailError::Materialize {
                context: "mmap",
                source,
            }
        })?;
        Ok(Section::Mapped(map))
    }

    fn temp_file(&self) -> io::Result<File> {
        match &self.temp_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
    }
}

/// Like `io::copy`, but keeps read and write failures apart.
fn copy_rest<R: Read>(reader: &mut R, file: &mut File) -> Result<()> {
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(MailError::Materialize {
                    context: "read",
                    source,
                })
            }
        };
        file.write_all(&chunk[..n])
            .map_err(|source| MailError::Materialize {
                context: "write temp file",
                source,
            })?;
    }
}
