//! C1 — the byte-source adapter.
//!
//! The core treats its backing storage as an opaque, seekable byte range.
//! Anything that implements [`Read`] + [`Seek`] (a file, an in-memory
//! buffer, a pipe-backed temp file) can serve as one; short reads are
//! treated as I/O errors, matching the "exact-length reads" contract in
//! the format specification.

use std::io::{self, Read, Seek, SeekFrom};

/// Minimum contract a storage-media handle must satisfy: random-offset
/// reads of an exact size, and a total size.
pub trait ByteSource: std::fmt::Debug {
    /// Reads exactly `buf.len()` bytes starting at `offset`. A short read
    /// is an error, not a partial result.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Total size of the underlying storage, in bytes.
    fn size(&mut self) -> io::Result<u64>;

    /// Releases any resources held by the source. A no-op by default.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T> ByteSource for T
where
    T: Read + Seek + std::fmt::Debug,
{
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        let current = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(current))?;
        Ok(end)
    }
}
