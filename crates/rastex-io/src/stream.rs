//! Byte-stream abstraction for codec I/O.
//!
//! Codecs read and write through [`Stream`], a combined bound over the
//! standard I/O traits; files, in-memory buffers and filter streams all
//! qualify. Short reads are permitted and callers must check. Probe
//! routines save the position with [`StreamExt::tell`] before touching
//! the stream and restore it on every exit path.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use rastex_core::{Error, Result};

/// Combined trait bound for codec byte streams.
///
/// Automatically implemented for any `Read + Write + Seek + Send` type,
/// including [`std::fs::File`] and [`MemoryStream`].
pub trait Stream: Read + Write + Seek + Send {}
impl<T: Read + Write + Seek + Send + ?Sized> Stream for T {}

/// Position and size helpers available on every [`Stream`].
pub trait StreamExt: Stream {
    /// Current stream position.
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    /// Total stream size, preserving the current position.
    fn stream_size(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }
}
impl<S: Stream + ?Sized> StreamExt for S {}

/// Reads exactly `count` bytes, reporting truncation with context.
pub fn read_exact_buf(stream: &mut dyn Stream, count: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    stream.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::StreamTruncated(what.to_string())
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}

/// A growable in-memory stream.
///
/// Mostly used by tests and by hosts that assemble containers in memory
/// before flushing them to disk.
#[derive(Debug, Default)]
pub struct MemoryStream {
    cursor: Cursor<Vec<u8>>,
}

impl MemoryStream {
    /// Creates an empty stream positioned at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing buffer, positioned at zero.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Borrows the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    /// Unwraps into the underlying buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.cursor.flush()
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

/// A read-only view of a stream whose origin is the stream position at
/// construction time.
///
/// Lets a parser that assumes absolute offsets (e.g. the `tiff` crate's
/// decoder) operate on a container embedded mid-stream.
pub struct SubStream<'a> {
    inner: &'a mut dyn Stream,
    base: u64,
}

impl<'a> SubStream<'a> {
    /// Creates a view rooted at the stream's current position.
    pub fn new(inner: &'a mut dyn Stream) -> io::Result<Self> {
        let base = inner.stream_position()?;
        Ok(Self { inner, base })
    }
}

impl Read for SubStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for SubStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let abs = match pos {
            SeekFrom::Start(n) => self.inner.seek(SeekFrom::Start(self.base + n))?,
            SeekFrom::Current(d) => self.inner.seek(SeekFrom::Current(d))?,
            SeekFrom::End(d) => self.inner.seek(SeekFrom::End(d))?,
        };
        Ok(abs.saturating_sub(self.base))
    }
}
