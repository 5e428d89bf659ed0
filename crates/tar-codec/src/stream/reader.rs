//! Bounded reads over a chunked byte source.
//!
//! A [`ByteSource`] hands out chunks of whatever size it likes. The
//! [`LookaheadReader`] on top of it serves exact-size windows (for header
//! blocks and extension payloads) and capped windows (for bodies), keeping
//! the unread tail of the last chunk as leftover for the next call.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};
use log::{debug, warn};

use super::{Result, StreamError};

/// A pull-based source of byte chunks.
pub trait ByteSource {
    /// Return the next chunk, or `None` once the source is exhausted.
    ///
    /// Chunks may have any length; empty chunks are skipped by the reader.
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// Release resources held by the source. Called at most once.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        (**self).next_chunk()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        (**self).next_chunk()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// A [`ByteSource`] pulling fixed-capacity chunks from an [`io::Read`].
///
/// Closing the source drops the reader.
pub struct ReadSource<R> {
    reader: Option<R>,
    chunk_size: usize,
}

impl<R: Read> ReadSource<R> {
    /// Wrap a reader, pulling up to `chunk_size` bytes per chunk.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: Some(reader),
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut buf = BytesMut::zeroed(self.chunk_size);
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf.freeze()));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

impl<R> std::fmt::Debug for ReadSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSource")
            .field("open", &self.reader.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// A [`ByteSource`] over an iterator of chunks.
pub struct IterSource<I> {
    iter: Option<I>,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = io::Result<Bytes>>,
{
    /// Wrap anything that iterates over chunk results.
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: Some(iter.into_iter()),
        }
    }
}

impl<I> ByteSource for IterSource<I>
where
    I: Iterator<Item = io::Result<Bytes>>,
{
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self.iter.as_mut() {
            Some(iter) => iter.next().transpose(),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.iter = None;
        Ok(())
    }
}

impl<I> std::fmt::Debug for IterSource<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterSource")
            .field("open", &self.iter.is_some())
            .finish()
    }
}

/// Exact and capped reads over a [`ByteSource`], with one leftover buffer.
///
/// When a single chunk covers a request the result is a slice of that
/// chunk; bytes are only copied when a window spans several chunks.
pub struct LookaheadReader<S: ByteSource> {
    source: S,
    leftover: Bytes,
    position: u64,
    exhausted: bool,
    released: bool,
}

impl<S: ByteSource> LookaheadReader<S> {
    /// Create a reader over `source`.
    pub fn new(source: S) -> Self {
        Self {
            source,
            leftover: Bytes::new(),
            position: 0,
            exhausted: false,
            released: false,
        }
    }

    /// Number of bytes handed out so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    fn pull(&mut self) -> Result<Option<Bytes>> {
        while !self.exhausted && !self.released {
            match self.source.next_chunk()? {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => return Ok(Some(chunk)),
                None => self.exhausted = true,
            }
        }
        Ok(None)
    }

    fn take_leftover(&mut self, n: usize) -> Bytes {
        let out = self.leftover.split_to(n);
        self.position += out.len() as u64;
        out
    }

    /// Read exactly `n` bytes.
    ///
    /// Returns `Ok(None)` if the source was already exhausted, and
    /// [`StreamError::UnderRead`] if it ended partway through.
    pub fn next_exact(&mut self, n: usize) -> Result<Option<Bytes>> {
        if self.leftover.len() >= n {
            return Ok(Some(self.take_leftover(n)));
        }
        if self.leftover.is_empty() {
            match self.pull()? {
                Some(chunk) => self.leftover = chunk,
                None => return Ok(None),
            }
            if self.leftover.len() >= n {
                return Ok(Some(self.take_leftover(n)));
            }
        }

        let mut buf = BytesMut::with_capacity(n);
        loop {
            let take = (n - buf.len()).min(self.leftover.len());
            buf.extend_from_slice(&self.take_leftover(take));
            if buf.len() == n {
                return Ok(Some(buf.freeze()));
            }
            match self.pull()? {
                Some(chunk) => self.leftover = chunk,
                None => {
                    return Err(StreamError::UnderRead {
                        expected: n as u64,
                        actual: buf.len() as u64,
                    })
                }
            }
        }
    }

    /// Read the leftover if there is one, else the next chunk of the source.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.leftover.is_empty() {
            match self.pull()? {
                Some(chunk) => self.leftover = chunk,
                None => return Ok(None),
            }
        }
        let len = self.leftover.len();
        Ok(Some(self.take_leftover(len)))
    }

    /// Like [`next_chunk`](Self::next_chunk), but at most `n` bytes. The rest
    /// of the chunk stays buffered.
    pub fn next_at_most(&mut self, n: usize) -> Result<Option<Bytes>> {
        if n == 0 {
            return Ok(Some(Bytes::new()));
        }
        if self.leftover.is_empty() {
            match self.pull()? {
                Some(chunk) => self.leftover = chunk,
                None => return Ok(None),
            }
        }
        let take = n.min(self.leftover.len());
        Ok(Some(self.take_leftover(take)))
    }

    /// Discard exactly `n` bytes.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        let mut remaining = n;
        while remaining > 0 {
            if self.leftover.is_empty() {
                match self.pull()? {
                    Some(chunk) => self.leftover = chunk,
                    None => {
                        return Err(StreamError::UnderRead {
                            expected: n,
                            actual: n - remaining,
                        })
                    }
                }
            }
            let take = usize::try_from(remaining)
                .unwrap_or(usize::MAX)
                .min(self.leftover.len());
            self.take_leftover(take);
            remaining -= take as u64;
        }
        Ok(())
    }

    /// Close the source. Later calls do nothing and later reads see an
    /// exhausted source.
    pub fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.leftover = Bytes::new();
        debug!("releasing byte source at position {}", self.position);
        self.source.close()
    }
}

impl<S: ByteSource> Drop for LookaheadReader<S> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed to close byte source: {e}");
        }
    }
}

impl<S: ByteSource> std::fmt::Debug for LookaheadReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookaheadReader")
            .field("position", &self.position)
            .field("leftover", &self.leftover.len())
            .field("exhausted", &self.exhausted)
            .field("released", &self.released)
            .finish()
    }
}
