//! Decoding a tar stream into a lazy sequence of entries.

use std::io::{self, Read};

use bytes::Bytes;
use log::{debug, trace, warn};

use super::reader::{ByteSource, LookaheadReader, ReadSource};
use super::{Result, StreamError};
use crate::pax::{
    decode_long_name, decode_pax, parse_pax_seconds, PAX_GID, PAX_GNAME, PAX_LINKPATH, PAX_MTIME,
    PAX_PATH, PAX_SIZE, PAX_UID, PAX_UNAME,
};
use crate::{
    decode_block, padding_for, DecodeOptions, EntryType, Header, HeaderError, PaxMap, BLOCK_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitHeader,
    Body { size: u64, remaining: u64, padding: u64 },
    End,
    Failed,
}

/// A decoded extension record.
#[derive(Debug)]
enum Extension {
    LongPath(String),
    LongLinkPath(String),
    Pax(PaxMap),
    GlobalPax(PaxMap),
}

/// Extension records waiting for the next real header.
#[derive(Debug, Default)]
struct CarryState {
    long_path: Option<String>,
    long_link_path: Option<String>,
    /// Defaults from the latest global record. Survives across entries.
    global: PaxMap,
    local: Option<PaxMap>,
    pending: usize,
}

impl CarryState {
    fn absorb(&mut self, ext: Extension) {
        match ext {
            Extension::LongPath(path) => self.long_path = Some(path),
            Extension::LongLinkPath(path) => self.long_link_path = Some(path),
            Extension::Pax(map) => self.local.get_or_insert_with(PaxMap::new).extend(map),
            Extension::GlobalPax(map) => self.global = map,
        }
    }

    fn has_local(&self) -> bool {
        self.long_path.is_some() || self.long_link_path.is_some() || self.local.is_some()
    }

    /// Apply and clear the per-entry records. GNU long names go first, so a
    /// PAX `path` or `linkpath` wins over them.
    fn fold_into(&mut self, header: &mut Header) -> Result<()> {
        self.pending = 0;
        if let Some(path) = self.long_path.take() {
            header.name = path;
        }
        if let Some(path) = self.long_link_path.take() {
            header.linkname = Some(path);
        }

        let local = self.local.take();
        if self.global.is_empty() && local.is_none() {
            return Ok(());
        }
        let mut pax = self.global.clone();
        pax.extend(local.unwrap_or_default());
        apply_pax(header, &pax)?;
        if !pax.is_empty() {
            header.pax = Some(pax);
        }
        Ok(())
    }
}

fn apply_pax(header: &mut Header, pax: &PaxMap) -> Result<()> {
    for (key, value) in pax {
        match key.as_str() {
            PAX_PATH => header.name.clone_from(value),
            PAX_LINKPATH => header.linkname = Some(value.clone()),
            PAX_SIZE => {
                header.size = value
                    .parse()
                    .map_err(|_| HeaderError::InvalidPax("size is not a decimal integer"))?;
            }
            PAX_UID => match value.parse() {
                Ok(uid) => header.uid = uid,
                Err(_) => warn!("ignoring invalid PAX uid {value:?} for {}", header.name),
            },
            PAX_GID => match value.parse() {
                Ok(gid) => header.gid = gid,
                Err(_) => warn!("ignoring invalid PAX gid {value:?} for {}", header.name),
            },
            PAX_MTIME => match parse_pax_seconds(value) {
                Some(mtime) => header.mtime = mtime,
                None => warn!("ignoring invalid PAX mtime {value:?} for {}", header.name),
            },
            PAX_UNAME => header.uname.clone_from(value),
            PAX_GNAME => header.gname.clone_from(value),
            _ => {}
        }
    }
    Ok(())
}

/// Streaming tar decoder.
///
/// Extension records (GNU long names, PAX headers) are folded into the
/// header that follows them, so only real entries are yielded. Each entry
/// borrows the decoder for its [`Body`]; whatever part of the body is left
/// unread is skipped when the next entry is requested.
///
/// The decoder stops at the first error: later calls to
/// [`next_entry`](Self::next_entry) return [`StreamError::Stopped`], so a
/// truncated archive is never mistaken for a complete one. The byte source
/// is closed exactly once, at the end of the archive, on error, or on drop.
///
/// ```
/// use tar_codec::stream::{TarDecoder, TarEncoder};
/// use tar_codec::{EntryType, Header};
///
/// let mut encoder = TarEncoder::new(Vec::new());
/// let dir = Header {
///     name: "dir/".into(),
///     entry_type: EntryType::Directory,
///     mode: 0o755,
///     ..Header::default()
/// };
/// encoder.append_bytes(&dir, b"").unwrap();
/// let archive = encoder.finish().unwrap();
///
/// let mut decoder = TarDecoder::from_reader(&archive[..]);
/// let entry = decoder.next_entry().unwrap().unwrap();
/// assert_eq!(entry.header.entry_type, EntryType::Directory);
/// assert_eq!(entry.body.size(), 0);
/// drop(entry);
/// assert!(decoder.next_entry().unwrap().is_none());
/// ```
pub struct TarDecoder<S: ByteSource> {
    reader: LookaheadReader<S>,
    options: DecodeOptions,
    state: State,
    carry: CarryState,
}

impl<R: Read> TarDecoder<ReadSource<R>> {
    /// Decode from an [`io::Read`] with default options.
    pub fn from_reader(reader: R) -> Self {
        Self::from_reader_with_options(reader, DecodeOptions::default())
    }

    /// Decode from an [`io::Read`], pulling `options.chunk_size` bytes at a
    /// time.
    pub fn from_reader_with_options(reader: R, options: DecodeOptions) -> Self {
        let source = ReadSource::new(reader, options.chunk_size);
        Self::with_options(source, options)
    }
}

impl<S: ByteSource> TarDecoder<S> {
    /// Decode from a byte source with default options.
    pub fn new(source: S) -> Self {
        Self::with_options(source, DecodeOptions::default())
    }

    /// Decode from a byte source.
    pub fn with_options(source: S, options: DecodeOptions) -> Self {
        Self {
            reader: LookaheadReader::new(source),
            options,
            state: State::AwaitHeader,
            carry: CarryState::default(),
        }
    }

    /// Number of archive bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Return the next entry, or `None` at the end of the archive.
    ///
    /// # Errors
    ///
    /// Fails on malformed headers or extension records, on exceeded
    /// [`Limits`](crate::Limits), when the stream ends inside a block or
    /// payload, and on I/O errors from the source.
    pub fn next_entry(&mut self) -> Result<Option<Entry<'_, S>>> {
        match self.advance() {
            Ok(Some(header)) => {
                let size = header.size;
                Ok(Some(Entry {
                    header,
                    body: Body {
                        decoder: self,
                        size,
                    },
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn fail(&mut self) {
        self.state = State::Failed;
        if let Err(e) = self.reader.release() {
            warn!("failed to close byte source: {e}");
        }
    }

    fn end(&mut self) -> Result<Option<Header>> {
        debug!("end of archive at position {}", self.position());
        self.state = State::End;
        if self.carry.has_local() {
            return Err(StreamError::OrphanedMetadata);
        }
        self.reader.release()?;
        Ok(None)
    }

    fn drain_body(&mut self) -> Result<()> {
        if let State::Body {
            remaining, padding, ..
        } = self.state
        {
            if remaining > 0 {
                debug!("discarding {remaining} unread body bytes");
            }
            self.reader.skip(remaining)?;
            self.reader.skip(padding)?;
            self.state = State::AwaitHeader;
        }
        Ok(())
    }

    fn read_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>> {
        Ok(self.reader.next_exact(BLOCK_SIZE)?.map(|bytes| {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&bytes);
            block
        }))
    }

    fn advance(&mut self) -> Result<Option<Header>> {
        match self.state {
            State::End => return Ok(None),
            State::Failed => return Err(StreamError::Stopped),
            _ => {}
        }
        self.drain_body()?;

        let mut zero_blocks = 0;
        loop {
            let Some(block) = self.read_block()? else {
                return self.end();
            };
            let Some(mut header) = decode_block(&block, self.options.name_encoding)? else {
                zero_blocks += 1;
                if zero_blocks == 2 {
                    return self.end();
                }
                trace!("skipping zero block at position {}", self.position());
                continue;
            };
            zero_blocks = 0;

            if header.entry_type.is_extension() {
                let limits = &self.options.limits;
                self.carry.pending += 1;
                if self.carry.pending > limits.max_pending_entries {
                    return Err(StreamError::TooManyPendingEntries {
                        count: self.carry.pending,
                        limit: limits.max_pending_entries,
                    });
                }
                let ext = self.read_extension(&header)?;
                self.carry.absorb(ext);
                continue;
            }

            self.carry.fold_into(&mut header)?;
            // Old-style files are directories when their full name ends in a
            // slash, which the truncated name in the block may not show.
            if matches!(block[156], b'0' | b'\0') {
                header.entry_type = if header.name.ends_with('/') {
                    EntryType::Directory
                } else {
                    EntryType::File
                };
            }
            self.check_path_len(&header)?;
            self.begin_body(&mut header)?;
            return Ok(Some(header));
        }
    }

    fn read_extension(&mut self, header: &Header) -> Result<Extension> {
        let size = header.size;
        let limits = &self.options.limits;
        let too_large = match header.entry_type {
            EntryType::GnuLongPath | EntryType::GnuLongLinkPath => {
                // The payload carries the name and its terminating NUL.
                let max = limits.max_gnu_long_size.saturating_add(1);
                (size > max).then_some(StreamError::GnuLongTooLarge {
                    size,
                    limit: limits.max_gnu_long_size,
                })
            }
            _ => (size > limits.max_pax_size).then_some(StreamError::PaxTooLarge {
                size,
                limit: limits.max_pax_size,
            }),
        };
        if let Some(e) = too_large {
            return Err(e);
        }

        let len = usize::try_from(size).map_err(|_| StreamError::PaxTooLarge {
            size,
            limit: usize::MAX as u64,
        })?;
        let payload = self
            .reader
            .next_exact(len)?
            .ok_or(StreamError::UnderRead {
                expected: size,
                actual: 0,
            })?;
        self.reader.skip(padding_for(size))?;
        trace!("{:?} record with {size} byte payload", header.entry_type);

        let encoding = self.options.name_encoding;
        Ok(match header.entry_type {
            EntryType::GnuLongPath => Extension::LongPath(decode_long_name(&payload, encoding)),
            EntryType::GnuLongLinkPath => {
                Extension::LongLinkPath(decode_long_name(&payload, encoding))
            }
            EntryType::PaxGlobalHeader => Extension::GlobalPax(decode_pax(&payload)?),
            _ => Extension::Pax(decode_pax(&payload)?),
        })
    }

    fn check_path_len(&self, header: &Header) -> Result<()> {
        let limit = self.options.limits.max_path_len;
        let paths = std::iter::once(&header.name).chain(header.linkname.as_ref());
        for path in paths {
            if path.len() > limit {
                return Err(StreamError::PathTooLong {
                    len: path.len(),
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Normalize the size of body-less entries and set up the body cursor.
    fn begin_body(&mut self, header: &mut Header) -> Result<()> {
        let stored = header.size;
        header.size = header.body_size();
        // Directories never have data blocks. Other body-less types may
        // still have stored some, which nobody can read.
        if stored > 0 && !header.entry_type.has_body() && header.entry_type != EntryType::Directory
        {
            trace!("skipping {stored} data bytes of {:?} entry", header.entry_type);
            self.reader.skip(stored)?;
            self.reader.skip(padding_for(stored))?;
        }
        self.state = State::Body {
            size: header.size,
            remaining: header.size,
            padding: padding_for(header.size),
        };
        Ok(())
    }
}

impl<S: ByteSource> std::fmt::Debug for TarDecoder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarDecoder")
            .field("state", &self.state)
            .field("position", &self.position())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// One decoded entry: its resolved header and a cursor over its body.
pub struct Entry<'a, S: ByteSource> {
    /// Header with extension records applied.
    pub header: Header,
    /// The entry's data.
    pub body: Body<'a, S>,
}

impl<S: ByteSource> std::fmt::Debug for Entry<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("header", &self.header)
            .field("body", &self.body)
            .finish()
    }
}

/// Forward-only cursor over the body of an [`Entry`].
///
/// Chunks are handed out as the source produces them, never crossing the
/// end of the body. Also usable as an [`Iterator`] of chunks or as an
/// [`io::Read`].
pub struct Body<'a, S: ByteSource> {
    decoder: &'a mut TarDecoder<S>,
    size: u64,
}

impl<S: ByteSource> Body<'_, S> {
    /// Total body size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        match self.decoder.state {
            State::Body { remaining, .. } => remaining,
            _ => 0,
        }
    }

    /// Read the next chunk of the body, or `None` once it is complete.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnderRead`] if the source ends early.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.read_window(usize::MAX)
    }

    /// Read the rest of the body into memory.
    ///
    /// # Errors
    ///
    /// Same as [`next_chunk`](Self::next_chunk).
    pub fn to_vec(&mut self) -> Result<Vec<u8>> {
        let capacity = usize::try_from(self.remaining()).unwrap_or(0).min(1 << 20);
        let mut out = Vec::with_capacity(capacity);
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn read_window(&mut self, max: usize) -> Result<Option<Bytes>> {
        let (size, remaining) = match self.decoder.state {
            State::Body { size, remaining, .. } => (size, remaining),
            State::Failed => return Err(StreamError::Stopped),
            _ => return Ok(None),
        };
        if remaining == 0 {
            return Ok(None);
        }
        let want = usize::try_from(remaining).unwrap_or(usize::MAX).min(max);
        match self.decoder.reader.next_at_most(want) {
            Ok(Some(chunk)) => {
                if let State::Body { remaining, .. } = &mut self.decoder.state {
                    *remaining -= chunk.len() as u64;
                }
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.decoder.fail();
                Err(StreamError::UnderRead {
                    expected: size,
                    actual: size - remaining,
                })
            }
            Err(e) => {
                self.decoder.fail();
                Err(e)
            }
        }
    }
}

impl<S: ByteSource> Iterator for Body<'_, S> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl<S: ByteSource> Read for Body<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.read_window(buf.len())? {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }
}

impl<S: ByteSource> std::fmt::Debug for Body<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("size", &self.size)
            .field("remaining", &self.remaining())
            .finish()
    }
}
