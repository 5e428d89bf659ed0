//! Encoding entries into a tar byte stream.

use std::io::{self, Read, Write};

use log::{debug, trace};

use super::{Result, StreamError};
use crate::header::{split_name, NAME_LEN};
use crate::pax::{encode_long_name, encode_pax, PAX_LINKPATH, PAX_PATH};
use crate::{
    encode_block, padding_for, EncodeOptions, EntryType, Header, LongNameFormat, PaxMap,
    BLOCK_SIZE,
};

/// Name GNU tar gives its `L` and `K` records.
const GNU_LONG_LINK_NAME: &str = "././@LongLink";

/// Name of the header carrying a global PAX record.
const PAX_GLOBAL_NAME: &str = "pax_global_header";

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Streaming tar encoder writing to any [`Write`] sink.
///
/// Each [`append`](Self::append) writes whatever extension records the
/// header needs, then the header block, the body and its padding.
/// [`finish`](Self::finish) writes the end-of-archive marker.
///
/// ```
/// use tar_codec::stream::TarEncoder;
/// use tar_codec::{Header, BLOCK_SIZE};
///
/// let mut encoder = TarEncoder::new(Vec::new());
/// let header = Header {
///     name: "hello.txt".into(),
///     mode: 0o644,
///     size: 5,
///     ..Header::default()
/// };
/// encoder.append_bytes(&header, b"hello").unwrap();
/// let archive = encoder.finish().unwrap();
/// assert_eq!(archive.len(), 4 * BLOCK_SIZE);
/// ```
pub struct TarEncoder<W: Write> {
    sink: W,
    options: EncodeOptions,
    position: u64,
}

impl<W: Write> TarEncoder<W> {
    /// Encode into `sink` with default options.
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, EncodeOptions::default())
    }

    /// Encode into `sink`.
    pub fn with_options(sink: W, options: EncodeOptions) -> Self {
        Self {
            sink,
            options,
            position: 0,
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append an entry whose body is read from `body`.
    ///
    /// Body-less entry types are written with size zero and must come with
    /// an empty body.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::BodySizeMismatch`] if `body` yields fewer or
    /// more bytes than the header declares, a header error if the metadata
    /// cannot be represented, and I/O errors from either side.
    pub fn append<R: Read>(&mut self, header: &Header, mut body: R) -> Result<()> {
        let mut header = header.clone();
        header.size = header.body_size();
        let encoding = self.options.name_encoding;

        let long_name = split_name(&encoding.encode("name", &header.name)?).is_none();
        let long_link = match &header.linkname {
            Some(link) => encoding.encode("linkname", link)?.len() > NAME_LEN,
            None => false,
        };

        let mut pax = header.pax.clone().unwrap_or_default();
        match self.options.long_name_format {
            LongNameFormat::Gnu => {
                if long_name {
                    let payload = encode_long_name("name", &header.name, encoding)?;
                    self.write_extension(
                        &header,
                        EntryType::GnuLongPath,
                        GNU_LONG_LINK_NAME,
                        &payload,
                    )?;
                }
                if let Some(link) = header.linkname.as_deref().filter(|_| long_link) {
                    let payload = encode_long_name("linkname", link, encoding)?;
                    self.write_extension(
                        &header,
                        EntryType::GnuLongLinkPath,
                        GNU_LONG_LINK_NAME,
                        &payload,
                    )?;
                }
            }
            LongNameFormat::Pax => {
                if long_name {
                    pax.insert(PAX_PATH.to_owned(), header.name.clone());
                }
                if let Some(link) = header.linkname.as_ref().filter(|_| long_link) {
                    pax.insert(PAX_LINKPATH.to_owned(), link.clone());
                }
            }
        }

        // The real header keeps as much of the names as fits.
        if long_name {
            let len = encoding.truncated_len(&header.name, NAME_LEN);
            header.name.truncate(len);
            // A trailing slash would make old readers see a directory.
            while header.entry_type != EntryType::Directory && header.name.ends_with('/') {
                header.name.pop();
            }
        }
        if let Some(link) = header.linkname.as_mut().filter(|_| long_link) {
            let len = encoding.truncated_len(link, NAME_LEN);
            link.truncate(len);
        }

        if !pax.is_empty() {
            let payload = encode_pax(pax.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            let prefix = "PaxHeader/";
            let keep = encoding.truncated_len(&header.name, NAME_LEN - prefix.len());
            let name = format!("{prefix}{}", &header.name[..keep]);
            self.write_extension(&header, EntryType::PaxHeader, &name, &payload)?;
        }

        let block = encode_block(&header, encoding)?;
        self.write_all(&block)?;

        let size = header.size;
        let copied = io::copy(&mut body.by_ref().take(size), &mut self.sink)?;
        self.position += copied;
        if copied < size {
            return Err(StreamError::BodySizeMismatch {
                expected: size,
                actual: copied,
            });
        }
        if has_more(&mut body)? {
            return Err(StreamError::BodySizeMismatch {
                expected: size,
                actual: size + 1,
            });
        }
        self.write_padding(size)?;
        trace!("appended {:?} {} ({size} bytes)", header.entry_type, header.name);
        Ok(())
    }

    /// Append an entry whose body is held in memory.
    ///
    /// # Errors
    ///
    /// Same as [`append`](Self::append).
    pub fn append_bytes(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        self.append(header, body)
    }

    /// Append a global PAX record. Readers apply its keys as defaults to all
    /// following entries, until the next global record.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors from the sink.
    pub fn append_global_pax(&mut self, pax: &PaxMap) -> Result<()> {
        let payload = encode_pax(pax.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let template = Header {
            mode: 0o644,
            ..Header::default()
        };
        self.write_extension(&template, EntryType::PaxGlobalHeader, PAX_GLOBAL_NAME, &payload)
    }

    /// Write the end-of-archive marker, flush, and return the sink.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors from the sink.
    pub fn finish(mut self) -> Result<W> {
        self.write_all(&ZERO_BLOCK)?;
        self.write_all(&ZERO_BLOCK)?;
        self.sink.flush()?;
        debug!("finished archive of {} bytes", self.position);
        Ok(self.sink)
    }

    /// Write an extension record describing `entry`.
    fn write_extension(
        &mut self,
        entry: &Header,
        entry_type: EntryType,
        name: &str,
        payload: &[u8],
    ) -> Result<()> {
        let header = Header {
            name: name.to_owned(),
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            size: payload.len() as u64,
            mtime: entry.mtime,
            entry_type,
            uname: entry.uname.clone(),
            gname: entry.gname.clone(),
            ..Header::default()
        };
        let block = encode_block(&header, self.options.name_encoding)?;
        self.write_all(&block)?;
        self.write_all(payload)?;
        self.write_padding(payload.len() as u64)?;
        trace!("wrote {entry_type:?} record with {} byte payload", payload.len());
        Ok(())
    }

    fn write_padding(&mut self, size: u64) -> Result<()> {
        // padding_for() is always below BLOCK_SIZE
        let pad = padding_for(size) as usize;
        self.write_all(&ZERO_BLOCK[..pad])
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.sink.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }
}

/// Check whether a reader has any bytes left, consuming at most one.
fn has_more<R: Read>(reader: &mut R) -> io::Result<bool> {
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(n) => return Ok(n > 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

impl<W: Write> std::fmt::Debug for TarEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarEncoder")
            .field("position", &self.position)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
