//! Streaming encoder and decoder for tar archives.
//!
//! This crate turns an arbitrarily chunked byte stream into a lazy sequence of
//! tar entries (a [`Header`] plus a body stream), and turns a sequence of
//! headers and bodies back into a tar byte stream. Neither direction buffers a
//! whole archive or a whole file body in memory: headers are read in exact
//! 512-byte blocks while bodies are handed out in whatever chunk sizes the
//! underlying source produces.
//!
//! # Header Field Layout
//!
//! All tar headers are 512 bytes. The fields used by this crate are:
//!
//! | Offset | Size | Field     | Description                              |
//! |--------|------|-----------|------------------------------------------|
//! | 0      | 100  | name      | File path (null-terminated if < 100)     |
//! | 100    | 8    | mode      | File mode in octal ASCII                 |
//! | 108    | 8    | uid       | Owner user ID in octal ASCII             |
//! | 116    | 8    | gid       | Owner group ID in octal ASCII            |
//! | 124    | 12   | size      | File size in octal ASCII                 |
//! | 136    | 12   | mtime     | Modification time (Unix epoch, octal)    |
//! | 148    | 8    | checksum  | Header checksum in octal ASCII           |
//! | 156    | 1    | typeflag  | Entry type (see [`EntryType`])           |
//! | 157    | 100  | linkname  | Link target for hard/symbolic links      |
//! | 257    | 6    | magic     | "ustar\0" (POSIX) or "ustar " (GNU)      |
//! | 263    | 2    | version   | "00" (POSIX) or " \0" (GNU)              |
//! | 265    | 32   | uname     | Owner user name                          |
//! | 297    | 32   | gname     | Owner group name                         |
//! | 329    | 8    | devmajor  | Device major number                      |
//! | 337    | 8    | devminor  | Device minor number                      |
//! | 345    | 155  | prefix    | Path prefix for long names (POSIX only)  |
//!
//! Numeric fields hold zero-padded octal ASCII, or GNU base-256 binary when
//! the top bit of the first byte is set.
//!
//! # Decoding
//!
//! ```
//! use tar_codec::{stream::TarDecoder, EntryType, Header, stream::TarEncoder};
//!
//! let mut encoder = TarEncoder::new(Vec::new());
//! let header = Header {
//!     name: "test.txt".into(),
//!     mode: 0o644,
//!     size: 12,
//!     ..Header::default()
//! };
//! encoder.append_bytes(&header, b"hello world\n").unwrap();
//! let archive = encoder.finish().unwrap();
//!
//! let mut decoder = TarDecoder::from_reader(&archive[..]);
//! while let Some(mut entry) = decoder.next_entry().unwrap() {
//!     assert_eq!(entry.header.entry_type, EntryType::File);
//!     assert_eq!(entry.body.to_vec().unwrap(), b"hello world\n");
//! }
//! ```

mod encoding;
mod header;
mod options;
pub mod pax;
pub mod stream;

use thiserror::Error;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub use encoding::NameEncoding;
pub use header::{decode_block, encode_block, Header};
pub use options::{DecodeOptions, EncodeOptions, Limits, LongNameFormat};
pub use pax::PaxMap;

/// Size of a tar block in bytes. Headers and padded bodies are multiples of it.
pub const BLOCK_SIZE: usize = 512;

/// Magic string for POSIX ustar headers ("ustar\0").
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Version field for POSIX ustar headers ("00").
pub const USTAR_VERSION: &[u8; 2] = b"00";

/// Magic string for GNU tar headers ("ustar ").
pub const GNU_MAGIC: &[u8; 6] = b"ustar ";

/// Version field for GNU tar headers (" \0").
pub const GNU_VERSION: &[u8; 2] = b" \0";

/// Errors produced while decoding or encoding a single header block or an
/// extension payload.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The stored checksum matches neither the unsigned nor the signed sum.
    #[error("invalid tar header checksum: stored {stored}, computed {computed}")]
    InvalidHeader {
        /// The checksum value stored in the header.
        stored: u64,
        /// The unsigned checksum computed from the header bytes.
        computed: u64,
    },

    /// The header uses a layout or type flag this crate does not read.
    #[error("unsupported tar format: {0}")]
    UnsupportedFormat(String),

    /// A value does not fit its header field in any applicable encoding.
    #[error("{field} is too long: {len} > {max}")]
    FieldTooLong {
        /// Name of the header field.
        field: &'static str,
        /// Length or value that was requested.
        len: u64,
        /// Largest representable length or value.
        max: u64,
    },

    /// A numeric field holds something other than octal or positive base-256.
    #[error("invalid numeric value in {field} field: {raw:?}")]
    InvalidNumeric {
        /// Name of the header field.
        field: &'static str,
        /// The raw field bytes.
        raw: Vec<u8>,
    },

    /// A PAX extended header payload is malformed.
    #[error("malformed PAX record: {0}")]
    InvalidPax(&'static str),

    /// A character cannot be represented in the configured name encoding.
    #[error("{field} contains {ch:?}, which the name encoding cannot represent")]
    Unrepresentable {
        /// Name of the header field.
        field: &'static str,
        /// The offending character.
        ch: char,
    },
}

/// Result type for header codec operations.
pub type Result<T> = std::result::Result<T, HeaderError>;

/// POSIX ustar header block with named fields.
///
/// GNU headers share the layout up to `devminor`; they store access and
/// change times where ustar keeps the `prefix`.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct UstarHeader {
    /// File path name (null-terminated if shorter than 100 bytes).
    pub name: [u8; 100],
    /// File mode.
    pub mode: [u8; 8],
    /// Owner user ID.
    pub uid: [u8; 8],
    /// Owner group ID.
    pub gid: [u8; 8],
    /// Body size.
    pub size: [u8; 12],
    /// Modification time as Unix timestamp.
    pub mtime: [u8; 12],
    /// Header checksum in octal ASCII.
    pub checksum: [u8; 8],
    /// Entry type flag.
    pub typeflag: u8,
    /// Link target name for hard/symbolic links.
    pub linkname: [u8; 100],
    /// Magic string identifying the format.
    pub magic: [u8; 6],
    /// Format version.
    pub version: [u8; 2],
    /// Owner user name (null-terminated).
    pub uname: [u8; 32],
    /// Owner group name (null-terminated).
    pub gname: [u8; 32],
    /// Device major number.
    pub devmajor: [u8; 8],
    /// Device minor number.
    pub devminor: [u8; 8],
    /// Path prefix for names longer than 100 bytes.
    pub prefix: [u8; 155],
    /// Padding to fill the 512-byte block.
    pub pad: [u8; 12],
}

impl UstarHeader {
    /// View a raw block as a header.
    #[must_use]
    pub fn from_block(block: &[u8; BLOCK_SIZE]) -> &UstarHeader {
        zerocopy::transmute_ref!(block)
    }

    /// Check if the magic and version identify a POSIX ustar header.
    #[must_use]
    pub fn is_ustar(&self) -> bool {
        self.magic == *USTAR_MAGIC
    }

    /// Check if the magic and version identify a GNU header.
    #[must_use]
    pub fn is_gnu(&self) -> bool {
        self.magic == *GNU_MAGIC && self.version == *GNU_VERSION
    }

    /// Compute the unsigned and signed header checksums.
    ///
    /// Both sums treat the checksum field (bytes 148..156) as spaces. Some
    /// historic implementations summed signed bytes, so readers accept either.
    #[must_use]
    pub fn checksums(&self) -> (u64, i64) {
        let mut unsigned: u64 = 0;
        let mut signed: i64 = 0;
        for (i, &byte) in self.as_bytes().iter().enumerate() {
            let byte = if (148..156).contains(&i) { b' ' } else { byte };
            unsigned += u64::from(byte);
            signed += i64::from(byte as i8);
        }
        (unsigned, signed)
    }
}

impl Default for UstarHeader {
    fn default() -> Self {
        let mut header = Self::new_zeroed();
        header.magic.copy_from_slice(USTAR_MAGIC);
        header.version.copy_from_slice(USTAR_VERSION);
        header
    }
}

impl std::fmt::Debug for UstarHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UstarHeader")
            .field("name", &String::from_utf8_lossy(truncate_null(&self.name)))
            .field("typeflag", &self.typeflag)
            .field("magic", &self.magic)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Entry Type
// ============================================================================

/// Kind of a tar entry.
///
/// The last four variants are format-internal: they describe extension
/// records that the decoder folds into the following entry and never yields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file (type '0', or '\0' in older archives).
    #[default]
    File,
    /// Contiguous file (type '7', read like a regular file).
    ContiguousFile,
    /// Hard link to an earlier entry (type '1').
    Link,
    /// Symbolic link (type '2').
    Symlink,
    /// Character device (type '3').
    CharDevice,
    /// Block device (type '4').
    BlockDevice,
    /// Directory (type '5').
    Directory,
    /// FIFO/named pipe (type '6').
    Fifo,
    /// GNU long name record (type 'L', or the old 'N').
    GnuLongPath,
    /// GNU long link name record (type 'K').
    GnuLongLinkPath,
    /// PAX extended header for the next entry (type 'x').
    PaxHeader,
    /// PAX global extended header (type 'g').
    PaxGlobalHeader,
}

impl EntryType {
    /// Parse an entry type from its type flag byte.
    ///
    /// Returns `None` for flags this crate does not support.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'0' | b'\0' => EntryType::File,
            b'1' => EntryType::Link,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::CharDevice,
            b'4' => EntryType::BlockDevice,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'7' => EntryType::ContiguousFile,
            b'L' | b'N' => EntryType::GnuLongPath,
            b'K' => EntryType::GnuLongLinkPath,
            b'x' => EntryType::PaxHeader,
            b'g' => EntryType::PaxGlobalHeader,
            _ => return None,
        })
    }

    /// Convert an entry type to its type flag byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            EntryType::File => b'0',
            EntryType::Link => b'1',
            EntryType::Symlink => b'2',
            EntryType::CharDevice => b'3',
            EntryType::BlockDevice => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::ContiguousFile => b'7',
            EntryType::GnuLongPath => b'L',
            EntryType::GnuLongLinkPath => b'K',
            EntryType::PaxHeader => b'x',
            EntryType::PaxGlobalHeader => b'g',
        }
    }

    /// Returns true for the format-internal extension record types.
    #[must_use]
    pub fn is_extension(self) -> bool {
        matches!(
            self,
            EntryType::GnuLongPath
                | EntryType::GnuLongLinkPath
                | EntryType::PaxHeader
                | EntryType::PaxGlobalHeader
        )
    }

    /// Returns true if entries of this type carry body data.
    ///
    /// Extension records carry their payload as body data too.
    #[must_use]
    pub fn has_body(self) -> bool {
        matches!(self, EntryType::File | EntryType::ContiguousFile) || self.is_extension()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Number of padding bytes needed after `size` bytes to reach a block boundary.
#[must_use]
pub fn padding_for(size: u64) -> u64 {
    match size % BLOCK_SIZE as u64 {
        0 => 0,
        rem => BLOCK_SIZE as u64 - rem,
    }
}

/// Truncate a byte slice at the first null byte.
///
/// ```
/// use tar_codec::truncate_null;
///
/// assert_eq!(truncate_null(b"hello\0world"), b"hello");
/// assert_eq!(truncate_null(b"no null here"), b"no null here");
/// ```
#[must_use]
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

/// Parse an octal ASCII field.
///
/// Leading spaces and NULs are skipped and the digits end at the first space
/// or NUL, so `"0000644\0"`, `"   644 "` and `"644"` all give `0o644`. An empty
/// field is zero.
///
/// # Errors
///
/// Returns [`HeaderError::InvalidNumeric`] for non-octal digits or overflow.
pub fn parse_octal(field: &'static str, bytes: &[u8]) -> Result<u64> {
    let invalid = || HeaderError::InvalidNumeric {
        field,
        raw: bytes.to_vec(),
    };

    let start = bytes
        .iter()
        .position(|&b| b != b' ' && b != b'\0')
        .unwrap_or(bytes.len());
    let end = bytes[start..]
        .iter()
        .position(|&b| b == b' ' || b == b'\0')
        .map_or(bytes.len(), |i| start + i);

    let mut value: u64 = 0;
    for &byte in &bytes[start..end] {
        if !(b'0'..=b'7').contains(&byte) {
            return Err(invalid());
        }
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or_else(invalid)?;
    }
    Ok(value)
}

/// Parse a numeric field that may be octal ASCII or GNU base-256.
///
/// When the high bit of the first byte is set, the remaining bits are a
/// big-endian two's complement integer. Negative base-256 values (sign bit
/// `0x40` of the first byte set) are rejected.
///
/// # Errors
///
/// Returns [`HeaderError::InvalidNumeric`] if the value is malformed or does
/// not fit a `u64`.
pub fn parse_numeric(field: &'static str, bytes: &[u8]) -> Result<u64> {
    match bytes.first() {
        Some(&first) if first & 0x80 != 0 => {
            let invalid = || HeaderError::InvalidNumeric {
                field,
                raw: bytes.to_vec(),
            };
            if first & 0x40 != 0 {
                return Err(invalid());
            }
            let mut value: u64 = u64::from(first & 0x7f);
            for &byte in &bytes[1..] {
                value = value
                    .checked_mul(256)
                    .and_then(|v| v.checked_add(u64::from(byte)))
                    .ok_or_else(invalid)?;
            }
            Ok(value)
        }
        _ => parse_octal(field, bytes),
    }
}

/// Parse a numeric field holding a signed value, such as `mtime`.
///
/// Same as [`parse_numeric`], except that base-256 values with the sign bit
/// set are read as negative two's complement integers. GNU tar writes times
/// before 1970 this way.
///
/// # Errors
///
/// Returns [`HeaderError::InvalidNumeric`] if the value is malformed or does
/// not fit an `i64`.
pub fn parse_numeric_signed(field: &'static str, bytes: &[u8]) -> Result<i64> {
    let invalid = || HeaderError::InvalidNumeric {
        field,
        raw: bytes.to_vec(),
    };
    match bytes.first() {
        Some(&first) if first & 0x80 != 0 => {
            // Sign-extend the seven value bits of the first byte.
            let mut value = i64::from(i8::from_ne_bytes([first << 1]) >> 1);
            for &byte in &bytes[1..] {
                value = value
                    .checked_mul(256)
                    .and_then(|v| v.checked_add(i64::from(byte)))
                    .ok_or_else(invalid)?;
            }
            Ok(value)
        }
        _ => i64::try_from(parse_octal(field, bytes)?).map_err(|_| invalid()),
    }
}

/// Write `value` into a numeric field.
///
/// Octal ASCII (`len - 1` zero-padded digits and a NUL) is used whenever the
/// value fits; larger values switch to base-256.
///
/// # Errors
///
/// Returns [`HeaderError::FieldTooLong`] if the value does not fit the field
/// even in base-256.
pub fn format_numeric(field: &'static str, dst: &mut [u8], value: u64) -> Result<()> {
    let digits = dst.len().saturating_sub(1);
    if digits < 21 && value < 1u64 << (3 * digits) {
        let octal = format!("{value:0digits$o}");
        dst[..digits].copy_from_slice(octal.as_bytes());
        dst[digits] = 0;
        return Ok(());
    }

    // The marker bit and the sign bit are not available for the value.
    let bits = dst.len() * 8 - 2;
    if bits < 64 && value >> bits != 0 {
        return Err(HeaderError::FieldTooLong {
            field,
            len: value,
            max: (1u64 << bits) - 1,
        });
    }
    dst.fill(0);
    let be = value.to_be_bytes();
    let n = be.len().min(dst.len());
    let offset = dst.len() - n;
    dst[offset..].copy_from_slice(&be[be.len() - n..]);
    dst[0] |= 0x80;
    Ok(())
}

/// Write a signed `value` into a numeric field.
///
/// Non-negative values are written as by [`format_numeric`]; negative ones
/// always use two's complement base-256.
///
/// # Errors
///
/// Returns [`HeaderError::FieldTooLong`] if the value does not fit the field.
pub fn format_numeric_signed(field: &'static str, dst: &mut [u8], value: i64) -> Result<()> {
    if let Ok(value) = u64::try_from(value) {
        return format_numeric(field, dst, value);
    }

    // Only the marker bit is unavailable.
    let bits = dst.len() * 8 - 1;
    if bits < 64 && value < -(1i64 << (bits - 1)) {
        return Err(HeaderError::FieldTooLong {
            field,
            len: value.unsigned_abs(),
            max: 1u64 << (bits - 1),
        });
    }
    dst.fill(0xff);
    let be = value.to_be_bytes();
    let n = be.len().min(dst.len());
    let offset = dst.len() - n;
    dst[offset..].copy_from_slice(&be[be.len() - n..]);
    dst[0] |= 0x80;
    Ok(())
}
