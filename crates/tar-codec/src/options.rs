//! Decoder and encoder configuration.

use crate::NameEncoding;

/// Default capacity of the chunks pulled from an [`std::io::Read`] source.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Resource limits applied while decoding extension records.
///
/// Extension payloads are buffered in memory before they are folded into the
/// next entry, so an archive from an untrusted source could otherwise request
/// arbitrarily large allocations.
///
/// ```
/// use tar_codec::Limits;
///
/// let limits = Limits {
///     max_path_len: 1024,
///     ..Limits::default()
/// };
/// assert_eq!(limits.max_pax_size, 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum length in bytes of a resolved path or link target.
    ///
    /// Default: 4096 bytes (Linux `PATH_MAX`).
    pub max_path_len: usize,

    /// Maximum payload size of a single PAX `x` or `g` record.
    ///
    /// Default: 1 MiB.
    pub max_pax_size: u64,

    /// Maximum length of the name in a GNU `L` or `K` record, not counting
    /// the NUL that terminates it.
    ///
    /// Default: 4096 bytes.
    pub max_gnu_long_size: u64,

    /// Maximum number of extension records in a row before a real entry.
    ///
    /// Default: 16.
    pub max_pending_entries: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_path_len: 4096,
            max_pax_size: 1024 * 1024,
            max_gnu_long_size: 4096,
            max_pending_entries: 16,
        }
    }
}

impl Limits {
    /// Same as [`Limits::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits that never trigger, for archives from trusted sources.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_path_len: usize::MAX,
            max_pax_size: u64::MAX,
            max_gnu_long_size: u64::MAX,
            max_pending_entries: usize::MAX,
        }
    }

    /// Conservative limits for archives from untrusted sources.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_path_len: 1024,
            max_pax_size: 64 * 1024,
            max_gnu_long_size: 1024,
            max_pending_entries: 8,
        }
    }
}

/// Options for [`TarDecoder`](crate::stream::TarDecoder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Encoding of the name fields in header blocks and GNU long names.
    pub name_encoding: NameEncoding,
    /// Limits on extension records.
    pub limits: Limits,
    /// Chunk capacity used when decoding from an [`std::io::Read`].
    pub chunk_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            name_encoding: NameEncoding::default(),
            limits: Limits::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// How the encoder stores names that do not fit the ustar name fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LongNameFormat {
    /// GNU `L` and `K` records, as written by GNU tar.
    #[default]
    Gnu,
    /// PAX `path` and `linkpath` records.
    Pax,
}

/// Options for [`TarEncoder`](crate::stream::TarEncoder).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Encoding of the name fields in header blocks and GNU long names.
    pub name_encoding: NameEncoding,
    /// Extension used for names that do not fit the header block.
    pub long_name_format: LongNameFormat,
}
