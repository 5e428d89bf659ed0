//! Conversion between a raw 512-byte block and a [`Header`] record.

use zerocopy::IntoBytes;

use crate::{
    format_numeric, format_numeric_signed, parse_numeric, parse_numeric_signed, parse_octal,
    truncate_null, EntryType, HeaderError, NameEncoding, PaxMap, Result, UstarHeader, BLOCK_SIZE,
};

/// Maximum length of the `name` and `linkname` fields.
pub(crate) const NAME_LEN: usize = 100;
/// Maximum length of the ustar `prefix` field.
pub(crate) const PREFIX_LEN: usize = 155;

/// Metadata of one tar entry.
///
/// Decoded headers have GNU long names and PAX records already folded in;
/// `pax` keeps the effective PAX map (global defaults merged with the
/// entry's own records) so that keys without a dedicated field, like
/// sub-second `mtime` or `SCHILY.xattr.*`, are not lost.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Entry path.
    pub name: String,
    /// Permission bits (and possibly file type bits) as stored.
    pub mode: u32,
    /// Owner user ID.
    pub uid: u64,
    /// Owner group ID.
    pub gid: u64,
    /// Size of the body in bytes.
    pub size: u64,
    /// Modification time in seconds since the Unix epoch. Negative for
    /// times before 1970.
    pub mtime: i64,
    /// Kind of entry.
    pub entry_type: EntryType,
    /// Link target for hard and symbolic links.
    pub linkname: Option<String>,
    /// Owner user name.
    pub uname: String,
    /// Owner group name.
    pub gname: String,
    /// Device major number.
    pub devmajor: u32,
    /// Device minor number.
    pub devminor: u32,
    /// PAX extended attributes that apply to this entry.
    pub pax: Option<PaxMap>,
}

impl Header {
    /// Number of body bytes that follow this header in an archive.
    ///
    /// Types without body data always report zero, whatever `size` says.
    #[must_use]
    pub fn body_size(&self) -> u64 {
        if self.entry_type.has_body() {
            self.size
        } else {
            0
        }
    }
}

/// Decode one header block.
///
/// Returns `Ok(None)` for an all-zero block, which marks padding or the end
/// of the archive. The stored `size` is returned as is, even for types that
/// carry no body.
///
/// # Errors
///
/// Fails on checksum mismatch, on a magic other than POSIX ustar or GNU, on
/// unknown type flags, and on malformed numeric fields.
pub fn decode_block(block: &[u8; BLOCK_SIZE], encoding: NameEncoding) -> Result<Option<Header>> {
    if block.iter().all(|&b| b == 0) {
        return Ok(None);
    }

    let raw = UstarHeader::from_block(block);
    let (unsigned, signed) = raw.checksums();
    let stored = parse_octal("checksum", &raw.checksum).map_err(|_| HeaderError::InvalidHeader {
        stored: 0,
        computed: unsigned,
    })?;
    if stored != unsigned && i64::try_from(stored).ok() != Some(signed) {
        return Err(HeaderError::InvalidHeader {
            stored,
            computed: unsigned,
        });
    }

    let gnu = raw.is_gnu();
    if !gnu && !raw.is_ustar() {
        return Err(HeaderError::UnsupportedFormat(format!(
            "no ustar magic (found {:?}), old v7 archives are not supported",
            raw.magic
        )));
    }

    let mut entry_type = EntryType::from_byte(raw.typeflag).ok_or_else(|| {
        HeaderError::UnsupportedFormat(format!(
            "unknown type flag {:?}",
            char::from(raw.typeflag)
        ))
    })?;

    let mut name = encoding.decode(truncate_null(&raw.name));
    // GNU headers keep atime and ctime where ustar has the prefix.
    let prefix = truncate_null(&raw.prefix);
    if !gnu && !prefix.is_empty() {
        name = format!("{}/{name}", encoding.decode(prefix));
    }

    if matches!(raw.typeflag, b'0' | b'\0') && name.ends_with('/') {
        entry_type = EntryType::Directory;
    }

    let linkname = match raw.linkname[0] {
        0 => None,
        _ => Some(encoding.decode(truncate_null(&raw.linkname))),
    };

    Ok(Some(Header {
        name,
        mode: numeric_u32("mode", &raw.mode)?,
        uid: parse_numeric("uid", &raw.uid)?,
        gid: parse_numeric("gid", &raw.gid)?,
        size: parse_numeric("size", &raw.size)?,
        mtime: parse_numeric_signed("mtime", &raw.mtime)?,
        entry_type,
        linkname,
        uname: encoding.decode(truncate_null(&raw.uname)),
        gname: encoding.decode(truncate_null(&raw.gname)),
        devmajor: numeric_u32("devmajor", &raw.devmajor)?,
        devminor: numeric_u32("devminor", &raw.devminor)?,
        pax: None,
    }))
}

fn numeric_u32(field: &'static str, bytes: &[u8]) -> Result<u32> {
    let value = parse_numeric(field, bytes)?;
    u32::try_from(value).map_err(|_| HeaderError::InvalidNumeric {
        field,
        raw: bytes.to_vec(),
    })
}

/// Encode a header as a POSIX ustar block.
///
/// The size is written as [`Header::body_size`]. Names up to 100 bytes go in
/// the `name` field; longer names are split at a `/` into `prefix` and
/// `name`. The `pax` map is not written here, since it needs its own record.
///
/// # Errors
///
/// Returns [`HeaderError::FieldTooLong`] when a name cannot be split, when
/// the link name, user name or group name is too long, or when a numeric
/// value exceeds its field, and [`HeaderError::Unrepresentable`] when a name
/// does not fit the encoding.
pub fn encode_block(header: &Header, encoding: NameEncoding) -> Result<[u8; BLOCK_SIZE]> {
    let mut raw = UstarHeader::default();

    let name = encoding.encode("name", &header.name)?;
    let (prefix, name) = split_name(&name).ok_or(HeaderError::FieldTooLong {
        field: "name",
        len: name.len() as u64,
        max: NAME_LEN as u64,
    })?;
    raw.name[..name.len()].copy_from_slice(name);
    raw.prefix[..prefix.len()].copy_from_slice(prefix);

    format_numeric("mode", &mut raw.mode, u64::from(header.mode))?;
    format_numeric("uid", &mut raw.uid, header.uid)?;
    format_numeric("gid", &mut raw.gid, header.gid)?;
    format_numeric("size", &mut raw.size, header.body_size())?;
    format_numeric_signed("mtime", &mut raw.mtime, header.mtime)?;
    raw.typeflag = header.entry_type.to_byte();

    if let Some(linkname) = &header.linkname {
        copy_text(&mut raw.linkname, "linkname", &encoding.encode("linkname", linkname)?)?;
    }
    copy_text(&mut raw.uname, "uname", &encoding.encode("uname", &header.uname)?)?;
    copy_text(&mut raw.gname, "gname", &encoding.encode("gname", &header.gname)?)?;
    format_numeric("devmajor", &mut raw.devmajor, u64::from(header.devmajor))?;
    format_numeric("devminor", &mut raw.devminor, u64::from(header.devminor))?;

    let (checksum, _) = raw.checksums();
    raw.checksum.copy_from_slice(format!("{checksum:06o}\0 ").as_bytes());

    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(raw.as_bytes());
    Ok(block)
}

fn copy_text(dst: &mut [u8], field: &'static str, src: &[u8]) -> Result<()> {
    if src.len() > dst.len() {
        return Err(HeaderError::FieldTooLong {
            field,
            len: src.len() as u64,
            max: dst.len() as u64,
        });
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

/// Split an encoded name into ustar `prefix` and `name` parts.
///
/// Returns `None` if the name is too long for the two fields or has no
/// suitable `/` to split at.
pub(crate) fn split_name(name: &[u8]) -> Option<(&[u8], &[u8])> {
    if name.len() <= NAME_LEN {
        return Some((&[], name));
    }
    // The earliest usable slash leaves the shortest prefix.
    let idx = (1..name.len() - 1)
        .find(|&i| name[i] == b'/' && name.len() - i - 1 <= NAME_LEN)?;
    (idx <= PREFIX_LEN).then(|| (&name[..idx], &name[idx + 1..]))
}
