//! Extended metadata payloads: PAX records and GNU long names.
//!
//! PAX extended headers consist of records in the format
//! `<length> <key>=<value>\n`, where `<length>` is the decimal length of the
//! whole record including the length field itself. GNU long name and long
//! link records carry a single NUL-terminated name.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::{truncate_null, HeaderError, NameEncoding, Result};

/// PAX key for the file path.
pub const PAX_PATH: &str = "path";
/// PAX key for the link target path.
pub const PAX_LINKPATH: &str = "linkpath";
/// PAX key for the file size.
pub const PAX_SIZE: &str = "size";
/// PAX key for the owner user ID.
pub const PAX_UID: &str = "uid";
/// PAX key for the owner group ID.
pub const PAX_GID: &str = "gid";
/// PAX key for the owner user name.
pub const PAX_UNAME: &str = "uname";
/// PAX key for the owner group name.
pub const PAX_GNAME: &str = "gname";
/// PAX key for the modification time.
pub const PAX_MTIME: &str = "mtime";

/// Decoded PAX records, keyed by record name.
pub type PaxMap = BTreeMap<String, String>;

/// A single PAX record, borrowed from the payload.
#[derive(Debug, Clone)]
pub struct PaxExtension<'a> {
    key: &'a [u8],
    value: &'a [u8],
}

impl<'a> PaxExtension<'a> {
    /// Returns the key as a string.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InvalidPax`] if the key is not valid UTF-8.
    pub fn key(&self) -> Result<&'a str> {
        std::str::from_utf8(self.key).map_err(|_| HeaderError::InvalidPax("key is not UTF-8"))
    }

    /// Returns the value, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn value(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.value)
    }

    /// Returns the raw value bytes.
    #[must_use]
    pub fn value_bytes(&self) -> &'a [u8] {
        self.value
    }
}

/// Iterator over the records of a PAX payload.
///
/// A record length of zero, or a NUL where the length should start, ends
/// the payload; this tolerates zero padding after the last record.
///
/// ```
/// use tar_codec::pax::PaxExtensions;
///
/// let data = b"20 path=foo/bar.txt\n";
/// let mut iter = PaxExtensions::new(data);
/// let ext = iter.next().unwrap().unwrap();
/// assert_eq!(ext.key().unwrap(), "path");
/// assert_eq!(ext.value(), "foo/bar.txt");
/// ```
#[derive(Debug)]
pub struct PaxExtensions<'a> {
    data: &'a [u8],
}

impl<'a> PaxExtensions<'a> {
    /// Create a new iterator over PAX records.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn parse_next(&mut self) -> Result<Option<PaxExtension<'a>>> {
        if self.data.first().is_none_or(|&b| b == 0) {
            return Ok(None);
        }

        let space_pos = self
            .data
            .iter()
            .position(|&b| b == b' ')
            .ok_or(HeaderError::InvalidPax("missing length separator"))?;
        let len: usize = std::str::from_utf8(&self.data[..space_pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(HeaderError::InvalidPax("invalid record length"))?;
        if len == 0 {
            return Ok(None);
        }

        if len > self.data.len() || len < space_pos + 2 {
            return Err(HeaderError::InvalidPax("record length overruns payload"));
        }
        if self.data[len - 1] != b'\n' {
            return Err(HeaderError::InvalidPax("record does not end in newline"));
        }

        let kv = &self.data[space_pos + 1..len - 1];
        let eq_pos = kv
            .iter()
            .position(|&b| b == b'=')
            .ok_or(HeaderError::InvalidPax("record has no '='"))?;

        self.data = &self.data[len..];
        Ok(Some(PaxExtension {
            key: &kv[..eq_pos],
            value: &kv[eq_pos + 1..],
        }))
    }
}

impl<'a> Iterator for PaxExtensions<'a> {
    type Item = Result<PaxExtension<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parse_next() {
            Ok(ext) => ext.map(Ok),
            Err(e) => {
                self.data = &[];
                Some(Err(e))
            }
        }
    }
}

/// Decode a PAX payload into a map. Later records replace earlier ones with
/// the same key.
///
/// # Errors
///
/// Returns [`HeaderError::InvalidPax`] for malformed records or non-UTF-8 keys.
pub fn decode_pax(data: &[u8]) -> Result<PaxMap> {
    let mut map = PaxMap::new();
    for ext in PaxExtensions::new(data) {
        let ext = ext?;
        map.insert(ext.key()?.to_owned(), ext.value().into_owned());
    }
    Ok(map)
}

/// Length of the record `"<len> <key>=<value>\n"`, including its own
/// decimal length prefix.
///
/// ```
/// assert_eq!(tar_codec::pax::pax_record_len("path", "foo/bar.txt"), 20);
/// ```
#[must_use]
pub fn pax_record_len(key: &str, value: &str) -> usize {
    // space, '=' and newline
    let body = key.len() + value.len() + 3;
    let mut len = body;
    loop {
        let next = body + decimal_digits(len);
        if next == len {
            return len;
        }
        len = next;
    }
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Encode records as a PAX payload, in iteration order.
pub fn encode_pax<'a, I>(records: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = Vec::new();
    for (key, value) in records {
        let len = pax_record_len(key, value);
        out.extend_from_slice(format!("{len} {key}={value}\n").as_bytes());
    }
    out
}

/// Decode the payload of a GNU long name or long link record.
#[must_use]
pub fn decode_long_name(payload: &[u8], encoding: NameEncoding) -> String {
    encoding.decode(truncate_null(payload))
}

/// Encode a GNU long name payload: the encoded name followed by one NUL.
///
/// # Errors
///
/// Returns [`HeaderError::Unrepresentable`] if the name does not fit the
/// encoding.
pub fn encode_long_name(
    field: &'static str,
    name: &str,
    encoding: NameEncoding,
) -> Result<Vec<u8>> {
    let mut payload = encoding.encode(field, name)?;
    payload.push(0);
    Ok(payload)
}

/// Parse a PAX timestamp, truncating it to whole seconds.
///
/// Malformed values give `None`.
pub(crate) fn parse_pax_seconds(value: &str) -> Option<i64> {
    let secs = value.split_once('.').map_or(value, |(secs, _)| secs);
    secs.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pax_simple() {
        let data = b"20 path=foo/bar.txt\n";
        let mut iter = PaxExtensions::new(data);
        let ext = iter.next().unwrap().unwrap();
        assert_eq!(ext.key().unwrap(), "path");
        assert_eq!(ext.value(), "foo/bar.txt");
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_pax_multiple() {
        let data = b"20 path=foo/bar.txt\n12 uid=1000\n12 gid=1000\n";
        let map = decode_pax(data).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["path"], "foo/bar.txt");
        assert_eq!(map["uid"], "1000");
        assert_eq!(map["gid"], "1000");
    }

    #[test]
    fn test_pax_last_duplicate_wins() {
        let data = b"12 uid=1000\n12 uid=2000\n";
        assert_eq!(decode_pax(data).unwrap()["uid"], "2000");
    }

    #[test]
    fn test_pax_value_with_equals_and_newline() {
        let value = "a=b\nc";
        let data = encode_pax([("comment", value)]);
        assert_eq!(decode_pax(&data).unwrap()["comment"], value);
    }

    #[test]
    fn test_pax_trailing_nul_padding() {
        let mut data = b"12 uid=1000\n".to_vec();
        data.resize(512, 0);
        let map = decode_pax(&data).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_pax_zero_length_ends_payload() {
        let data = b"12 uid=1000\n0 \n";
        assert_eq!(decode_pax(data).unwrap().len(), 1);
    }

    #[test]
    fn test_pax_empty() {
        assert!(PaxExtensions::new(b"").next().is_none());
        assert!(decode_pax(b"").unwrap().is_empty());
    }

    #[test]
    fn test_pax_malformed() {
        for data in [
            &b"30 path=short\n"[..],
            b"13 path=short",
            b"11 pathfoo\n",
            b"abc path=x\n",
            b"nospace",
        ] {
            let err = decode_pax(data).unwrap_err();
            assert!(matches!(err, HeaderError::InvalidPax(_)), "{data:?}");
        }
    }

    #[test]
    fn test_pax_invalid_key() {
        let err = decode_pax(b"7 \xff\xfe=x\n").unwrap_err();
        assert!(matches!(err, HeaderError::InvalidPax(_)));
    }

    #[test]
    fn test_pax_lossy_value() {
        let map = decode_pax(b"7 k=\xff\xfe\n").unwrap();
        assert_eq!(map["k"], "\u{fffd}\u{fffd}");
    }

    #[test]
    fn test_pax_error_stops_iteration() {
        let mut iter = PaxExtensions::new(b"nospace12 uid=1000\n");
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_pax_record_len() {
        assert_eq!(pax_record_len("path", "foo/bar.txt"), 20);
        assert_eq!(pax_record_len("special", "sauce"), 17);
        // Adding the length digits pushes the record from 2 to 3 digits.
        assert_eq!(pax_record_len("k", &"v".repeat(93)), 99);
        let value = "v".repeat(94);
        assert_eq!(pax_record_len("k", &value), 101);
        let encoded = encode_pax([("k", value.as_str())]);
        assert_eq!(encoded.len(), 101);
        assert!(encoded.starts_with(b"101 k="));
    }

    #[test]
    fn test_encode_pax_roundtrip() {
        let long = "x".repeat(300);
        let records = [("path", long.as_str()), ("mtime", "1387580181.5"), ("special", "sauce")];
        let data = encode_pax(records);
        let map = decode_pax(&data).unwrap();
        for (key, value) in records {
            assert_eq!(map[key], value);
        }
    }

    #[test]
    fn test_long_name() {
        let payload = encode_long_name("name", "a/b/c", NameEncoding::Utf8).unwrap();
        assert_eq!(payload, b"a/b/c\0");
        assert_eq!(decode_long_name(&payload, NameEncoding::Utf8), "a/b/c");
        assert_eq!(decode_long_name(b"caf\xe9\0\0\0", NameEncoding::Latin1), "café");
    }

    #[test]
    fn test_parse_pax_seconds() {
        assert_eq!(parse_pax_seconds("1387580181"), Some(1387580181));
        assert_eq!(parse_pax_seconds("1387580181.123456"), Some(1387580181));
        assert_eq!(parse_pax_seconds("-5"), Some(-5));
        assert_eq!(parse_pax_seconds("-86400.25"), Some(-86400));
        assert_eq!(parse_pax_seconds("+-5"), None);
        assert_eq!(parse_pax_seconds("soon"), None);
    }
}
