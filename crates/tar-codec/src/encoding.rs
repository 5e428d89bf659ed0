//! Text encodings for name fields.

use crate::{HeaderError, Result};

/// Encoding used for the text fields of a header block: name, prefix,
/// linkname, uname and gname.
///
/// PAX records are always UTF-8 regardless of this setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NameEncoding {
    /// UTF-8, decoded lossily.
    #[default]
    Utf8,
    /// ISO-8859-1, where every byte maps to the code point of the same value.
    Latin1,
}

impl NameEncoding {
    /// Decode raw field bytes (already truncated at the first NUL).
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            NameEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            NameEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Encode a string for a header field.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::Unrepresentable`] if a character has no
    /// representation in this encoding.
    pub fn encode(self, field: &'static str, text: &str) -> Result<Vec<u8>> {
        match self {
            NameEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            NameEncoding::Latin1 => text
                .chars()
                .map(|ch| u8::try_from(ch).map_err(|_| HeaderError::Unrepresentable { field, ch }))
                .collect(),
        }
    }

    /// Length of the longest prefix of `text` that encodes to at most `max`
    /// bytes, measured in bytes of `text`. Always lands on a char boundary.
    pub(crate) fn truncated_len(self, text: &str, max: usize) -> usize {
        let mut encoded = 0;
        for (idx, ch) in text.char_indices() {
            let width = match self {
                NameEncoding::Utf8 => ch.len_utf8(),
                NameEncoding::Latin1 => 1,
            };
            if encoded + width > max {
                return idx;
            }
            encoded += width;
        }
        text.len()
    }
}
