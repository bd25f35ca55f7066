//! Base64 utilities for HTTP header framing.
//!
//! Payment payloads, requirement lists, and settlement receipts all travel
//! as base64-encoded JSON inside HTTP headers. Encoding always uses the
//! standard alphabet; decoding also accepts the URL-safe alphabet and
//! unpadded input, since SDKs in the wild disagree on both.

use base64::Engine;
use base64::engine::general_purpose::{
    STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD,
};
use std::borrow::Cow;
use std::fmt::Display;

/// A wrapper around base64 string bytes.
///
/// Copy-on-write so that header bytes can be decoded without an extra
/// allocation.
///
/// # Example
///
/// ```
/// use tollgate_types::util::Base64Bytes;
///
/// let encoded = Base64Bytes::encode(b"hello world");
/// assert_eq!(encoded.to_string(), "aGVsbG8gd29ybGQ=");
/// assert_eq!(encoded.decode().unwrap(), b"hello world");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    /// Decodes to raw bytes, accepting standard and URL-safe alphabets,
    /// padded or not.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let input = self.0.as_ref();
        STANDARD
            .decode(input)
            .or_else(|_| STANDARD_NO_PAD.decode(input))
            .or_else(|_| URL_SAFE.decode(input))
            .or_else(|_| URL_SAFE_NO_PAD.decode(input))
    }

    /// Encodes raw bytes with the standard alphabet.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = STANDARD.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_url_safe_alphabet() {
        // 0xfb 0xef 0xff encodes to "++//" standard, "--__" url-safe.
        let standard = Base64Bytes::encode([0xfbu8, 0xef, 0xbe, 0xff]);
        let url_safe = Base64Bytes(Cow::Borrowed(
            standard
                .to_string()
                .replace('+', "-")
                .replace('/', "_")
                .into_bytes()
                .leak(),
        ));
        assert_eq!(standard.decode().unwrap(), url_safe.decode().unwrap());
    }

    #[test]
    fn decodes_without_padding() {
        let unpadded = Base64Bytes(Cow::Borrowed(b"aGVsbG8gd29ybGQ".as_ref()));
        assert_eq!(unpadded.decode().unwrap(), b"hello world");
    }

    #[test]
    fn rejects_garbage() {
        let garbage = Base64Bytes(Cow::Borrowed(b"!!not base64!!".as_ref()));
        assert!(garbage.decode().is_err());
    }
}
