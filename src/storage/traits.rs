//! Filing-text store trait.

use std::iter;
use std::ops::Range;

use crate::error::{RagError, Result};

/// Stand-in for each byte that is not part of a valid UTF-8 sequence.
pub const INVALID_BYTE_STAND_IN: char = '?';

/// Decode filing bytes, replacing every invalid byte with
/// [`INVALID_BYTE_STAND_IN`].
///
/// The output has exactly as many bytes as the input, so byte offsets into
/// the decoded text are byte offsets into the stored filing.
pub fn decode_filing_text(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
        out.extend(iter::repeat_n(INVALID_BYTE_STAND_IN, chunk.invalid().len()));
    }
    out
}

/// Number of bytes [`decode_filing_text`] replaces.
pub fn invalid_byte_count(bytes: &[u8]) -> usize {
    bytes.utf8_chunks().map(|chunk| chunk.invalid().len()).sum()
}

/// Read access to decoded filing text, addressed by source path and byte
/// range.
///
/// Implementations are blocking; async callers run them on a blocking
/// thread.
pub trait FilingTextStore: Send + Sync + std::fmt::Debug {
    /// Bytes `range` of the decoded filing, clamped to its length.
    fn read_bytes(&self, source_path: &str, range: Range<u64>) -> Result<Vec<u8>>;

    /// The whole decoded filing as UTF-8, with invalid bytes replaced as by
    /// [`decode_filing_text`].
    fn read_all(&self, source_path: &str) -> Result<String>;

    /// Exactly the span `range` as UTF-8, decoded like [`read_all`](Self::read_all).
    ///
    /// Fails when the filing is shorter than the range, which means the file
    /// changed since it was indexed.
    fn read_span(&self, source_path: &str, range: Range<u64>) -> Result<String> {
        let expected = range.end.saturating_sub(range.start);
        let bytes = self.read_bytes(source_path, range.clone())?;
        if bytes.len() as u64 != expected {
            return Err(RagError::other(format!(
                "{source_path}: span {}..{} exceeds the filing length",
                range.start, range.end
            )));
        }
        Ok(decode_filing_text(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_bytes_keep_their_width() {
        let bytes = b"Caf\xe9 au lait \xe2\x82 ok \xe2\x82\xac";
        let text = decode_filing_text(bytes);
        assert_eq!(text.len(), bytes.len());
        assert_eq!(text, "Caf? au lait ?? ok \u{20ac}");
        assert_eq!(invalid_byte_count(bytes), 3);
        assert_eq!(decode_filing_text(b"plain"), "plain");
    }
}
