//! Variable-length integer encoding per RFC 9000 Section 16.
//!
//! Frame types and lengths, stream types, push IDs and setting identifiers
//! are all QUIC varints. The two most significant bits of the first byte
//! select the encoded width: `00` = 1 byte, `01` = 2 bytes, `10` = 4 bytes,
//! `11` = 8 bytes. Running out of bytes is never an error here: decoders
//! return `None` so callers can resume once more data arrives.

use bytes::{Buf, BufMut};

use crate::error::{Error, ErrorCode, Result};

/// Largest encodable value, 2^62 - 1.
pub const MAX: u64 = (1u64 << 62) - 1;

/// True for the reserved values `0x1f * N + 0x21` that frame types,
/// setting identifiers and stream types use for greasing (RFC 9114
/// Section 7.2.8).
pub fn is_grease(value: u64) -> bool {
    value >= 0x21 && (value - 0x21) % 0x1f == 0
}

/// Encoded width announced by a varint's first byte.
#[inline]
pub fn width_of(first: u8) -> usize {
    1usize << (first >> 6)
}

/// Decode a variable-length integer from the start of a byte slice.
///
/// Returns the decoded value and the number of bytes consumed, or `None` if
/// `data` does not yet hold the whole encoding.
pub fn decode(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    let len = width_of(first);
    if data.len() < len {
        return None;
    }
    let mut value = u64::from(first & 0x3f);
    for &b in &data[1..len] {
        value = (value << 8) | u64::from(b);
    }
    Some((value, len))
}

/// Decode and consume a varint from `buf`. An incomplete varint leaves
/// `buf` untouched.
pub fn decode_buf<B: Buf>(buf: &mut B) -> Option<u64> {
    let len = width_of(*buf.chunk().first()?);
    if buf.remaining() < len {
        return None;
    }
    let mut raw = [0u8; 8];
    buf.copy_to_slice(&mut raw[..len]);
    decode(&raw[..len]).map(|(value, _)| value)
}

/// Calculate the minimal encoded length of a varint without encoding it.
pub fn encoded_len(value: u64) -> usize {
    match value {
        0..=0x3f => 1,
        0x40..=0x3fff => 2,
        0x4000..=0x3fff_ffff => 4,
        _ => 8,
    }
}

/// Encode a variable-length integer into a byte buffer using the minimal width.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns error if the value exceeds MAX or buffer is too small.
pub fn encode(value: u64, buf: &mut [u8]) -> Result<usize> {
    encode_with_len(value, encoded_len(value), buf)
}

/// Encode a variable-length integer using an explicit width of 1, 2, 4 or 8 bytes.
///
/// Wider-than-minimal encodings are valid on the wire and decode to the same
/// value.
///
/// # Errors
///
/// Returns error if the width is not a varint width, is too narrow for
/// `value`, or the buffer is too small.
pub fn encode_with_len(value: u64, len: usize, buf: &mut [u8]) -> Result<usize> {
    if value > MAX {
        return Err(Error::protocol(
            ErrorCode::InternalError,
            format!("varint value {} exceeds maximum", value),
        ));
    }
    let prefix: u8 = match len {
        1 => 0x00,
        2 => 0x40,
        4 => 0x80,
        8 => 0xc0,
        _ => {
            return Err(Error::protocol(
                ErrorCode::InternalError,
                format!("invalid varint width {}", len),
            ))
        }
    };
    if len < encoded_len(value) {
        return Err(Error::protocol(
            ErrorCode::InternalError,
            format!("varint value {} does not fit in {} bytes", value, len),
        ));
    }
    if buf.len() < len {
        return Err(Error::protocol(
            ErrorCode::InternalError,
            format!("buffer too small for varint: need {} bytes, have {}", len, buf.len()),
        ));
    }

    let bytes = value.to_be_bytes();
    buf[..len].copy_from_slice(&bytes[8 - len..]);
    buf[0] |= prefix;
    Ok(len)
}

/// Encode a variable-length integer into a buffer that implements BufMut.
///
/// # Errors
///
/// Returns error if value exceeds MAX or buffer has insufficient space.
pub fn encode_buf<B: BufMut>(value: u64, buf: &mut B) -> Result<usize> {
    encode_buf_with_len(value, encoded_len(value), buf)
}

/// [`encode_with_len`] for a BufMut destination.
pub fn encode_buf_with_len<B: BufMut>(value: u64, len: usize, buf: &mut B) -> Result<usize> {
    if buf.remaining_mut() < len {
        return Err(Error::protocol(
            ErrorCode::InternalError,
            format!("no room for a {len}-byte varint"),
        ));
    }
    let mut raw = [0u8; 8];
    let written = encode_with_len(value, len, &mut raw)?;
    buf.put_slice(&raw[..written]);
    Ok(written)
}

/// A varint being assembled from input that arrives in arbitrary pieces.
///
/// Used where a single varint prefixes a stream (unidirectional stream type,
/// push ID) and may be split across any number of reads.
#[derive(Debug, Clone, Default)]
pub struct PartialVarint {
    bytes: [u8; 8],
    have: usize,
}

impl PartialVarint {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no byte of the varint has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.have == 0
    }

    /// Consume bytes belonging to the varint from the front of `buf`.
    ///
    /// Returns the value once the final byte has been consumed; bytes after
    /// the varint are left in `buf`.
    pub fn feed<B: Buf>(&mut self, buf: &mut B) -> Option<u64> {
        while buf.has_remaining() {
            let need = if self.have == 0 {
                1
            } else {
                width_of(self.bytes[0])
            };
            let take = (need - self.have).min(buf.remaining());
            buf.copy_to_slice(&mut self.bytes[self.have..self.have + take]);
            self.have += take;

            let width = width_of(self.bytes[0]);
            if self.have == width {
                let value = decode(&self.bytes[..width]).map(|(v, _)| v);
                self.have = 0;
                return value;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_width_boundaries() {
        for (value, width) in [
            (0, 1),
            (63, 1),
            (64, 2),
            (16_383, 2),
            (16_384, 4),
            ((1 << 30) - 1, 4),
            (1 << 30, 8),
            (MAX, 8),
        ] {
            assert_eq!(encoded_len(value), width, "value {}", value);

            let mut out = BytesMut::new();
            assert_eq!(encode_buf(value, &mut out).unwrap(), width);
            assert_eq!(width_of(out[0]), width);

            let mut rest = out.freeze();
            assert_eq!(decode_buf(&mut rest), Some(value));
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_grease_pattern() {
        for value in [0x21, 0x40, 0x1f * 7 + 0x21, 0x1f * 1_000_000 + 0x21] {
            assert!(is_grease(value), "{:#x}", value);
        }
        for value in [0x00, 0x01, 0x20, 0x22, 0x3f] {
            assert!(!is_grease(value), "{:#x}", value);
        }
    }

    #[test]
    fn test_rfc9000_sample_encodings() {
        // RFC 9000 Appendix A.1
        assert_eq!(
            decode(&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]),
            Some((151_288_809_941_952_652, 8))
        );
        assert_eq!(decode(&[0x9d, 0x7f, 0x3e, 0x7d]), Some((494_878_333, 4)));
        assert_eq!(decode(&[0x7b, 0xbd]), Some((15_293, 2)));
        assert_eq!(decode(&[0x25]), Some((37, 1)));
        // Non-minimal two byte form of 37.
        assert_eq!(decode(&[0x40, 0x25]), Some((37, 2)));
    }

    #[test]
    fn test_redundant_eight_byte_form() {
        let mut buf = [0u8; 8];
        assert_eq!(encode_with_len(5, 8, &mut buf).unwrap(), 8);
        assert_eq!(buf, [0xc0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(decode(&buf), Some((5, 8)));
    }

    #[test]
    fn test_invalid_widths_rejected() {
        let mut buf = [0u8; 8];
        assert!(encode_with_len(5, 3, &mut buf).is_err());
        assert!(encode_with_len(64, 1, &mut buf).is_err());
        assert!(encode_with_len(MAX + 1, 8, &mut buf).is_err());
        assert!(encode_with_len(70, 2, &mut buf[..1]).is_err());
    }

    #[test]
    fn test_incomplete_varint() {
        let mut short = Bytes::from_static(&[0x40]);
        assert_eq!(decode_buf(&mut short), None);
        assert_eq!(short.len(), 1);
        assert_eq!(decode(&[0x80, 0x01, 0x02]), None);
        assert_eq!(decode(&[]), None);
    }

    #[test]
    fn test_partial_varint_byte_at_a_time() {
        let mut encoded = BytesMut::new();
        encode_buf(1_000_000, &mut encoded).unwrap();

        let mut partial = PartialVarint::new();
        let mut result = None;
        for (i, b) in encoded.iter().enumerate() {
            let mut chunk = Bytes::copy_from_slice(&[*b]);
            result = partial.feed(&mut chunk);
            if i + 1 < encoded.len() {
                assert!(result.is_none());
                assert!(!partial.is_empty());
            }
        }
        assert_eq!(result, Some(1_000_000));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_partial_varint_leaves_trailing_bytes() {
        let mut chunk = Bytes::from_static(&[0x41, 0x00, 0xaa, 0xbb]);
        let mut partial = PartialVarint::new();
        assert_eq!(partial.feed(&mut chunk), Some(256));
        assert_eq!(&chunk[..], &[0xaa, 0xbb]);
    }

    #[test]
    fn proptest_roundtrip_all_widths() {
        use proptest::prelude::*;

        proptest!(|(value in 0u64..=MAX, extra in 0usize..4)| {
            let widths = [1usize, 2, 4, 8];
            let minimal = widths.iter().position(|w| *w == encoded_len(value)).unwrap();
            let width = widths[(minimal + extra).min(3)];
            let mut buf = [0u8; 8];
            let n = encode_with_len(value, width, &mut buf).unwrap();
            assert_eq!(n, width);
            assert_eq!(decode(&buf[..n]), Some((value, width)));
        });
    }
}
