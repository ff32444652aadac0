//! Order-preserving encoding for variable-length key segments.
//!
//! Variable-length byte strings embedded in composite storage keys are
//! escaped and terminated with `0x00`:
//!
//! - `0x00` → `0x01 0x01`
//! - `0x01` → `0x01 0x02`
//! - `0xFF` → `0x01 0x03`
//! - all other bytes unchanged
//! - terminated with a single `0x00`
//!
//! Using `0x00` as the terminator keeps shorter strings sorting before
//! longer strings sharing the same prefix ("foo" < "foo/bar"), which is what
//! prefix range scans rely on.

use bytes::{BufMut, Bytes, BytesMut};

use super::DeserializeError;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0x01;

/// Appends the escaped, terminated encoding of `data` to `buf`.
pub fn serialize(data: &[u8], buf: &mut BytesMut) {
    for &b in data {
        match b {
            0x00 => {
                buf.put_u8(ESCAPE);
                buf.put_u8(0x01);
            }
            0x01 => {
                buf.put_u8(ESCAPE);
                buf.put_u8(0x02);
            }
            0xFF => {
                buf.put_u8(ESCAPE);
                buf.put_u8(0x03);
            }
            other => buf.put_u8(other),
        }
    }
    buf.put_u8(TERMINATOR);
}

/// Reads one terminated byte string from the front of `buf`, advancing it
/// past the terminator.
pub fn deserialize(buf: &mut &[u8]) -> Result<Bytes, DeserializeError> {
    let mut out = BytesMut::new();
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            TERMINATOR => {
                *buf = &buf[i + 1..];
                return Ok(out.freeze());
            }
            ESCAPE => {
                let escaped = buf
                    .get(i + 1)
                    .ok_or_else(|| DeserializeError::new("truncated escape sequence"))?;
                let b = match escaped {
                    0x01 => 0x00,
                    0x02 => 0x01,
                    0x03 => 0xFF,
                    other => {
                        return Err(DeserializeError::new(format!(
                            "invalid escape byte: 0x{:02x}",
                            other
                        )));
                    }
                };
                out.put_u8(b);
                i += 2;
            }
            other => {
                out.put_u8(other);
                i += 1;
            }
        }
    }
    Err(DeserializeError::new("missing terminator"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(data: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        serialize(data, &mut buf);
        buf.freeze()
    }

    #[test]
    fn should_round_trip_plain_bytes() {
        // given
        let encoded = encode(b"video/x1");

        // when
        let mut slice = encoded.as_ref();
        let decoded = deserialize(&mut slice).unwrap();

        // then
        assert_eq!(decoded.as_ref(), b"video/x1");
        assert!(slice.is_empty());
    }

    #[test]
    fn should_escape_reserved_bytes() {
        // given
        let encoded = encode(&[0x00, 0x01, 0xFF]);

        // then
        assert_eq!(encoded.as_ref(), &[0x01, 0x01, 0x01, 0x02, 0x01, 0x03, 0x00]);

        // when
        let mut slice = encoded.as_ref();
        let decoded = deserialize(&mut slice).unwrap();

        // then
        assert_eq!(decoded.as_ref(), &[0x00, 0x01, 0xFF]);
    }

    #[test]
    fn should_sort_prefixes_before_extensions() {
        // given
        let short = encode(b"video");
        let long = encode(b"video/x1");

        // then
        assert!(short < long);
    }

    #[test]
    fn should_leave_remaining_bytes_after_terminator() {
        // given
        let mut buf = BytesMut::new();
        serialize(b"a", &mut buf);
        buf.put_u8(0x42);
        let encoded = buf.freeze();

        // when
        let mut slice = encoded.as_ref();
        let decoded = deserialize(&mut slice).unwrap();

        // then
        assert_eq!(decoded.as_ref(), b"a");
        assert_eq!(slice, &[0x42]);
    }

    #[test]
    fn should_fail_without_terminator() {
        // given
        let data = [b'a', b'b'];

        // when
        let mut slice = &data[..];
        let result = deserialize(&mut slice);

        // then
        assert!(result.is_err());
    }
}
