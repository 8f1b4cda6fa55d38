//! Canonical binary encoding for [`Value`] trees.
//!
//! The format is a bencode dialect with explicit text, null and boolean
//! tokens:
//!
//! ```text
//! null     n
//! bool     t | f
//! integer  i<decimal>e          no leading zeros, no "-0"
//! bytes    <len>:<raw>
//! text     u<len>:<utf-8>
//! list     l<item>*e
//! map      d(<key><value>)*e    keys strictly ascending by encoded bytes
//! ```
//!
//! Every value has exactly one encoding. The decoder rejects anything the
//! encoder would not have produced, so `encode(decode(b)) == b` for all
//! accepted input. Signatures and transaction ids are computed over these
//! bytes, which is why this format must never change.

use num_bigint::BigInt;
use thiserror::Error;

use super::types::{Value, ValueMap};
use crate::config::MAX_VALUE_DEPTH;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a byte stream is not a canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte { offset: usize, byte: u8 },

    #[error("malformed or non-canonical integer at offset {offset}")]
    InvalidInteger { offset: usize },

    #[error("malformed or non-canonical length prefix at offset {offset}")]
    InvalidLength { offset: usize },

    #[error("text at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("map keys at offset {offset} are unsorted or duplicated")]
    NonCanonicalMap { offset: usize },

    #[error("value nesting exceeds the maximum depth of {max}")]
    DepthExceeded { max: usize },

    #[error("{count} trailing bytes after value at offset {offset}")]
    TrailingBytes { offset: usize, count: usize },
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes a value into its canonical bytes.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    encode_into(value, &mut out);
    out
}

/// Appends the canonical encoding of `value` to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(b'n'),
        Value::Bool(true) => out.push(b't'),
        Value::Bool(false) => out.push(b'f'),
        Value::Integer(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
        }
        Value::Text(text) => {
            out.push(b'u');
            out.extend_from_slice(text.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(text.as_bytes());
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Map(map) => {
            let mut entries: Vec<(Vec<u8>, &Value)> =
                map.iter().map(|(k, v)| (encode(k), v)).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            out.push(b'd');
            for (key, value) in entries {
                out.extend_from_slice(&key);
                encode_into(value, out);
            }
            out.push(b'e');
        }
    }
}

/// Checks that a value stays within the depth the decoder accepts.
///
/// Encoding itself cannot fail, but a tree deeper than
/// [`MAX_VALUE_DEPTH`] would produce bytes no node could decode.
pub fn ensure_encodable(value: &Value) -> Result<(), CodecError> {
    if value.depth() > MAX_VALUE_DEPTH {
        return Err(CodecError::DepthExceeded {
            max: MAX_VALUE_DEPTH,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes exactly one canonical value from `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut decoder = Decoder { input: bytes, pos: 0 };
    let value = decoder.value(0)?;
    if decoder.pos != bytes.len() {
        return Err(CodecError::TrailingBytes {
            offset: decoder.pos,
            count: bytes.len() - decoder.pos,
        });
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, CodecError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEof { offset: self.pos })
    }

    fn next(&mut self) -> Result<u8, CodecError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(CodecError::UnexpectedEof {
                offset: self.input.len(),
            })?;
        let slice = &self.input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn value(&mut self, depth: usize) -> Result<Value, CodecError> {
        let offset = self.pos;
        match self.peek()? {
            b'n' => {
                self.pos += 1;
                Ok(Value::Null)
            }
            b't' => {
                self.pos += 1;
                Ok(Value::Bool(true))
            }
            b'f' => {
                self.pos += 1;
                Ok(Value::Bool(false))
            }
            b'i' => {
                self.pos += 1;
                self.integer().map(Value::Integer)
            }
            b'u' => {
                self.pos += 1;
                let len = self.length()?;
                let raw = self.take(len)?;
                let text = std::str::from_utf8(raw)
                    .map_err(|_| CodecError::InvalidUtf8 { offset })?;
                Ok(Value::Text(text.to_string()))
            }
            b'0'..=b'9' => {
                let len = self.length()?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            b'l' => {
                self.pos += 1;
                let depth = Self::descend(depth)?;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let depth = Self::descend(depth)?;
                let mut map = ValueMap::new();
                let mut previous_key: Option<&'a [u8]> = None;
                while self.peek()? != b'e' {
                    let key_start = self.pos;
                    let key = self.value(depth)?;
                    let key_bytes = &self.input[key_start..self.pos];
                    if let Some(prev) = previous_key {
                        if key_bytes <= prev {
                            return Err(CodecError::NonCanonicalMap { offset: key_start });
                        }
                    }
                    previous_key = Some(key_bytes);
                    let value = self.value(depth)?;
                    map.insert(key, value);
                }
                self.pos += 1;
                Ok(Value::Map(map))
            }
            byte => Err(CodecError::UnexpectedByte { offset, byte }),
        }
    }

    fn descend(depth: usize) -> Result<usize, CodecError> {
        let depth = depth + 1;
        if depth > MAX_VALUE_DEPTH {
            return Err(CodecError::DepthExceeded {
                max: MAX_VALUE_DEPTH,
            });
        }
        Ok(depth)
    }

    /// Parses `<digits>e` after the leading `i`.
    fn integer(&mut self) -> Result<BigInt, CodecError> {
        let start = self.pos;
        loop {
            match self.next()? {
                b'e' => break,
                b'-' | b'0'..=b'9' => {}
                _ => return Err(CodecError::InvalidInteger { offset: start }),
            }
        }
        let digits = &self.input[start..self.pos - 1];
        let (negative, magnitude) = match digits.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, digits),
        };
        let canonical = !magnitude.is_empty()
            && magnitude.iter().all(u8::is_ascii_digit)
            && (magnitude.len() == 1 || magnitude[0] != b'0')
            && !(negative && magnitude == b"0");
        if !canonical {
            return Err(CodecError::InvalidInteger { offset: start });
        }
        BigInt::parse_bytes(digits, 10).ok_or(CodecError::InvalidInteger { offset: start })
    }

    /// Parses `<digits>:` and returns the length.
    fn length(&mut self) -> Result<usize, CodecError> {
        let start = self.pos;
        let mut len: usize = 0;
        loop {
            match self.next()? {
                b':' => break,
                digit @ b'0'..=b'9' => {
                    if self.pos - start > 1 && self.input[start] == b'0' {
                        return Err(CodecError::InvalidLength { offset: start });
                    }
                    len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add((digit - b'0') as usize))
                        .ok_or(CodecError::InvalidLength { offset: start })?;
                }
                _ => return Err(CodecError::InvalidLength { offset: start }),
            }
        }
        if self.pos - start == 1 {
            return Err(CodecError::InvalidLength { offset: start });
        }
        Ok(len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_encodings() {
        assert_eq!(encode(&Value::Null), b"n");
        assert_eq!(encode(&Value::Bool(true)), b"t");
        assert_eq!(encode(&Value::Bool(false)), b"f");
        assert_eq!(encode(&Value::from(-42i64)), b"i-42e");
        assert_eq!(encode(&Value::from(0u64)), b"i0e");
        assert_eq!(encode(&Value::from(b"spam".to_vec())), b"4:spam");
        assert_eq!(encode(&Value::from("héllo")), "u6:héllo".as_bytes());
    }

    #[test]
    fn map_entries_are_sorted_by_encoded_key() {
        let value = Value::map([("b", 2u64), ("a", 1u64)]);
        assert_eq!(encode(&value), b"du1:ai1eu1:bi2ee");

        // Bytes keys ("1:...") sort before text keys ("u...").
        let mut mixed = ValueMap::new();
        mixed.insert("z", Value::Null);
        mixed.insert(b"z".to_vec(), Value::Null);
        assert_eq!(encode(&Value::Map(mixed)), b"d1:znu1:zne");
    }

    #[test]
    fn equal_maps_encode_identically() {
        let a = Value::map([("x", Value::list([1u64, 2u64])), ("y", Value::Null)]);
        let b = Value::map([("y", Value::Null), ("x", Value::list([1u64, 2u64]))]);
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn nested_value_decodes_back() {
        let value = Value::map([
            ("amount", Value::Integer(BigInt::from(u64::MAX) * 1000)),
            ("memo", Value::from("for lunch")),
            ("to", Value::from(vec![0xABu8; 20])),
            ("flags", Value::list([Value::Bool(true), Value::Null])),
        ]);
        let bytes = encode(&value);
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn rejects_non_canonical_integers() {
        for bad in [&b"i01e"[..], b"i-0e", b"ie", b"i-e", b"i1-e", b"i+1e"] {
            assert!(
                matches!(decode(bad), Err(CodecError::InvalidInteger { .. })),
                "accepted {:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn rejects_non_canonical_lengths() {
        assert!(matches!(
            decode(b"04:spam"),
            Err(CodecError::InvalidLength { .. })
        ));
        assert!(matches!(decode(b"u:"), Err(CodecError::InvalidLength { .. })));
    }

    #[test]
    fn rejects_unsorted_and_duplicate_keys() {
        assert!(matches!(
            decode(b"du1:bi2eu1:ai1ee"),
            Err(CodecError::NonCanonicalMap { .. })
        ));
        assert!(matches!(
            decode(b"du1:ai1eu1:ai2ee"),
            Err(CodecError::NonCanonicalMap { .. })
        ));
    }

    #[test]
    fn rejects_truncation_and_trailing_bytes() {
        assert!(matches!(
            decode(b"5:spam"),
            Err(CodecError::UnexpectedEof { .. })
        ));
        assert!(matches!(decode(b"li1e"), Err(CodecError::UnexpectedEof { .. })));
        assert_eq!(
            decode(b"nn"),
            Err(CodecError::TrailingBytes { offset: 1, count: 1 })
        );
    }

    #[test]
    fn rejects_invalid_utf8_text() {
        assert!(matches!(
            decode(b"u2:\xff\xfe"),
            Err(CodecError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn depth_limit_applies_to_both_directions() {
        let mut deep = Value::Null;
        for _ in 0..=MAX_VALUE_DEPTH {
            deep = Value::List(vec![deep]);
        }
        assert!(ensure_encodable(&deep).is_err());
        assert!(matches!(
            decode(&encode(&deep)),
            Err(CodecError::DepthExceeded { .. })
        ));

        let mut ok = Value::Null;
        for _ in 0..MAX_VALUE_DEPTH {
            ok = Value::List(vec![ok]);
        }
        assert!(ensure_encodable(&ok).is_ok());
        assert_eq!(decode(&encode(&ok)).unwrap(), ok);
    }

    #[test]
    fn unknown_token_is_reported_with_offset() {
        assert_eq!(
            decode(b"lxe"),
            Err(CodecError::UnexpectedByte { offset: 1, byte: b'x' })
        );
    }
}
