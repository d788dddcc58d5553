//! Argument and result values.
//!
//! Every call carries an ordered list of [`Variant`] values and every
//! response answers with one. Encoding:
//!
//! ```text
//! args    := varuint(count) value*
//! value   := varuint(tag) body
//! Int64=0 / Int=8 : zig-zag varint
//! Double=1        : f64, little-endian
//! String=2        : varuint(len) bytes
//! Bool=3          : varuint 0 | 1
//! Null=4          : (empty)
//! Tuple=11        : varuint(count) value*
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use std::ops::Deref;

const TAG_INT64: u64 = 0;
const TAG_DOUBLE: u64 = 1;
const TAG_STRING: u64 = 2;
const TAG_BOOL: u64 = 3;
const TAG_NULL: u64 = 4;
const TAG_INT: u64 = 8;
const TAG_TUPLE: u64 = 11;

/// Maximum tuple nesting accepted by the decoder.
pub const MAX_NESTING: usize = 32;

/// A single argument or result value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Variant {
    Null,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Double(f64),
    String(String),
    /// Raw bytes; shares the string tag on the wire.
    Bytes(Vec<u8>),
    Tuple(Vec<Variant>),
}

impl Variant {
    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    /// Returns the value as an integer if it is `Int` or `Int64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Int(v) => Some(i64::from(*v)),
            Variant::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the raw bytes of a `String` or `Bytes` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Variant::String(s) => Some(s.as_bytes()),
            Variant::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Variant]> {
        match self {
            Variant::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Appends the wire encoding of this value.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Variant::Null => put_varuint(buf, TAG_NULL),
            Variant::Bool(v) => {
                put_varuint(buf, TAG_BOOL);
                put_varuint(buf, u64::from(*v));
            }
            Variant::Int(v) => {
                put_varuint(buf, TAG_INT);
                put_varint(buf, i64::from(*v));
            }
            Variant::Int64(v) => {
                put_varuint(buf, TAG_INT64);
                put_varint(buf, *v);
            }
            Variant::Double(v) => {
                put_varuint(buf, TAG_DOUBLE);
                buf.put_f64_le(*v);
            }
            Variant::String(s) => {
                put_varuint(buf, TAG_STRING);
                put_vbytes(buf, s.as_bytes());
            }
            Variant::Bytes(b) => {
                put_varuint(buf, TAG_STRING);
                put_vbytes(buf, b);
            }
            Variant::Tuple(items) => {
                put_varuint(buf, TAG_TUPLE);
                put_varuint(buf, items.len() as u64);
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }

    /// Decodes one value from the front of `buf`.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        Self::decode_nested(buf, 0)
    }

    fn decode_nested(buf: &mut &[u8], depth: usize) -> Result<Self, ProtocolError> {
        if depth > MAX_NESTING {
            return Err(ProtocolError::NestingTooDeep(MAX_NESTING));
        }
        let tag = get_varuint(buf)?;
        let value = match tag {
            TAG_NULL => Variant::Null,
            TAG_BOOL => Variant::Bool(get_varuint(buf)? != 0),
            TAG_INT => {
                let v = get_varint(buf)?;
                // Peers are free to send small Int64 values under the Int tag
                // and vice versa; keep the narrow type only when it fits.
                match i32::try_from(v) {
                    Ok(v) => Variant::Int(v),
                    Err(_) => Variant::Int64(v),
                }
            }
            TAG_INT64 => Variant::Int64(get_varint(buf)?),
            TAG_DOUBLE => {
                ensure(buf, 8)?;
                Variant::Double(buf.get_f64_le())
            }
            TAG_STRING => {
                let raw = get_vbytes(buf)?;
                match String::from_utf8(raw.to_vec()) {
                    Ok(s) => Variant::String(s),
                    Err(e) => Variant::Bytes(e.into_bytes()),
                }
            }
            TAG_TUPLE => {
                let count = get_varuint(buf)?;
                let mut items = Vec::with_capacity(bounded_capacity(count, buf.len()));
                for _ in 0..count {
                    items.push(Self::decode_nested(buf, depth + 1)?);
                }
                Variant::Tuple(items)
            }
            other => return Err(ProtocolError::InvalidTag(other)),
        };
        Ok(value)
    }
}

impl From<()> for Variant {
    fn from(_: ()) -> Self {
        Variant::Null
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::Int64(i64::from(v))
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int64(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<&String> for Variant {
    fn from(v: &String) -> Self {
        Variant::String(v.clone())
    }
}

impl From<Vec<u8>> for Variant {
    fn from(v: Vec<u8>) -> Self {
        Variant::Bytes(v)
    }
}

impl From<&[u8]> for Variant {
    fn from(v: &[u8]) -> Self {
        Variant::Bytes(v.to_vec())
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(v: Vec<Variant>) -> Self {
        Variant::Tuple(v)
    }
}

impl<T: Into<Variant>> From<Option<T>> for Variant {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Variant::Null)
    }
}

/// An ordered list of values: the arguments of a call or the result of a
/// response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Args(Vec<Variant>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Appends a value.
    pub fn push(&mut self, value: impl Into<Variant>) {
        self.0.push(value.into());
    }

    /// Builder-style [`Args::push`].
    pub fn with(mut self, value: impl Into<Variant>) -> Self {
        self.push(value);
        self
    }

    pub fn into_inner(self) -> Vec<Variant> {
        self.0
    }

    /// Appends the wire encoding of the whole list.
    pub fn encode(&self, buf: &mut BytesMut) {
        put_varuint(buf, self.0.len() as u64);
        for value in &self.0 {
            value.encode(buf);
        }
    }

    /// Decodes a list from the front of `buf`, advancing it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let count = get_varuint(buf)?;
        let mut values = Vec::with_capacity(bounded_capacity(count, buf.len()));
        for _ in 0..count {
            values.push(Variant::decode(buf)?);
        }
        Ok(Self(values))
    }

    /// Fails unless at least `min` values are present.
    pub fn require(self, min: usize) -> Result<Self, ProtocolError> {
        if self.0.len() < min {
            return Err(ProtocolError::NotEnoughArgs {
                expected: min,
                actual: self.0.len(),
            });
        }
        Ok(self)
    }
}

impl Deref for Args {
    type Target = [Variant];

    fn deref(&self) -> &[Variant] {
        &self.0
    }
}

impl From<Vec<Variant>> for Args {
    fn from(values: Vec<Variant>) -> Self {
        Self(values)
    }
}

impl<V: Into<Variant>> FromIterator<V> for Args {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for Args {
    type Item = Variant;
    type IntoIter = std::vec::IntoIter<Variant>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Builds an [`Args`] list from heterogeneous values, preserving order.
///
/// ```
/// use cproto_protocol::{args, Variant};
///
/// let args = args!["items", 10, true];
/// assert_eq!(args[1], Variant::Int(10));
/// ```
#[macro_export]
macro_rules! args {
    () => { $crate::Args::new() };
    ($($value:expr),+ $(,)?) => {
        $crate::Args::from(vec![$($crate::Variant::from($value)),+])
    };
}

fn bounded_capacity(count: u64, remaining: usize) -> usize {
    // Every value takes at least one byte.
    usize::try_from(count).unwrap_or(usize::MAX).min(remaining)
}

fn ensure(buf: &[u8], len: usize) -> Result<(), ProtocolError> {
    if buf.len() < len {
        return Err(ProtocolError::Truncated {
            needed: len - buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn put_varuint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub(crate) fn get_varuint(buf: &mut &[u8]) -> Result<u64, ProtocolError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        ensure(buf, 1)?;
        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(ProtocolError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(ProtocolError::VarintOverflow);
        }
    }
}

pub(crate) fn put_varint(buf: &mut BytesMut, value: i64) {
    put_varuint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

pub(crate) fn get_varint(buf: &mut &[u8]) -> Result<i64, ProtocolError> {
    let raw = get_varuint(buf)?;
    Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

pub(crate) fn put_vbytes(buf: &mut BytesMut, bytes: &[u8]) {
    put_varuint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

pub(crate) fn get_vbytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    let len = get_varuint(buf)?;
    let len = usize::try_from(len).map_err(|_| ProtocolError::VarintOverflow)?;
    ensure(buf, len)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encoded(args: &Args) -> BytesMut {
        let mut buf = BytesMut::new();
        args.encode(&mut buf);
        buf
    }

    #[test]
    fn test_args_macro_preserves_order_and_types() {
        let args = args!["ns", 7, 9_000_000_000i64, 1.5, true, (), vec![1u8, 2]];
        assert_eq!(args.len(), 7);
        assert_eq!(args[0], Variant::String("ns".into()));
        assert_eq!(args[1], Variant::Int(7));
        assert_eq!(args[2], Variant::Int64(9_000_000_000));
        assert_eq!(args[3], Variant::Double(1.5));
        assert_eq!(args[4], Variant::Bool(true));
        assert!(args[5].is_null());
        assert_eq!(args[6], Variant::Bytes(vec![1, 2]));
    }

    #[test]
    fn test_empty_args_encoding() {
        let buf = encoded(&args![]);
        assert_eq!(&buf[..], &[0u8]);
    }

    #[test]
    fn test_known_encoding() {
        let buf = encoded(&args![-1, "ab"]);
        // count=2, Int tag=8, zigzag(-1)=1, String tag=2, len=2, 'a', 'b'
        assert_eq!(&buf[..], &[2, 8, 1, 2, 2, b'a', b'b']);
    }

    #[test]
    fn test_nested_tuple_decodes() {
        let args = args![Variant::Tuple(vec![Variant::Int(1), Variant::Tuple(vec![])])];
        let buf = encoded(&args);
        let mut slice = &buf[..];
        let decoded = Args::decode(&mut slice).unwrap();
        assert_eq!(decoded, args);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_non_utf8_string_decodes_as_bytes() {
        let buf = encoded(&args![vec![0xFFu8, 0xFE]]);
        let decoded = Args::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded[0], Variant::Bytes(vec![0xFF, 0xFE]));
        assert_eq!(decoded[0].as_bytes(), Some(&[0xFF, 0xFE][..]));
    }

    #[test]
    fn test_wide_int_under_int_tag_widens() {
        let mut buf = BytesMut::new();
        put_varuint(&mut buf, 1);
        put_varuint(&mut buf, TAG_INT);
        put_varint(&mut buf, i64::from(i32::MAX) + 1);
        let decoded = Args::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded[0].as_i64(), Some(i64::from(i32::MAX) + 1));
    }

    #[test]
    fn test_truncated_string() {
        let buf = encoded(&args!["hello"]);
        let result = Args::decode(&mut &buf[..buf.len() - 2]);
        assert!(matches!(result, Err(ProtocolError::Truncated { needed: 2 })));
    }

    #[test]
    fn test_invalid_tag() {
        let result = Args::decode(&mut &[1u8, 5][..]);
        assert!(matches!(result, Err(ProtocolError::InvalidTag(5))));
    }

    #[test]
    fn test_varint_overflow() {
        let bytes = [0xFFu8; 11];
        assert!(matches!(
            get_varuint(&mut &bytes[..]),
            Err(ProtocolError::VarintOverflow)
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut value = Variant::Null;
        for _ in 0..=MAX_NESTING + 1 {
            value = Variant::Tuple(vec![value]);
        }
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        assert!(matches!(
            Variant::decode(&mut &buf[..]),
            Err(ProtocolError::NestingTooDeep(_))
        ));
    }

    #[test]
    fn test_huge_count_does_not_preallocate() {
        let mut buf = BytesMut::new();
        put_varuint(&mut buf, u64::MAX >> 1);
        let result = Args::decode(&mut &buf[..]);
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_require() {
        let args = args![1, 2];
        assert!(args.clone().require(2).is_ok());
        assert!(matches!(
            args.require(3),
            Err(ProtocolError::NotEnoughArgs {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_variant_json() {
        let args = args!["a", 1, (), true];
        let json = serde_json::to_string(&args).unwrap();
        assert_eq!(json, r#"["a",1,null,true]"#);
    }

    proptest! {
        #[test]
        fn prop_varint_roundtrip(value in any::<i64>()) {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            let mut slice = &buf[..];
            prop_assert_eq!(get_varint(&mut slice).unwrap(), value);
            prop_assert!(slice.is_empty());
        }

        #[test]
        fn prop_varuint_roundtrip(value in any::<u64>()) {
            let mut buf = BytesMut::new();
            put_varuint(&mut buf, value);
            prop_assert!(buf.len() <= 10);
            prop_assert_eq!(get_varuint(&mut &buf[..]).unwrap(), value);
        }
    }
}
