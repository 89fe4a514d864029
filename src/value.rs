//! Self-describing wire value.
//!
//! Every payload on the wire — request bodies, response bodies,
//! notifications — is an instance of [`Value`]. Encoding is hand-written: no
//! derive-based serializer ever touches these bytes, so the format is fixed
//! and documented here rather than implied by whatever a library happens to
//! emit.
//!
//! Wire shape, one byte of tag followed by a type-specific body:
//!
//! | tag | variant | body |
//! |-----|---------|------|
//! | 0   | Null    | (none) |
//! | 1   | Bool    | one byte, 0 or 1 |
//! | 2   | Int     | 8 bytes, i64 little-endian |
//! | 3   | Float   | 8 bytes, f64 little-endian |
//! | 4   | Str     | u32 LE byte length, then that many UTF-8 bytes |
//! | 5   | Bytes   | u32 LE byte length, then that many raw bytes |
//! | 6   | List    | u32 LE element count, then that many encoded values |
//! | 7   | Map     | u32 LE entry count, then that many (Str key, value) pairs |
//!
//! Decoding a value that doesn't fully consume its declared length, or that
//! hits an unknown tag, is a protocol error — never a panic.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;

impl Value {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(TAG_NULL),
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(if *b { 1 } else { 0 });
            }
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(x) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&x.to_le_bytes());
            }
            Value::Str(s) => {
                out.push(TAG_STR);
                encode_bytes(out, s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(TAG_BYTES);
                encode_bytes(out, b);
            }
            Value::List(items) => {
                out.push(TAG_LIST);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            Value::Map(entries) => {
                out.push(TAG_MAP);
                out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
                for (k, v) in entries {
                    encode_bytes(out, k.as_bytes());
                    v.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decode a single value starting at `buf[0]`, returning it and the
    /// number of bytes consumed. Rejects anything that doesn't fully parse.
    pub fn decode(buf: &[u8]) -> Result<(Value, usize)> {
        let mut cursor = Cursor { buf, pos: 0 };
        let value = cursor.read_value()?;
        Ok((value, cursor.pos))
    }

    /// Decode a value that must consume the whole buffer; trailing bytes
    /// are a protocol error.
    pub fn from_bytes_exact(buf: &[u8]) -> Result<Value> {
        let (value, consumed) = Value::decode(buf)?;
        if consumed != buf.len() {
            return Err(Error::protocol(format!(
                "trailing garbage after value: {} of {} bytes consumed",
                consumed,
                buf.len()
            )));
        }
        Ok(value)
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::protocol("unexpected end of value buffer"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_len_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn read_len_string(&mut self) -> Result<String> {
        let bytes = self.read_len_bytes()?;
        String::from_utf8(bytes).map_err(|e| Error::protocol(format!("invalid utf-8: {e}")))
    }

    fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_u8()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => Ok(Value::Bool(self.read_u8()? != 0)),
            TAG_INT => {
                let b = self.take(8)?;
                Ok(Value::Int(i64::from_le_bytes(b.try_into().unwrap())))
            }
            TAG_FLOAT => {
                let b = self.take(8)?;
                Ok(Value::Float(f64::from_le_bytes(b.try_into().unwrap())))
            }
            TAG_STR => Ok(Value::Str(self.read_len_string()?)),
            TAG_BYTES => Ok(Value::Bytes(self.read_len_bytes()?)),
            TAG_LIST => {
                let count = self.read_u32()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::List(items))
            }
            TAG_MAP => {
                let count = self.read_u32()?;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = self.read_len_string()?;
                    let val = self.read_value()?;
                    entries.insert(key, val);
                }
                Ok(Value::Map(entries))
            }
            other => Err(Error::protocol(format!("unknown value tag {other}"))),
        }
    }
}

/// Convenience builder for `Value::Map` bodies, used throughout the
/// business-logic modules so handler code reads like
/// `map().set("status", "ok").set("id", 3).build()` instead of constructing
/// a `BTreeMap` by hand at every call site.
#[derive(Default)]
pub struct MapBuilder(BTreeMap<String, Value>);

pub fn map() -> MapBuilder {
    MapBuilder::default()
}

impl MapBuilder {
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Value {
        Value::Map(self.0)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(-42),
            Value::Float(3.25),
            Value::Str("hello".into()),
            Value::Bytes(vec![1, 2, 3, 0, 255]),
            Value::List(vec![Value::Int(1), Value::Str("x".into())]),
            map().set("status", "ok").set("id", 7i64).build(),
        ];
        for v in values {
            let bytes = v.to_bytes();
            let decoded = Value::from_bytes_exact(&bytes).unwrap();
            assert_eq!(v, decoded);
        }
    }

    #[test]
    fn nested_map_round_trips() {
        let inner = map().set("a", 1i64).set("b", "two").build();
        let outer = map().set("inner", inner.clone()).build();
        let bytes = outer.to_bytes();
        let decoded = Value::from_bytes_exact(&bytes).unwrap();
        assert_eq!(outer, decoded);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let v = Value::Str("hello world".into());
        let bytes = v.to_bytes();
        let truncated = &bytes[..bytes.len() - 2];
        assert!(Value::decode(truncated).is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        let v = Value::Int(5);
        let mut bytes = v.to_bytes();
        bytes.push(0xFF);
        assert!(Value::from_bytes_exact(&bytes).is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        let bytes = vec![200u8];
        assert!(Value::decode(&bytes).is_err());
    }
}
