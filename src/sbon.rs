//! SBON — Starbound Object Notation.
//!
//! Varints, length-prefixed strings, and a dynamically-typed value tree,
//! read against the [`ByteStream`] abstraction and written into a plain
//! byte buffer; callers pump the resulting buffer through
//! [`crate::pipeline`].

use indexmap::IndexMap;
use tracing::instrument;

use crate::error::SbError;
use crate::stream::ByteStream;

/// Default recursion depth permitted while decoding a dynamic value.
///
/// The wire format has no depth field of its own; this guards against
/// hostile nesting driving the decoder into a stack overflow.
pub const DEFAULT_DEPTH_LIMIT: u32 = 64;

/// An ordered string-keyed map, preserving insertion order on both the read
/// and write paths.
pub type ValueMap = IndexMap<String, Value>;

/// A dynamically-typed SBON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Float(f64),
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

const TAG_NULL: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_INT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;

/// Read an unsigned base-128 varint: each byte contributes its low 7 bits,
/// most-significant byte first, terminated by the first byte whose top bit
/// is clear.
pub fn read_varint(stream: &mut impl ByteStream) -> Result<u64, SbError> {
    let mut value: u64 = 0;
    loop {
        let byte = stream.read(1)?[0];
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

/// Write `n` as an unsigned base-128 varint.
pub fn write_varint(n: u64, out: &mut Vec<u8>) {
    // Collect 7-bit groups least-significant-first, then emit
    // most-significant-first with continuation bits set on every byte but
    // the last.
    let mut groups = vec![(n & 0x7f) as u8];
    let mut rest = n >> 7;
    while rest != 0 {
        groups.push((rest & 0x7f) as u8);
        rest >>= 7;
    }
    for (i, group) in groups.iter().rev().enumerate() {
        let is_last = i == groups.len() - 1;
        out.push(if is_last { *group } else { group | 0x80 });
    }
}

/// Read a signed varint: decode the unsigned varint `u`, then `u >> 1` if
/// `u` is even, else `-((u >> 1) + 1)`.
pub fn read_signed_varint(stream: &mut impl ByteStream) -> Result<i64, SbError> {
    let u = read_varint(stream)?;
    Ok(if u & 1 == 0 {
        (u >> 1) as i64
    } else {
        -(((u >> 1) + 1) as i64)
    })
}

/// Write a signed varint using the inverse mapping of [`read_signed_varint`].
pub fn write_signed_varint(n: i64, out: &mut Vec<u8>) {
    let u = if n >= 0 {
        (n as u64) << 1
    } else {
        (((-n - 1) as u64) << 1) | 1
    };
    write_varint(u, out);
}

/// Read a varint-prefixed byte block. A zero length yields an empty block.
pub fn read_bytes(stream: &mut impl ByteStream) -> Result<Vec<u8>, SbError> {
    let len = read_varint(stream)?;
    if len == 0 {
        return Ok(Vec::new());
    }
    stream.read(len as usize)
}

/// Write `bytes` as a varint-prefixed byte block.
pub fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    write_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Read a varint-prefixed UTF-8 string. Invalid UTF-8 is a [`SbError::Malformed`]
/// error rather than being replaced with the Unicode replacement character.
pub fn read_string(stream: &mut impl ByteStream) -> Result<String, SbError> {
    let bytes = read_bytes(stream)?;
    String::from_utf8(bytes).map_err(|e| SbError::Malformed(format!("invalid UTF-8 string: {e}")))
}

/// Write `s` as a varint-prefixed UTF-8 string.
pub fn write_string(s: &str, out: &mut Vec<u8>) {
    write_bytes(s.as_bytes(), out);
}

/// Read a single-byte-tagged dynamic value, enforcing `depth_limit` levels
/// of list/map nesting.
#[instrument(skip(stream))]
pub fn read_dynamic(stream: &mut impl ByteStream, depth_limit: u32) -> Result<Value, SbError> {
    read_dynamic_at_depth(stream, depth_limit, 0)
}

fn read_dynamic_at_depth(
    stream: &mut impl ByteStream,
    depth_limit: u32,
    depth: u32,
) -> Result<Value, SbError> {
    if depth > depth_limit {
        return Err(SbError::Malformed(format!(
            "dynamic value nesting exceeds depth limit of {depth_limit}"
        )));
    }

    let tag = stream.read(1)?[0];
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_FLOAT => {
            let bytes = stream.read(8)?;
            Value::Float(f64::from_be_bytes(bytes.try_into().unwrap()))
        }
        TAG_BOOL => {
            let byte = stream.read(1)?[0];
            match byte {
                0x00 => Value::Bool(false),
                0x01 => Value::Bool(true),
                other => {
                    return Err(SbError::Malformed(format!(
                        "invalid bool byte: 0x{other:02x}"
                    )))
                }
            }
        }
        TAG_INT => Value::Int(read_signed_varint(stream)?),
        TAG_STRING => Value::String(read_string(stream)?),
        TAG_LIST => {
            let n = read_varint(stream)?;
            let mut list = Vec::with_capacity(n as usize);
            for _ in 0..n {
                list.push(read_dynamic_at_depth(stream, depth_limit, depth + 1)?);
            }
            Value::List(list)
        }
        TAG_MAP => {
            let n = read_varint(stream)?;
            let mut map = ValueMap::with_capacity(n as usize);
            for _ in 0..n {
                let key = read_string(stream)?;
                let value = read_dynamic_at_depth(stream, depth_limit, depth + 1)?;
                // Last-wins on duplicate keys.
                map.insert(key, value);
            }
            Value::Map(map)
        }
        other => return Err(SbError::Malformed(format!("unknown dynamic tag: {other}"))),
    };
    Ok(value)
}

/// Write a dynamic value: one type-tag byte, then its payload.
#[instrument(skip(out))]
pub fn write_dynamic(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(if *b { 0x01 } else { 0x00 });
        }
        Value::Int(n) => {
            out.push(TAG_INT);
            write_signed_varint(*n, out);
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            write_string(s, out);
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            write_varint(items.len() as u64, out);
            for item in items {
                write_dynamic(item, out);
            }
        }
        Value::Map(map) => {
            out.push(TAG_MAP);
            write_varint(map.len() as u64, out);
            for (key, value) in map {
                write_string(key, out);
                write_dynamic(value, out);
            }
        }
    }
}
