//! Payload values
//!
//! Requests and responses are trees of `Value`s, encoded by a `ValueCodec`.

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};

/// Deepest `Array` nesting accepted from the wire
pub const MAX_NESTING: usize = 64;

/// A self-describing payload value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Uint(u64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of a `Bytes` value. Strings are accepted too, as their UTF-8.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Uint(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Turns values into frame payloads and back
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode one value from the front of `bytes`. Trailing bytes (frame
    /// padding) are ignored.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// `ValueCodec` backed by bincode
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl ValueCodec for BincodeCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        check_nesting(bytes, MAX_NESTING)?;
        Ok(bincode::deserialize(bytes)?)
    }
}

// bincode variant tags of `Value`, in declaration order
const TAG_NIL: u32 = 0;
const TAG_BOOL: u32 = 1;
const TAG_UINT: u32 = 2;
const TAG_STRING: u32 = 3;
const TAG_BYTES: u32 = 4;
const TAG_ARRAY: u32 = 5;

/// Walk a bincode-encoded `Value` without recursing and reject it if its
/// arrays nest deeper than `max_depth`
///
/// Decoding (and dropping) a `Value` recurses once per level, so this runs
/// before bincode sees the bytes. Only the first value is walked; trailing
/// frame padding is ignored.
fn check_nesting(bytes: &[u8], max_depth: usize) -> Result<()> {
    let mut reader = TagReader { bytes, pos: 0 };
    // Items still to read at each open level; the root is one item
    let mut remaining: Vec<u64> = vec![1];

    while let Some(top) = remaining.last_mut() {
        if *top == 0 {
            remaining.pop();
            continue;
        }
        *top -= 1;

        match reader.u32()? {
            TAG_NIL => {}
            TAG_BOOL => reader.skip(1)?,
            TAG_UINT => reader.skip(8)?,
            TAG_STRING | TAG_BYTES => {
                let len = reader.u64()?;
                reader.skip(len)?;
            }
            TAG_ARRAY => {
                let len = reader.u64()?;
                remaining.push(len);
                if remaining.len() - 1 > max_depth {
                    return Err(KvError::Protocol(format!(
                        "value nested deeper than {} arrays",
                        max_depth
                    )));
                }
            }
            tag => {
                return Err(KvError::Protocol(format!("invalid value tag {}", tag)));
            }
        }
    }
    Ok(())
}

struct TagReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl TagReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let raw = self
            .bytes
            .get(self.pos..end)
            .and_then(|b| <[u8; N]>::try_from(b).ok())
            .ok_or_else(truncated)?;
        self.pos = end;
        Ok(raw)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        let left = (self.bytes.len() - self.pos) as u64;
        if len > left {
            return Err(truncated());
        }
        self.pos += len as usize;
        Ok(())
    }
}

fn truncated() -> KvError {
    KvError::Protocol("truncated value".to_string())
}
