//! Request definitions
//!
//! ## Envelope
//! ```text
//! [requestId, opcode, params]
//!  any        1-char  array
//! ```
//!
//! ## Operations
//! - `N`: `[key, incr, delta, initVal]`            counter incr/decr
//! - `G`: `[[key, ...]]`                            multi-get
//! - `Q`: `[seekLow, seekHigh, kindId, shapeId,
//!         ancestorOnly, withCursor, filterOp,
//!         offset, limit]`                          range query
//! - `U`: `[[k, v, k, v, ...], [delKey, ...]]`      batched update

use crate::error::{KvError, Result};
use crate::query::Query;

use super::value::{Value, ValueCodec};

pub const OP_INCR_DECR: u8 = b'N';
pub const OP_GET: u8 = b'G';
pub const OP_QUERY: u8 = b'Q';
pub const OP_UPDATE: u8 = b'U';

/// A decoded request envelope, before its parameters are checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: Value,
    pub opcode: u8,
    pub params: Vec<Value>,
}

impl Envelope {
    /// Decode a frame payload into an envelope
    ///
    /// Any failure here is a `Protocol` error: the stream cannot be trusted
    /// and the connection is dropped.
    pub fn decode(codec: &dyn ValueCodec, payload: &[u8]) -> Result<Self> {
        let value = codec
            .decode(payload)
            .map_err(|e| KvError::Protocol(format!("undecodable request: {}", e)))?;

        let Value::Array(items) = value else {
            return Err(KvError::Protocol("request is not an array".to_string()));
        };
        let items: [Value; 3] = items
            .try_into()
            .map_err(|_| KvError::Protocol("request array must have 3 elements".to_string()))?;
        let [id, opcode, params] = items;

        let opcode = match opcode.as_str().map(str::as_bytes) {
            Some(&[op]) => op,
            _ => {
                return Err(KvError::Protocol(
                    "opcode must be a 1-character string".to_string(),
                ))
            }
        };

        let Value::Array(params) = params else {
            return Err(KvError::Protocol("params must be an array".to_string()));
        };

        Ok(Self { id, opcode, params })
    }

    /// Build the envelope value for a request (client side)
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            self.id.clone(),
            Value::String((self.opcode as char).to_string()),
            Value::Array(self.params.clone()),
        ])
    }
}

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Add or subtract `delta` on an 8-byte counter, starting at `init`
    IncrDecr {
        key: Vec<u8>,
        incr: bool,
        delta: u64,
        init: u64,
    },

    /// Fetch several keys
    Get { keys: Vec<Vec<u8>> },

    /// Range scan
    Query(Query),

    /// Puts and deletes, atomic per storage instance
    Update {
        puts: Vec<(Vec<u8>, Vec<u8>)>,
        deletes: Vec<Vec<u8>>,
    },
}

impl Request {
    /// Check and convert an envelope's parameters
    ///
    /// Errors are reported in band (`InvalidParams`, `UnknownOpcode`).
    pub fn parse(opcode: u8, params: &[Value]) -> Result<Self> {
        match opcode {
            OP_INCR_DECR => {
                let [key, incr, delta, init] = fixed::<4>("N", params)?;
                Ok(Request::IncrDecr {
                    key: bytes_param("N key", key)?,
                    incr: bool_param("N incr", incr)?,
                    delta: uint_param("N delta", delta)?,
                    init: uint_param("N initVal", init)?,
                })
            }
            OP_GET => {
                let [keys] = fixed::<1>("G", params)?;
                let keys = array_param("G keys", keys)?
                    .iter()
                    .map(|k| bytes_param("G key", k))
                    .collect::<Result<_>>()?;
                Ok(Request::Get { keys })
            }
            OP_QUERY => {
                let [low, high, kind, shape, ancestor, cursor, op, offset, limit] =
                    fixed::<9>("Q", params)?;
                Ok(Request::Query(Query {
                    seek_low: bytes_param("Q seekLow", low)?,
                    seek_high: bytes_param("Q seekHigh", high)?,
                    kind: u8_param("Q kindId", kind)?,
                    shape: u8_param("Q shapeId", shape)?,
                    ancestor_only: bool_param("Q ancestorOnly", ancestor)?,
                    with_cursor: bool_param("Q withCursor", cursor)?,
                    filter_op: u8_param("Q filterOp", op)?,
                    offset: usize_param("Q offset", offset)?,
                    limit: usize_param("Q limit", limit)?,
                }))
            }
            OP_UPDATE => {
                let [puts, deletes] = fixed::<2>("U", params)?;
                let puts = array_param("U puts", puts)?;
                if puts.len() % 2 != 0 {
                    return Err(KvError::InvalidParams(format!(
                        "U puts: odd number of elements ({})",
                        puts.len()
                    )));
                }
                let puts = puts
                    .chunks_exact(2)
                    .map(|kv| Ok((bytes_param("U put key", &kv[0])?, bytes_param("U put value", &kv[1])?)))
                    .collect::<Result<_>>()?;
                let deletes = array_param("U deletes", deletes)?
                    .iter()
                    .map(|k| bytes_param("U delete key", k))
                    .collect::<Result<_>>()?;
                Ok(Request::Update { puts, deletes })
            }
            other => Err(KvError::UnknownOpcode(other)),
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Request::IncrDecr { .. } => OP_INCR_DECR,
            Request::Get { .. } => OP_GET,
            Request::Query(_) => OP_QUERY,
            Request::Update { .. } => OP_UPDATE,
        }
    }

    /// Parameter array for this request (client side)
    pub fn to_params(&self) -> Vec<Value> {
        match self {
            Request::IncrDecr {
                key,
                incr,
                delta,
                init,
            } => vec![
                Value::from(key.as_slice()),
                Value::Bool(*incr),
                Value::Uint(*delta),
                Value::Uint(*init),
            ],
            Request::Get { keys } => vec![bytes_array(keys)],
            Request::Query(q) => vec![
                Value::from(q.seek_low.as_slice()),
                Value::from(q.seek_high.as_slice()),
                Value::Uint(q.kind as u64),
                Value::Uint(q.shape as u64),
                Value::Bool(q.ancestor_only),
                Value::Bool(q.with_cursor),
                Value::Uint(q.filter_op as u64),
                Value::Uint(q.offset as u64),
                Value::Uint(q.limit as u64),
            ],
            Request::Update { puts, deletes } => vec![
                Value::Array(
                    puts.iter()
                        .flat_map(|(k, v)| [Value::from(k.as_slice()), Value::from(v.as_slice())])
                        .collect(),
                ),
                bytes_array(deletes),
            ],
        }
    }
}

// =============================================================================
// Parameter Helpers
// =============================================================================

fn fixed<'a, const N: usize>(op: &str, params: &'a [Value]) -> Result<&'a [Value; N]> {
    params.try_into().map_err(|_| {
        KvError::InvalidParams(format!(
            "{}: expected {} params, got {}",
            op,
            N,
            params.len()
        ))
    })
}

fn bytes_array(items: &[Vec<u8>]) -> Value {
    Value::Array(items.iter().map(|b| Value::from(b.as_slice())).collect())
}

fn bytes_param(name: &str, value: &Value) -> Result<Vec<u8>> {
    value
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| type_error(name, "bytes"))
}

fn bool_param(name: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| type_error(name, "bool"))
}

fn uint_param(name: &str, value: &Value) -> Result<u64> {
    value.as_uint().ok_or_else(|| type_error(name, "uint"))
}

fn u8_param(name: &str, value: &Value) -> Result<u8> {
    let n = uint_param(name, value)?;
    u8::try_from(n).map_err(|_| KvError::InvalidParams(format!("{}: {} does not fit a byte", name, n)))
}

fn usize_param(name: &str, value: &Value) -> Result<usize> {
    Ok(usize::try_from(uint_param(name, value)?).unwrap_or(usize::MAX))
}

fn array_param<'a>(name: &str, value: &'a Value) -> Result<&'a [Value]> {
    value.as_array().ok_or_else(|| type_error(name, "array"))
}

fn type_error(name: &str, expected: &str) -> KvError {
    KvError::InvalidParams(format!("{}: expected {}", name, expected))
}
