//! Response definitions
//!
//! A response echoes the request id and carries either an error message or
//! a result: `[requestId, error-or-nil, result-or-nil]`.

use crate::error::{KvError, Result};

use super::value::Value;

/// Placeholder returned by `G` for keys that do not exist
///
/// Same text as `KvError::KeyNotFound`.
pub const NOT_FOUND: &str = "<App_Entity_Not_Found>";

/// A response to send to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Request id, echoed back unchanged
    pub id: Value,

    /// In-band error message
    pub error: Option<String>,

    /// Operation result (absent on error)
    pub result: Option<Value>,
}

impl Response {
    /// Create a successful response
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            error: None,
            result: Some(result),
        }
    }

    /// Create an error response
    pub fn error(id: Value, error: &KvError) -> Self {
        Self {
            id,
            error: Some(error.to_string()),
            result: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Envelope value for the wire
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            self.id.clone(),
            self.error.clone().map(Value::String).unwrap_or(Value::Nil),
            self.result.clone().unwrap_or(Value::Nil),
        ])
    }

    /// Parse a response envelope (client side)
    pub fn from_value(value: Value) -> Result<Self> {
        let items: [Value; 3] = value
            .into_array()
            .and_then(|items| items.try_into().ok())
            .ok_or_else(|| KvError::Protocol("response must be a 3-element array".to_string()))?;
        let [id, error, result] = items;

        let error = match error {
            Value::Nil => None,
            Value::String(message) => Some(message),
            other => {
                return Err(KvError::Protocol(format!(
                    "response error slot must be a string, got {:?}",
                    other
                )))
            }
        };
        let result = (!result.is_nil()).then_some(result);

        Ok(Self { id, error, result })
    }
}
