//! Message definitions
//!
//! Requests from clients and the responses sent back to them.

use serde::{Deserialize, Serialize};

/// Correlation id pairing a request with its response
pub type CorrelationId = u64;

/// Operation implied by a request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
}

/// A request sent by a client
///
/// There is no explicit operation field: an absent or empty `value` means
/// Get, anything else means Set. A Set to the empty string therefore cannot
/// be expressed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Echoed back in the matching response
    pub id: CorrelationId,

    /// Key to read or write
    pub key: String,

    /// Value to write (None for a read)
    pub value: Option<String>,
}

impl Request {
    /// Build a Get request
    pub fn get(id: CorrelationId, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            value: None,
        }
    }

    /// Build a Set request
    pub fn set(id: CorrelationId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Operation selected by value presence
    pub fn operation(&self) -> Operation {
        match self.value.as_deref() {
            None | Some("") => Operation::Get,
            Some(_) => Operation::Set,
        }
    }
}

/// Result codes carried in every response
///
/// `Ok` means Get found the key, or Set overwrote an existing key (value is
/// the prior value). `NotFound` means Get missed, or Set created a new key
/// (value is empty). `Error` is an internal failure with an empty value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    NotFound = 1,
    Error = -1,
}

impl From<ResultCode> for i32 {
    fn from(code: ResultCode) -> Self {
        code as i32
    }
}

impl TryFrom<i32> for ResultCode {
    type Error = String;

    fn try_from(raw: i32) -> std::result::Result<Self, String> {
        match raw {
            0 => Ok(ResultCode::Ok),
            1 => Ok(ResultCode::NotFound),
            -1 => Ok(ResultCode::Error),
            other => Err(format!("unknown result code {}", other)),
        }
    }
}

/// A response to send to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers
    pub id: CorrelationId,

    /// Outcome of the operation
    pub result: ResultCode,

    /// Current value for Get, prior value for Set
    pub value: String,
}

impl Response {
    /// Create a response from a store outcome
    pub fn new(id: CorrelationId, result: ResultCode, value: String) -> Self {
        Self { id, result, value }
    }

    /// Create an internal-error response (empty value)
    pub fn error(id: CorrelationId) -> Self {
        Self {
            id,
            result: ResultCode::Error,
            value: String::new(),
        }
    }
}
