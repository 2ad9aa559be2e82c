//! The fixed JSON-RPC 2.0 error taxonomy (C1) and the internal error types
//! built on top of it.

use serde_json::Value;

/// A closed enumeration over the JSON-RPC 2.0 error codes this engine ever
/// puts on the wire. Never interpolated — code and message both come from
/// the table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl RpcError {
    /// The numeric code this variant serializes as.
    pub const fn code(self) -> i32 {
        match self {
            RpcError::ParseError => -32700,
            RpcError::InvalidRequest => -32600,
            RpcError::MethodNotFound => -32601,
            RpcError::InvalidParams => -32602,
            RpcError::InternalError => -32603,
        }
    }

    /// The fixed human-readable string for this variant.
    pub const fn message(self) -> &'static str {
        match self {
            RpcError::ParseError => "Parse error",
            RpcError::InvalidRequest => "Invalid request",
            RpcError::MethodNotFound => "Method not found",
            RpcError::InvalidParams => "Invalid params",
            RpcError::InternalError => "Internal error",
        }
    }

    /// Reconstructs a variant from a wire error code, for clients that want
    /// to classify a peer's error without depending on its message text.
    pub const fn from_code(code: i32) -> Option<RpcError> {
        match code {
            -32700 => Some(RpcError::ParseError),
            -32600 => Some(RpcError::InvalidRequest),
            -32601 => Some(RpcError::MethodNotFound),
            -32602 => Some(RpcError::InvalidParams),
            -32603 => Some(RpcError::InternalError),
            _ => None,
        }
    }
}

/// A validation/dispatch failure tied to a request that carries an `id`
/// (possibly `null`). Mirrors `RequestException` in the original source.
#[derive(Debug, Clone)]
pub struct RequestError {
    pub err: RpcError,
    pub id: Value,
    pub detail: String,
}

impl RequestError {
    pub fn new(err: RpcError, id: Value, detail: impl Into<String>) -> Self {
        Self {
            err,
            id,
            detail: detail.into(),
        }
    }

    pub fn no_id(err: RpcError, detail: impl Into<String>) -> Self {
        Self::new(err, Value::Null, detail)
    }

    /// Renders the JSON-RPC error envelope for this failure.
    pub fn to_response(&self) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "error": {
                "code": self.err.code(),
                "message": self.err.message(),
                "data": self.detail,
            },
            "id": self.id,
        })
    }
}

/// A validation failure for a notification. Notifications never produce a
/// response, so this carries no `id` — only enough to log at `WARN`.
#[derive(Debug, Clone)]
pub struct NotifyError {
    pub err: RpcError,
    pub detail: String,
}

impl NotifyError {
    pub fn new(err: RpcError, detail: impl Into<String>) -> Self {
        Self {
            err,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.err.message(), self.detail)
    }
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.err.message(), self.detail)
    }
}

impl std::error::Error for RequestError {}
impl std::error::Error for NotifyError {}
