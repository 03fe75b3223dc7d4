use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The error code reported when the requested interface or operation is not
/// bound.
pub const CODE_NOT_FOUND: &str = "NotFound";

/// The error code reported when the request is structurally valid but cannot
/// be satisfied (bad format, missing required argument).
pub const CODE_BAD_REQUEST: &str = "BadRequest";

/// The error code reported when a handler fails with anything other than an
/// [`RpcError`].
pub const CODE_EXCEPTION: &str = "Exception";

/// The error code reported for requests that target functionality this
/// runtime deliberately does not provide (property writes).
pub const CODE_NOT_IMPLEMENTED: &str = "NotImplemented";

/// The outcome of a single RPC call as it travels back to the caller: either
/// a produced value or a coded error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireResponse", into = "WireResponse")]
pub enum RpcResponse {
    /// The call succeeded and produced this value (possibly [`Value::Null`]
    /// for operations that return no value).
    Ok(Value),
    /// The call failed with a coded, human-readable error.
    Error(RpcError),
}

/// A structured RPC error: a short machine-readable code and a human-readable
/// message.
///
/// Handlers may fail with an `RpcError` to send a structured error response
/// with a domain-specific code; any other handler failure is reported to the
/// caller under [`CODE_EXCEPTION`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    code: String,
    message: String,
}

impl RpcResponse {
    /// Creates a successful response carrying the given value.
    pub fn ok(value: Value) -> Self {
        Self::Ok(value)
    }

    /// Creates an error response with the given code and message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(RpcError::new(code, message))
    }

    /// Reports whether this response carries a value.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

impl RpcError {
    /// Creates a new error with the given code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The canonical error for an unbound interface or operation.
    pub fn not_found() -> Self {
        Self::new(
            CODE_NOT_FOUND,
            "The interface or operation could not be found",
        )
    }

    /// The canonical error for a structurally invalid request body.
    pub fn bad_request(detail: impl AsRef<str>) -> Self {
        Self::new(
            CODE_BAD_REQUEST,
            format!("The request format is invalid: {}", detail.as_ref()),
        )
    }

    /// The canonical error for a required argument that the request omits.
    pub fn missing_argument(name: impl AsRef<str>) -> Self {
        Self::new(
            CODE_BAD_REQUEST,
            format!("The argument {} is not optional", name.as_ref()),
        )
    }

    /// Reports the machine-readable code of this error.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Reports the human-readable message of this error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The wire shape of a response: `{"ok": <value>}` or
/// `{"error": {"code": .., "message": ..}}`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Ok { ok: Value },
    Error { error: RpcError },
}

impl From<WireResponse> for RpcResponse {
    fn from(wire: WireResponse) -> Self {
        match wire {
            WireResponse::Ok { ok } => Self::Ok(ok),
            WireResponse::Error { error } => Self::Error(error),
        }
    }
}

impl From<RpcResponse> for WireResponse {
    fn from(response: RpcResponse) -> Self {
        match response {
            RpcResponse::Ok(ok) => Self::Ok { ok },
            RpcResponse::Error(error) => Self::Error { error },
        }
    }
}
