//! JSON-RPC error bindings
//!
//! Everything the proxy reports back to a miner or to the payment backend
//! travels as one of these error objects. The standard JSON-RPC codes are
//! covered, plus the implementation-defined range the payment RPC answers
//! with; the constructors below carry the canned messages the pool uses
//! when it classifies a request.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Cow, fmt};

/// A JSON-RPC error object
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// === impl RpcError ===

impl RpcError {
    /// An error carrying the code's canonical message
    pub const fn new(code: ErrorCode) -> Self {
        RpcError { message: Cow::Borrowed(code.message()), code, data: None }
    }

    /// The request body was not a valid JSON-RPC request object
    pub const fn invalid_request() -> Self {
        Self::new(ErrorCode::InvalidRequest)
    }

    /// Call parameters missing, malformed or out of range
    pub fn invalid_params<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        RpcError { code: ErrorCode::InvalidParams, message: message.into().into(), data: None }
    }

    /// A method the proxy has never heard of
    pub fn unknown_method(method: &str) -> Self {
        Self::invalid_params(format!("invalid RPC method: {method}"))
    }

    /// A known method miners are not allowed to reach through the proxy
    pub fn restricted_method(method: &str) -> Self {
        Self::invalid_params(format!("restricted request method: {method}"))
    }

    /// The `miner` query parameter was missing or not a 20-byte address
    pub fn invalid_miner() -> Self {
        Self::invalid_params("invalid or missing miner id")
    }

    /// Catch-all reported to a miner when proxying failed on this side,
    /// e.g. the chain node or verifier did not answer
    pub fn proxy_failure() -> Self {
        Self::invalid_params("could not process request - server side error")
    }

    /// An error in the implementation-defined code range
    pub fn server_error<M>(code: i64, message: M) -> Self
    where
        M: Into<String>,
    {
        RpcError { code: ErrorCode::ServerError(code), message: message.into().into(), data: None }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.message(), self.message)
    }
}

/// JSON-RPC error codes the pool emits or decodes from upstream answers
#[derive(Debug, Copy, PartialEq, Eq, Clone)]
pub enum ErrorCode {
    /// the request body was not parseable JSON
    ParseError,
    /// the request was not a valid request object
    InvalidRequest,
    /// no such method
    MethodNotFound,
    /// bad call parameters; also what every misrouted miner request maps to
    InvalidParams,
    /// the answering side failed internally
    InternalError,
    /// implementation-defined errors, e.g. the payment RPC's `-1`
    ServerError(i64),
}

// === impl ErrorCode ===

impl ErrorCode {
    /// The numeric code on the wire
    pub const fn code(&self) -> i64 {
        match *self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError(code) => code,
        }
    }

    /// The canonical message for the code
    pub const fn message(&self) -> &'static str {
        match *self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerError(_) => "Server error",
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            other => ErrorCode::ServerError(other),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<ErrorCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(ErrorCode::from(i64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_errors_use_the_invalid_params_code() {
        for err in [
            RpcError::unknown_method("eth_mine"),
            RpcError::restricted_method("eth_sendTransaction"),
            RpcError::invalid_miner(),
            RpcError::proxy_failure(),
        ] {
            assert_eq!(err.code.code(), -32602);
        }
        assert!(RpcError::restricted_method("eth_sendTransaction")
            .message
            .contains("eth_sendTransaction"));
    }

    #[test]
    fn codes_round_trip_through_the_wire_form() {
        for code in [-32700i64, -32600, -32601, -32602, -32603, -1, 7] {
            assert_eq!(ErrorCode::from(code).code(), code);
        }
        assert_eq!(ErrorCode::from(-1), ErrorCode::ServerError(-1));
    }

    #[test]
    fn serializes_as_a_bare_error_object() {
        let err = RpcError::server_error(-1, "unsupported rpc request: echo_withdraw");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "code": -1,
                "message": "unsupported rpc request: echo_withdraw",
            })
        );
        let back: RpcError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }
}
