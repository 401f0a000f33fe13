//! JSON-RPC request bindings

use crate::{error::RpcError, hex};
use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version marker, always `"2.0"`
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "2.0")]
    V2,
}

/// Id of a JSON-RPC call
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum Id {
    String(String),
    Number(i64),
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => s.fmt(f),
            Id::Number(n) => n.fmt(f),
            Id::Null => f.write_str("null"),
        }
    }
}

/// Parameters of a JSON-RPC call
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// no parameters provided
    None,
    /// list of parameters
    Array(Vec<Value>),
    /// map of parameters
    Object(serde_json::Map<String, Value>),
}

impl Default for RequestParams {
    fn default() -> Self {
        RequestParams::None
    }
}

impl From<RequestParams> for Value {
    fn from(params: RequestParams) -> Self {
        match params {
            RequestParams::None => Value::Null,
            RequestParams::Array(arr) => arr.into(),
            RequestParams::Object(obj) => obj.into(),
        }
    }
}

/// A single JSON-RPC method call
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcMethodCall {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(default)]
    pub params: RequestParams,
    pub id: Id,
}

// === impl RpcMethodCall ===

impl RpcMethodCall {
    /// Creates a new call with positional params
    pub fn new(id: Id, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { jsonrpc: Version::V2, method: method.into(), params: RequestParams::Array(params), id }
    }

    pub fn id(&self) -> Id {
        self.id.clone()
    }

    /// Returns the positional param at `index`, if any
    pub fn param(&self, index: usize) -> Option<&Value> {
        match &self.params {
            RequestParams::Array(params) => params.get(index),
            _ => None,
        }
    }

    /// Returns the positional param at `index` as a string
    pub fn param_str(&self, index: usize) -> Result<&str, RpcError> {
        self.param(index)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params(format!("invalid rpc parameter ({index})")))
    }

    /// Returns the positional param at `index` as an unsigned 256-bit integer
    /// of expected byte-width `width`.
    ///
    /// Accepts `0x`-prefixed hex no wider than `width` bytes, or plain
    /// decimal for legacy callers.
    pub fn param_u256(&self, index: usize, width: usize) -> Result<U256, RpcError> {
        let raw = self.param_str(index)?;
        if let Some(digits) = raw.strip_prefix("0x") {
            if digits.len() > width * 2 {
                return Err(RpcError::invalid_params(format!(
                    "rpc parameter ({index}) wider than {width} bytes"
                )));
            }
        }
        hex::parse_quantity(raw)
            .map_err(|err| RpcError::invalid_params(format!("rpc parameter ({index}): {err}")))
    }

    /// Replaces the positional param at `index` in place
    pub fn replace_param(&mut self, index: usize, value: impl Into<Value>) -> Result<(), RpcError> {
        match &mut self.params {
            RequestParams::Array(params) if index < params.len() => {
                params[index] = value.into();
                Ok(())
            }
            _ => Err(RpcError::invalid_params(format!("rpc parameter ({index}) out of range"))),
        }
    }
}

/// A JSON-RPC notification (a call without an id)
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcNotification {
    pub jsonrpc: Option<Version>,
    pub method: String,
    #[serde(default)]
    pub params: RequestParams,
}

/// Representation of a single incoming JSON-RPC call
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum RpcCall {
    MethodCall(RpcMethodCall),
    Notification(RpcNotification),
    Invalid {
        #[serde(default = "null_id")]
        id: Id,
    },
}

fn null_id() -> Id {
    Id::Null
}

/// An incoming JSON-RPC request, either one call or a batch of calls
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum Request {
    Single(RpcCall),
    Batch(Vec<RpcCall>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_method_call() {
        let call: RpcCall = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":73,"method":"eth_getWork","params":[]}"#,
        )
        .unwrap();
        match call {
            RpcCall::MethodCall(call) => {
                assert_eq!(call.method, "eth_getWork");
                assert_eq!(call.id, Id::Number(73));
            }
            other => panic!("expected method call, got {other:?}"),
        }
    }

    #[test]
    fn typed_param_accessors() {
        let call = RpcMethodCall::new(
            Id::Number(1),
            "eth_submitWork",
            vec![json!("0x0000000000000001"), json!("0xff"), json!("1000000")],
        );
        assert_eq!(call.param_u256(0, 8).unwrap(), U256::from(1u64));
        assert_eq!(call.param_u256(1, 32).unwrap(), U256::from(255u64));
        // decimal fallback
        assert_eq!(call.param_u256(2, 32).unwrap(), U256::from(1_000_000u64));
        assert!(call.param_str(3).is_err());
        // too wide for the declared width
        assert!(call.param_u256(1, 0).is_err());
    }

    #[test]
    fn replaces_param_in_place() {
        let mut call =
            RpcMethodCall::new(Id::Number(1), "eth_submitHashrate", vec![json!("0x1"), json!("0x2")]);
        call.replace_param(0, json!("0x500000")).unwrap();
        assert_eq!(call.param_str(0).unwrap(), "0x500000");
        assert!(call.replace_param(2, json!("0x0")).is_err());
    }
}
