//! JSON-RPC response bindings

use crate::{
    error::RpcError,
    hex,
    request::{Id, Version},
};
use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response of a _single_ rpc call
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcResponse {
    // JSON RPC version
    jsonrpc: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Id>,
    #[serde(flatten)]
    result: ResponseResult,
}

impl From<RpcError> for RpcResponse {
    fn from(e: RpcError) -> Self {
        Self { jsonrpc: Version::V2, id: None, result: ResponseResult::Error(e) }
    }
}

// === impl RpcResponse ===

impl RpcResponse {
    pub fn new(id: Id, content: impl Into<ResponseResult>) -> Self {
        RpcResponse { jsonrpc: Version::V2, id: Some(id), result: content.into() }
    }

    pub fn invalid_request(id: Id) -> Self {
        Self::new(id, RpcError::invalid_request())
    }

    /// Returns the successful result value, if any
    pub fn result(&self) -> Option<&Value> {
        match &self.result {
            ResponseResult::Success(value) => Some(value),
            ResponseResult::Error(_) => None,
        }
    }

    /// Returns the error of a failed call, if any
    pub fn error(&self) -> Option<&RpcError> {
        match &self.result {
            ResponseResult::Success(_) => None,
            ResponseResult::Error(err) => Some(err),
        }
    }

    /// Consumes the response, returning its [ResponseResult]
    pub fn into_result(self) -> ResponseResult {
        self.result
    }

    /// Returns the result as a string
    pub fn result_str(&self) -> Result<&str, RpcError> {
        self.result()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("result is not a string"))
    }

    /// Returns the result as a bool
    pub fn result_bool(&self) -> Result<bool, RpcError> {
        self.result()
            .and_then(Value::as_bool)
            .ok_or_else(|| RpcError::invalid_params("result is not a bool"))
    }

    /// Returns the result as an unsigned 256-bit integer of expected
    /// byte-width `width`
    pub fn result_u256(&self, width: usize) -> Result<U256, RpcError> {
        parse_u256_entry(self.result_str()?, width)
    }

    /// Returns entry `index` of a list-shaped result as a string
    pub fn result_array_str(&self, index: usize) -> Result<&str, RpcError> {
        self.result()
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::invalid_params("result is not an array"))?
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params(format!("result entry ({index}) is not a string")))
    }

    /// Returns entry `index` of a list-shaped result as an unsigned 256-bit
    /// integer of expected byte-width `width`
    pub fn result_array_u256(&self, index: usize, width: usize) -> Result<U256, RpcError> {
        parse_u256_entry(self.result_array_str(index)?, width)
    }

    /// Replaces entry `index` of a list-shaped result in place
    pub fn replace_result_entry(
        &mut self,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<(), RpcError> {
        let entries = match &mut self.result {
            ResponseResult::Success(Value::Array(entries)) => entries,
            _ => return Err(RpcError::invalid_params("result is not an array")),
        };
        if index >= entries.len() {
            return Err(RpcError::invalid_params(format!("result entry ({index}) out of range")));
        }
        entries[index] = value.into();
        Ok(())
    }
}

fn parse_u256_entry(raw: &str, width: usize) -> Result<U256, RpcError> {
    if let Some(digits) = raw.strip_prefix("0x") {
        if digits.len() > width * 2 {
            return Err(RpcError::invalid_params(format!("result wider than {width} bytes")));
        }
    }
    hex::parse_quantity(raw).map_err(|err| RpcError::invalid_params(err.to_string()))
}

/// Represents the result of a call either success or error
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub enum ResponseResult {
    #[serde(rename = "result")]
    Success(Value),
    #[serde(rename = "error")]
    Error(RpcError),
}

impl ResponseResult {
    pub fn success<S>(content: S) -> Self
    where
        S: Serialize + 'static,
    {
        ResponseResult::Success(serde_json::to_value(&content).unwrap())
    }

    pub fn error(error: RpcError) -> Self {
        ResponseResult::Error(error)
    }
}

impl From<RpcError> for ResponseResult {
    fn from(err: RpcError) -> Self {
        ResponseResult::error(err)
    }
}

/// Synchronous response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(untagged)]
pub enum Response {
    /// single json rpc response
    Single(RpcResponse),
    /// batch of several responses
    Batch(Vec<RpcResponse>),
}

impl Response {
    /// Creates new [Response] with the given [RpcError]
    pub fn error(error: RpcError) -> Self {
        RpcResponse::new(Id::Null, ResponseResult::Error(error)).into()
    }
}

impl From<RpcError> for Response {
    fn from(err: RpcError) -> Self {
        Response::error(err)
    }
}

impl From<RpcResponse> for Response {
    fn from(resp: RpcResponse) -> Self {
        Response::Single(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn work_response() -> RpcResponse {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [
                "0x00000000000000000000000000000000000000000000000000000000000000aa",
                "0x00000000000000000000000000000000000000000000000000000000000000bb",
                "0x0000000000000000000000000000000000000000000000000000000000010000",
            ]
        }))
        .unwrap()
    }

    #[test]
    fn reads_array_entries() {
        let response = work_response();
        assert_eq!(response.result_array_u256(0, 32).unwrap(), U256::from(0xaau64));
        assert_eq!(response.result_array_u256(2, 32).unwrap(), U256::from(0x10000u64));
        assert!(response.result_array_str(3).is_err());
    }

    #[test]
    fn rewrites_array_entries() {
        let mut response = work_response();
        response.replace_result_entry(2, json!("0xff")).unwrap();
        assert_eq!(response.result_array_u256(2, 32).unwrap(), U256::from(255u64));
        assert!(response.replace_result_entry(3, json!("0x0")).is_err());
    }

    #[test]
    fn surfaces_upstream_errors() {
        let response: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32602, "message": "bad params" }
        }))
        .unwrap();
        assert!(response.result().is_none());
        assert_eq!(response.error().unwrap().code.code(), -32602);
    }

    #[test]
    fn scalar_results() {
        let response = RpcResponse::new(Id::Number(1), ResponseResult::success(true));
        assert!(response.result_bool().unwrap());
        let response = RpcResponse::new(Id::Number(1), ResponseResult::success("0x10"));
        assert_eq!(response.result_u256(32).unwrap(), U256::from(16u64));
    }
}
