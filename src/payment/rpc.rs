//! RPC surface of the payment engine

use crate::{
    eth::types::address_from_u256,
    payment::PaymentEngine,
    shutdown::ShutdownFlag,
};
use ethereum_types::Address;
use ethpool_rpc::{
    error::RpcError,
    request::RpcMethodCall,
    response::{ResponseResult, RpcResponse},
};
use ethpool_server::{RequestMeta, RpcHandler};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Handles `echo_addPayment` requests from the backend
#[derive(Clone)]
pub struct PaymentRpc {
    engine: Arc<PaymentEngine>,
    shutdown: ShutdownFlag,
}

// === impl PaymentRpc ===

impl PaymentRpc {
    pub fn new(engine: Arc<PaymentEngine>, shutdown: ShutdownFlag) -> Self {
        Self { engine, shutdown }
    }

    async fn add_payment(&self, call: &RpcMethodCall) -> Result<(), RpcError> {
        let id = call
            .param_str(0)
            .map_err(|_| RpcError::server_error(-1, "invalid rpc parameter (0)"))?;
        let from: Address = address_from_u256(
            call.param_u256(1, 20)
                .map_err(|_| RpcError::server_error(-1, "invalid rpc parameter (1)"))?,
        );
        let to: Address = address_from_u256(
            call.param_u256(2, 20)
                .map_err(|_| RpcError::server_error(-1, "invalid rpc parameter (2)"))?,
        );
        let value = call
            .param_u256(3, 32)
            .map_err(|_| RpcError::server_error(-1, "invalid rpc parameter (3)"))?;

        self.engine.add_payment(id, from, to, value).await.map_err(|err| {
            warn!(target: "pay", "could not queue payment: {err}");
            RpcError::server_error(-1, "could not persist payment")
        })
    }
}

#[async_trait::async_trait]
impl RpcHandler for PaymentRpc {
    async fn on_call(&self, call: RpcMethodCall, _meta: RequestMeta) -> RpcResponse {
        if self.shutdown.is_set() {
            return RpcResponse::new(call.id(), ResponseResult::success(Value::Null));
        }
        let id = call.id();
        if call.method != "echo_addPayment" {
            return RpcResponse::new(
                id,
                RpcError::server_error(-1, format!("unsupported rpc request: {}", call.method)),
            );
        }
        match self.add_payment(&call).await {
            Ok(()) => RpcResponse::new(id, ResponseResult::success(true)),
            Err(err) => RpcResponse::new(id, err),
        }
    }
}
