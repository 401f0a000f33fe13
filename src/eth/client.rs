//! Typed access to the upstream chain node
//!
//! A thin wrapper over the node's JSON-RPC interface. Every call is a
//! one-shot `Connection: close` POST; the [ChainApi] trait is the seam the
//! tests mock.

use crate::eth::types::{address_hex, parse_address, Block, Transaction};
use ethereum_types::{Address, U256};
use ethpool_rpc::{
    hex,
    request::{Id, RpcMethodCall},
    response::RpcResponse,
};
use reqwest::header;
use serde_json::{json, Value};
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("chain node unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chain node returned error: {0}")]
    Upstream(String),
    #[error("malformed chain response: {0}")]
    Decode(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Typed surface of the upstream node
#[async_trait::async_trait]
pub trait ChainApi: Send + Sync {
    /// Forwards a raw method call unchanged and returns the raw response
    async fn raw_call(&self, call: RpcMethodCall) -> ChainResult<RpcResponse>;

    /// Submits a value transfer; `nonce` is omitted from the request when
    /// `None`. The upstream-issued hash is returned inside the transaction;
    /// an error response from the node is surfaced as a failure.
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        value: U256,
        nonce: Option<u64>,
    ) -> ChainResult<Transaction>;

    async fn get_block_by_number(&self, number: u64, full: bool) -> ChainResult<Option<Block>>;

    async fn get_transaction_by_hash(&self, hash: U256) -> ChainResult<Option<Transaction>>;

    async fn get_block_number(&self) -> ChainResult<u64>;

    /// Newest block old enough to be treated as final
    async fn get_last_confirmed_block_number(&self) -> ChainResult<u64> {
        let head = self.get_block_number().await?;
        Ok(head.saturating_sub(crate::config::CONFIRMATION_DEPTH))
    }

    async fn get_coinbase(&self) -> ChainResult<Address>;

    /// Balance of the coinbase account
    async fn get_balance(&self) -> ChainResult<U256> {
        let coinbase = self.get_coinbase().await?;
        self.get_balance_of(coinbase).await
    }

    async fn get_balance_of(&self, address: Address) -> ChainResult<U256>;

    /// The account's transaction count including pending transactions
    async fn get_transaction_count(&self, address: Address) -> ChainResult<u64>;
}

/// JSON-RPC HTTP client for the chain node
pub struct ChainClient {
    client: reqwest::Client,
    url: String,
}

// === impl ChainClient ===

impl ChainClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> ChainResult<RpcResponse> {
        self.raw_call(RpcMethodCall::new(Id::Number(1), method, params)).await
    }

    async fn call_checked(&self, method: &str, params: Vec<Value>) -> ChainResult<RpcResponse> {
        let response = self.call(method, params).await?;
        if let Some(err) = response.error() {
            return Err(ChainError::Upstream(err.to_string()));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ChainApi for ChainClient {
    async fn raw_call(&self, call: RpcMethodCall) -> ChainResult<RpcResponse> {
        trace!(target: "chain", method = %call.method, "sending rpc call");
        let response = self
            .client
            .post(&self.url)
            .header(header::CONNECTION, "close")
            .json(&call)
            .send()
            .await?;
        Ok(response.json().await?)
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        value: U256,
        nonce: Option<u64>,
    ) -> ChainResult<Transaction> {
        let from_str = address_hex(&from);
        let to_str = address_hex(&to);
        let value_str = value.to_string();
        let nonce_str = nonce.map(|n| hex::to_hex(U256::from(n), 16)).unwrap_or_default();

        let mut params = serde_json::Map::new();
        params.insert("from".to_string(), json!(from_str));
        params.insert("to".to_string(), json!(to_str));
        params.insert("value".to_string(), json!(value_str));
        if !nonce_str.is_empty() {
            params.insert("nonce".to_string(), json!(nonce_str));
        }

        let response =
            self.call_checked("eth_sendTransaction", vec![Value::Object(params)]).await?;
        let hash = response
            .result_str()
            .map_err(|_| ChainError::Decode("transaction hash missing".to_string()))?
            .to_string();

        Ok(Transaction {
            hash,
            from: from_str,
            to: to_str,
            value: value_str,
            nonce: nonce_str,
            block_number: String::new(),
            timestamp: String::new(),
        })
    }

    async fn get_block_by_number(&self, number: u64, full: bool) -> ChainResult<Option<Block>> {
        let response = self
            .call_checked(
                "eth_getBlockByNumber",
                vec![json!(hex::to_hex(U256::from(number), 0)), json!(full)],
            )
            .await?;
        let result = match response.result() {
            Some(Value::Null) | None => return Ok(None),
            Some(result) => result.clone(),
        };
        let mut block: Block = serde_json::from_value(result)
            .map_err(|err| ChainError::Decode(err.to_string()))?;
        if full {
            let timestamp = block.timestamp.clone();
            for txn in &mut block.transactions {
                txn.timestamp = timestamp.clone();
            }
        }
        Ok(Some(block))
    }

    async fn get_transaction_by_hash(&self, hash: U256) -> ChainResult<Option<Transaction>> {
        let response = self
            .call_checked("eth_getTransactionByHash", vec![json!(hex::to_hex(hash, 64))])
            .await?;
        let result = match response.result() {
            Some(Value::Null) | None => return Ok(None),
            Some(result) => result.clone(),
        };
        let mut txn: Transaction = serde_json::from_value(result)
            .map_err(|err| ChainError::Decode(err.to_string()))?;
        if !txn.is_pending() {
            // stamp the transaction with its block's timestamp
            let number = hex::parse_hex(&txn.block_number)
                .map_err(|err| ChainError::Decode(err.to_string()))?
                .low_u64();
            if let Some(block) = self.get_block_by_number(number, false).await? {
                txn.timestamp = block.timestamp;
            }
        }
        Ok(Some(txn))
    }

    async fn get_block_number(&self) -> ChainResult<u64> {
        let response = self.call_checked("eth_blockNumber", vec![]).await?;
        Ok(response
            .result_u256(32)
            .map_err(|err| ChainError::Decode(err.to_string()))?
            .low_u64())
    }

    async fn get_coinbase(&self) -> ChainResult<Address> {
        let response = self.call_checked("eth_coinbase", vec![]).await?;
        let raw = response
            .result_str()
            .map_err(|err| ChainError::Decode(err.to_string()))?;
        parse_address(raw)
            .ok_or_else(|| ChainError::Decode(format!("invalid coinbase address: {raw:?}")))
    }

    async fn get_balance_of(&self, address: Address) -> ChainResult<U256> {
        let response = self
            .call_checked("eth_getBalance", vec![json!(address_hex(&address)), json!("latest")])
            .await?;
        response.result_u256(32).map_err(|err| ChainError::Decode(err.to_string()))
    }

    async fn get_transaction_count(&self, address: Address) -> ChainResult<u64> {
        let response = self
            .call_checked(
                "eth_getTransactionCount",
                vec![json!(address_hex(&address)), json!("pending")],
            )
            .await?;
        Ok(response
            .result_u256(32)
            .map_err(|err| ChainError::Decode(err.to_string()))?
            .low_u64())
    }
}
