//! PoW verification via the external verifier service

use ethereum_types::U256;
use ethpool_rpc::{
    hex,
    request::{Id, RpcMethodCall},
    response::RpcResponse,
};
use reqwest::header;
use serde_json::json;
use tracing::warn;

/// Checks whether a submitted solution meets a difficulty target.
///
/// Verification is delegated to a separate service; an unreachable verifier
/// reads as "not valid", which fails the submit gracefully.
#[async_trait::async_trait]
pub trait WorkVerifier: Send + Sync {
    async fn verify(
        &self,
        block_number: u64,
        header_hash: U256,
        mix_hash: U256,
        nonce: U256,
        difficulty: U256,
    ) -> bool;
}

/// HTTP client for the verifier service
pub struct VerifierClient {
    client: reqwest::Client,
    url: String,
}

// === impl VerifierClient ===

impl VerifierClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait::async_trait]
impl WorkVerifier for VerifierClient {
    async fn verify(
        &self,
        block_number: u64,
        header_hash: U256,
        mix_hash: U256,
        nonce: U256,
        difficulty: U256,
    ) -> bool {
        let call = RpcMethodCall::new(
            Id::Number(1),
            "verify",
            vec![
                json!(block_number.to_string()),
                json!(hex::to_hex(header_hash, 64)),
                json!(hex::to_hex(mix_hash, 64)),
                json!(hex::to_hex(nonce, 16)),
                json!(difficulty.to_string()),
            ],
        );

        let response = match self
            .client
            .post(&self.url)
            .header(header::CONNECTION, "close")
            .json(&call)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(target: "pool", "error while running verify: {err}");
                return false;
            }
        };

        match response.json::<RpcResponse>().await {
            Ok(response) => response.result_bool().unwrap_or(false),
            Err(err) => {
                warn!(target: "pool", "invalid verify response: {err}");
                false
            }
        }
    }
}
