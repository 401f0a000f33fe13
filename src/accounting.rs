//! Fire-and-forget callbacks to the accounting backend
//!
//! The backend web server keeps the operator-facing books; nothing here is
//! load bearing for the pool itself, so every request is best effort and
//! failures are logged and discarded.

use ethereum_types::{Address, U256};
use reqwest::header;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::eth::types::address_hex;

const SHARE_PASSWORD: &str = "super_secret_password";

/// One entry of an `/addEther` balance-distribution update
#[derive(Clone, Debug, Serialize)]
pub struct BalanceUpdate {
    pub address: String,
    pub balance: String,
}

#[derive(Clone)]
pub struct AccountingClient {
    client: reqwest::Client,
    base: String,
}

// === impl AccountingClient ===

impl AccountingClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base: base.into() }
    }

    async fn post(&self, target: &str, payload: serde_json::Value) {
        let url = format!("{}/{}", self.base, target);
        debug!(target: "acct", %url, "sending message");
        let sent = self
            .client
            .post(&url)
            .header(header::CONNECTION, "close")
            .json(&payload)
            .send()
            .await;
        if let Err(err) = sent {
            warn!(target: "acct", %url, "could not send message: {err}");
        }
    }

    /// Reports one accepted share and its payout value in wei
    pub async fn add_shares(&self, address: Address, difficulty: U256, value: U256) {
        self.post(
            "addShares",
            json!({
                "address": address_hex(&address),
                "difficulty": difficulty.to_string(),
                "value": value.to_string(),
                "pw": SHARE_PASSWORD,
            }),
        )
        .await
    }

    /// Reports a miner's current hashrate, already sanitized by the pool
    pub async fn add_hashes(&self, address: Address, hashrate: u64) {
        self.post(
            "addHashes",
            json!({
                "address": address_hex(&address),
                "hashrate": hashrate.to_string(),
            }),
        )
        .await
    }

    /// Reports a payment that went out on-chain
    pub async fn payment_sent(&self, incoming_txid: &str, outgoing_txid: &str) {
        self.post(
            "successfullySent",
            json!({ "incoming_txid": incoming_txid, "outgoing_txid": outgoing_txid }),
        )
        .await
    }

    /// Reports a payment that hardened on-chain
    pub async fn payment_verified(&self, incoming_txid: &str, outgoing_txid: &str) {
        self.post(
            "SuccessfullyVerified",
            json!({ "incoming_txid": incoming_txid, "outgoing_txid": outgoing_txid }),
        )
        .await
    }

    /// Pushes a legacy balance-distribution update list
    pub async fn add_ether(&self, updates: Vec<BalanceUpdate>) {
        self.post("addEther", json!({ "updatelist": updates })).await
    }
}
