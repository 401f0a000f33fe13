//! Chain record types
//!
//! These mirror the upstream node's wire shapes: every numeric field is a
//! `0x`-prefixed hex string, and a transaction with an empty `blockNumber`
//! is still pending. The same shapes are what the record store persists.

use crate::store::Record;
use ethereum_types::{Address, U256};
use ethpool_rpc::hex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Entries kept per account history sequence
pub const ACCOUNT_HISTORY_LIMIT: usize = 200;

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Transactions of a block arrive as full objects when the block was fetched
/// with `full = true`, and as bare hash strings otherwise; only the objects
/// are of interest here.
fn transactions_or_hashes<'de, D>(deserializer: D) -> Result<Vec<Transaction>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw.into_iter().filter_map(|value| serde_json::from_value(value).ok()).collect())
}

/// Formats an address the way the rest of the system keys it
pub fn address_hex(address: &Address) -> String {
    format!("{address:#x}")
}

/// Parses a 40-hex-digit address with an optional `0x` prefix
pub fn parse_address(input: &str) -> Option<Address> {
    Address::from_str(input.strip_prefix("0x").unwrap_or(input)).ok()
}

/// Interprets the low 20 bytes of a 256-bit value as an address
pub fn address_from_u256(value: U256) -> Address {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Address::from(ethereum_types::H256::from(bytes))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    #[serde(default, deserialize_with = "null_default")]
    pub to: String,
    pub value: String,
    #[serde(default, deserialize_with = "null_default")]
    pub nonce: String,
    #[serde(default, deserialize_with = "null_default")]
    pub block_number: String,
    #[serde(default, deserialize_with = "null_default")]
    pub timestamp: String,
}

// === impl Transaction ===

impl Transaction {
    /// A transaction is pending iff the node has not assigned it a block yet
    pub fn is_pending(&self) -> bool {
        self.block_number.is_empty()
    }

    /// The hash as a 256-bit value; unparseable hashes read as zero, which
    /// the payment engine treats as "never successfully sent"
    pub fn hash_value(&self) -> U256 {
        hex::parse_hex(&self.hash).unwrap_or_default()
    }

    pub fn from_address(&self) -> Option<Address> {
        parse_address(&self.from)
    }

    pub fn to_address(&self) -> Option<Address> {
        parse_address(&self.to)
    }

    /// Transferred amount in wei; hex or legacy decimal
    pub fn value_amount(&self) -> U256 {
        hex::parse_quantity(&self.value).unwrap_or_default()
    }

    pub fn nonce_value(&self) -> U256 {
        hex::parse_hex(&self.nonce).unwrap_or_default()
    }
}

impl Record for Transaction {
    fn key(&self) -> String {
        self.hash.clone()
    }

    fn table() -> String {
        "transactions".to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    #[serde(default, deserialize_with = "null_default")]
    pub nonce: String,
    pub miner: String,
    pub difficulty: String,
    pub timestamp: String,
    #[serde(default, deserialize_with = "transactions_or_hashes")]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub uncles: Vec<String>,
}

// === impl Block ===

impl Block {
    pub fn number_value(&self) -> u64 {
        hex::parse_hex(&self.number).unwrap_or_default().low_u64()
    }

    pub fn miner_address(&self) -> Option<Address> {
        parse_address(&self.miner)
    }

    pub fn difficulty_value(&self) -> U256 {
        hex::parse_hex(&self.difficulty).unwrap_or_default()
    }

    /// Unix timestamp of the block
    pub fn timestamp_value(&self) -> u64 {
        hex::parse_hex(&self.timestamp).unwrap_or_default().low_u64()
    }
}

impl Record for Block {
    fn key(&self) -> String {
        self.hash.clone()
    }

    fn table() -> String {
        "blocks".to_string()
    }
}

/// Per-account view maintained by the scanner's indexer; each sequence is
/// truncated to the last [ACCOUNT_HISTORY_LIMIT] entries at flush time
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    #[serde(default)]
    pub incoming: Vec<Transaction>,
    #[serde(default)]
    pub outgoing: Vec<Transaction>,
    /// mined block numbers
    #[serde(default)]
    pub mined: Vec<String>,
}

// === impl Account ===

impl Account {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), ..Default::default() }
    }

    /// Drops everything but the most recent entries of each sequence
    pub fn truncate_history(&mut self) {
        fn keep_tail<T>(entries: &mut Vec<T>) {
            if entries.len() > ACCOUNT_HISTORY_LIMIT {
                entries.drain(..entries.len() - ACCOUNT_HISTORY_LIMIT);
            }
        }
        keep_tail(&mut self.incoming);
        keep_tail(&mut self.outgoing);
        keep_tail(&mut self.mined);
    }
}

impl Record for Account {
    fn key(&self) -> String {
        self.address.clone()
    }

    fn table() -> String {
        "accounts".to_string()
    }
}

/// Aggregate miner counters written back by the pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerStat {
    pub address: String,
    /// lifetime hashes, decimal
    pub hashes: String,
    /// lifetime payout in wei, decimal
    pub payout: String,
    /// accumulated online time in seconds
    #[serde(rename = "online")]
    pub online_secs: u64,
    pub shares: u64,
    pub blocks: u64,
}

impl Record for MinerStat {
    fn key(&self) -> String {
        self.address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::default_table_name;
    use serde_json::json;

    #[test]
    fn pending_is_empty_block_number() {
        let mut txn = Transaction { block_number: String::new(), ..Default::default() };
        assert!(txn.is_pending());
        txn.block_number = "0x30".to_string();
        assert!(!txn.is_pending());
    }

    #[test]
    fn deserializes_pending_transaction_with_null_block() {
        let txn: Transaction = serde_json::from_value(json!({
            "hash": "0x01",
            "from": "0x1111111111222222222233333333334444444444",
            "to": null,
            "value": "0x10",
            "nonce": "0x1",
            "blockNumber": null,
        }))
        .unwrap();
        assert!(txn.is_pending());
        assert_eq!(txn.value_amount(), U256::from(16u64));
    }

    #[test]
    fn block_accepts_hash_only_transactions() {
        let block: Block = serde_json::from_value(json!({
            "number": "0x10",
            "hash": "0x1234",
            "parentHash": "0x1233",
            "nonce": "0x8888444422221111",
            "miner": "0x1111111111222222222233333333334444444444",
            "difficulty": "0x442211",
            "timestamp": "0x55e67c30",
            "transactions": ["0xaa", "0xbb"],
            "uncles": [],
        }))
        .unwrap();
        assert!(block.transactions.is_empty());
        assert_eq!(block.number_value(), 16);
    }

    #[test]
    fn account_history_is_bounded() {
        let mut account = Account::new("0xabc");
        for i in 0..ACCOUNT_HISTORY_LIMIT + 50 {
            account.mined.push(format!("0x{i:x}"));
        }
        account.truncate_history();
        assert_eq!(account.mined.len(), ACCOUNT_HISTORY_LIMIT);
        assert_eq!(account.mined[0], format!("0x{:x}", 50));
    }

    #[test]
    fn miner_stats_use_the_default_table() {
        assert_eq!(MinerStat::table(), "minerstats");
        assert_eq!(default_table_name::<MinerStat>(), "minerstats");
    }

    #[test]
    fn address_round_trip() {
        let addr = parse_address("0x1111111111222222222233333333334444444444").unwrap();
        assert_eq!(address_hex(&addr), "0x1111111111222222222233333333334444444444");
        assert!(parse_address("0x123").is_none());
    }
}
