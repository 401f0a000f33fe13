//! Pool configuration

use ethereum_types::U256;
use std::{path::PathBuf, time::Duration};

/// Hashrate assumed for a miner that has not proven any rate yet, in H/s
pub const DEFAULT_HASHRATE_ESTIMATE: u64 = 80_000;

/// Target seconds between accepted shares per miner
pub const SHARE_TIME: f64 = 53.0;

/// Fraction of each share payout retained by the pool operator
pub const HOUSE_RAKE: f64 = 0.02;

/// Blocks required on top of a block before it is treated as final
pub const CONFIRMATION_DEPTH: u64 = 8;

/// Supervisor configuration: endpoints, timing constants and subsystem toggles
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// miner-facing RPC port
    pub listen_port: u16,
    /// legacy balance-distribution endpoint port
    pub secret_port: u16,
    /// payment RPC port
    pub pay_rpc_port: u16,
    /// upstream chain node endpoint
    pub chain_url: String,
    /// PoW verifier endpoint
    pub verifier_url: String,
    /// accounting backend endpoint
    pub backend_url: String,
    /// drop a machine that has not reported for this long
    pub machine_timeout: Duration,
    /// evict a miner that has not spoken for this long
    pub client_timeout: Duration,
    /// flush miner stats to the record store at this cadence
    pub client_db_writeback: Duration,
    /// scanner poll cadence
    pub balance_poll_time: Duration,
    /// pool maintenance cadence
    pub pool_poll_time: Duration,
    /// payment engine cadence
    pub pay_wait: Duration,
    /// assumed hashrate for unproven miners
    pub default_hashrate: u64,
    /// vardiff target seconds per share
    pub share_time: f64,
    /// operator cut per share
    pub house_rake: f64,
    /// confirmations before a block or transaction is final
    pub confirmation_depth: u64,
    /// scanner cursor floor
    pub min_processed_block: i64,
    /// persisted scanner cursor
    pub block_persist_file: PathBuf,
    /// persisted pending-payment map
    pub pay_persist_file: PathBuf,
    /// run the miner-facing proxy
    pub enable_pool: bool,
    /// register the chain-scanner processors
    pub enable_scanner: bool,
    /// run the payment engine
    pub enable_pay: bool,
    /// talk to the accounting backend
    pub enable_web: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            secret_port: 7777,
            pay_rpc_port: 9090,
            chain_url: "http://127.0.0.1:8545".to_string(),
            verifier_url: "http://127.0.0.1:8081".to_string(),
            backend_url: "http://127.0.0.1:9999".to_string(),
            machine_timeout: Duration::from_secs(300),
            client_timeout: Duration::from_secs(25),
            client_db_writeback: Duration::from_secs(151),
            balance_poll_time: Duration::from_secs(5),
            pool_poll_time: Duration::from_secs(3),
            pay_wait: Duration::from_secs(10),
            default_hashrate: DEFAULT_HASHRATE_ESTIMATE,
            share_time: SHARE_TIME,
            house_rake: HOUSE_RAKE,
            confirmation_depth: CONFIRMATION_DEPTH,
            min_processed_block: 0,
            block_persist_file: PathBuf::from("block.last"),
            pay_persist_file: PathBuf::from("pending.persist"),
            enable_pool: false,
            enable_scanner: false,
            enable_pay: false,
            enable_web: false,
        }
    }
}

// === impl PoolConfig ===

impl PoolConfig {
    /// Share difficulty assigned to a miner nothing is known about yet
    pub fn default_difficulty(&self) -> U256 {
        U256::from(self.default_hashrate) * U256::from(self.share_time as u64)
    }

    /// The operator cut in basis points, for integer payout arithmetic
    pub fn rake_basis_points(&self) -> u64 {
        (self.house_rake * 10_000.0).round() as u64
    }

    /// Enables all subsystems
    pub fn with_all(mut self) -> Self {
        self.enable_pool = true;
        self.enable_scanner = true;
        self.enable_pay = true;
        self.enable_web = true;
        self
    }

    /// Sets the miner-facing RPC port
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Sets the upstream chain node endpoint
    pub fn with_chain_url(mut self, url: impl Into<String>) -> Self {
        self.chain_url = url.into();
        self
    }

    /// Sets the PoW verifier endpoint
    pub fn with_verifier_url(mut self, url: impl Into<String>) -> Self {
        self.verifier_url = url.into();
        self
    }

    /// Sets the accounting backend endpoint
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_difficulty_targets_one_share_per_window() {
        let config = PoolConfig::default();
        assert_eq!(config.default_difficulty(), U256::from(80_000u64 * 53));
    }

    #[test]
    fn rake_in_basis_points() {
        assert_eq!(PoolConfig::default().rake_basis_points(), 200);
    }
}
