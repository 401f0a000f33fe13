//! Per-miner state: machines, counters and vardiff

use crate::config::PoolConfig;
use ethereum_types::{Address, H256, U256};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::info;

/// Damping applied to each hashrate sample folded into the estimate
const EMA_DAMPING: f64 = 0.3;

/// One physical rig behind a miner address
#[derive(Debug, Clone)]
pub struct Machine {
    pub id: H256,
    /// hashrate the client claims to have
    pub claimed_hashrate: U256,
    /// last time the machine reported in, in pool-tick time
    pub last_update: Instant,
}

#[derive(Debug)]
pub struct Miner {
    pub address: Address,
    machines: HashMap<H256, Machine>,
    /// amount paid to this miner, in wei
    pub payout: U256,
    /// lifetime hashes credited through shares
    pub hashes: U256,
    /// shares submitted since join
    pub shares: u64,
    /// full blocks found
    pub blocks: u64,
    /// current share difficulty; refreshed on every accepted submit
    pub difficulty: U256,
    /// exponentially smoothed hashrate estimate
    pub ehashrate: f64,
    /// accumulated online time, bumped on each stat writeback
    pub online_time: Duration,
    pub join_time: Instant,
    /// last stat writeback
    pub last_stat: Instant,
    /// last RPC seen from this miner
    pub last_post: Instant,
    /// last accepted share
    pub last_submit: Instant,
}

// === impl Miner ===

impl Miner {
    pub fn new(config: &PoolConfig, address: Address, now: Instant) -> Self {
        Self {
            address,
            machines: HashMap::new(),
            payout: U256::zero(),
            hashes: U256::zero(),
            shares: 0,
            blocks: 0,
            difficulty: config.default_difficulty(),
            ehashrate: config.default_hashrate as f64,
            online_time: Duration::ZERO,
            join_time: now,
            last_stat: now,
            last_post: now,
            last_submit: now,
        }
    }

    /// The difficulty this miner should work at next, targeting one share
    /// every `share_time` seconds. The claimed rate wins over the measured
    /// one, and both only beat the default when they exceed it.
    pub fn new_difficulty(&self, config: &PoolConfig) -> U256 {
        let default = U256::from(config.default_hashrate);
        let claimed = self.claimed_hashrate();
        let measured = self.true_hashrate();

        let base = if claimed > default {
            claimed
        } else if measured > default {
            measured
        } else {
            default
        };
        base * U256::from(config.share_time as u64)
    }

    /// Credits an accepted share and folds its implied hashrate into the
    /// estimate; used for hashrate calculation and statistics, not payments
    pub fn claim_share(&mut self, config: &PoolConfig, difficulty: U256, dt: f64, payout: U256) {
        let min_time = config.share_time * 0.2;
        let max_time = config.share_time * 2.0;
        let hashrate = u256_to_f64(difficulty) / (2.0 * dt.clamp(min_time, max_time));
        self.ehashrate += (hashrate - self.ehashrate) * EMA_DAMPING;

        self.shares += 1;
        self.hashes += difficulty;
        self.payout += payout;
    }

    /// Sum of what the machines claim
    pub fn claimed_hashrate(&self) -> U256 {
        self.machines.values().fold(U256::zero(), |acc, m| acc + m.claimed_hashrate)
    }

    /// The smoothed measured hashrate
    pub fn true_hashrate(&self) -> U256 {
        U256::from(self.ehashrate as u64)
    }

    /// Returns the machine with `id`, creating it on first sight
    pub fn machine_mut(&mut self, id: H256) -> &mut Machine {
        let last_submit = self.last_submit;
        self.machines.entry(id).or_insert_with(|| {
            info!(target: "pool", "new machine joined: {id:?}");
            Machine { id, claimed_hashrate: U256::zero(), last_update: last_submit }
        })
    }

    /// Drops machines that have not reported within `timeout` of `tick`
    pub fn prune_machines(&mut self, tick: Instant, timeout: Duration) {
        self.machines.retain(|id, machine| {
            let idle = tick.saturating_duration_since(machine.last_update) <= timeout;
            if !idle {
                info!(target: "pool", "removing idle machine: {id:?}");
            }
            idle
        });
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }
}

fn u256_to_f64(value: U256) -> f64 {
    value.low_u128() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn test_miner() -> (PoolConfig, Miner) {
        let config = PoolConfig::default();
        let miner = Miner::new(&config, Address::from_low_u64_be(1), Instant::now());
        (config, miner)
    }

    #[test]
    fn claimed_hashrate_sums_machines() {
        let (_, mut miner) = test_miner();
        miner.machine_mut(H256::from_low_u64_be(1)).claimed_hashrate = U256::from(10u64);
        miner.machine_mut(H256::from_low_u64_be(2)).claimed_hashrate = U256::from(10u64);
        assert_eq!(miner.claimed_hashrate(), U256::from(20u64));
        assert_eq!(miner.machine_count(), 2);
    }

    #[test]
    fn default_difficulty_until_a_rate_is_proven() {
        let (config, miner) = test_miner();
        assert_eq!(miner.new_difficulty(&config), config.default_difficulty());
    }

    #[test]
    fn claimed_rate_beats_measured_rate() {
        let (config, mut miner) = test_miner();
        miner.machine_mut(H256::from_low_u64_be(1)).claimed_hashrate = U256::from(1_000_000u64);
        miner.ehashrate = 2_000_000.0;
        assert_eq!(
            miner.new_difficulty(&config),
            U256::from(1_000_000u64) * U256::from(config.share_time as u64)
        );
    }

    #[test]
    fn measured_rate_used_when_no_claim_beats_default() {
        let (config, mut miner) = test_miner();
        miner.ehashrate = 2_000_000.0;
        assert_eq!(
            miner.new_difficulty(&config),
            U256::from(2_000_000u64) * U256::from(config.share_time as u64)
        );
    }

    #[test]
    fn difficulty_never_drops_below_the_default_floor() {
        let (config, mut miner) = test_miner();
        miner.ehashrate = 1.0;
        assert!(miner.new_difficulty(&config) >= config.default_difficulty());
    }

    #[test]
    fn ema_converges_within_twenty_samples() {
        let (config, mut miner) = test_miner();
        let difficulty = U256::from(4_240_000u64);
        let dt = config.share_time;
        // expected fixed point for a constant stream of shares
        let expected = 4_240_000.0 / (2.0 * dt);

        for _ in 0..20 {
            miner.claim_share(&config, difficulty, dt, U256::zero());
        }
        let error = (miner.ehashrate - expected).abs() / expected;
        assert!(error < 0.05, "ema off by {error}");
        assert_eq!(miner.shares, 20);
        assert_eq!(miner.hashes, difficulty * U256::from(20u64));
    }

    #[test]
    fn share_interval_is_clamped() {
        let (config, mut miner) = test_miner();
        let difficulty = U256::from(1_000_000u64);
        // a burst of instant shares must not read as infinite hashrate
        miner.claim_share(&config, difficulty, 0.1, U256::zero());
        let cap = 1_000_000.0 / (2.0 * config.share_time * 0.2);
        assert!(miner.ehashrate <= config.default_hashrate as f64 + cap);
    }

    #[test]
    fn idle_machines_are_pruned() {
        let (config, mut miner) = test_miner();
        miner.machine_mut(H256::from_low_u64_be(1));
        let future = Instant::now() + config.machine_timeout + Duration::from_secs(1);
        miner.prune_machines(future, config.machine_timeout);
        assert_eq!(miner.machine_count(), 0);
    }
}
