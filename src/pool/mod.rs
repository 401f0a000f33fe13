//! Main pool state and maintenance loop

pub mod api;
pub mod miner;

use crate::{
    accounting::{AccountingClient, BalanceUpdate},
    config::PoolConfig,
    eth::types::{address_hex, MinerStat},
    pool::miner::Miner,
    shutdown::Shutdown,
    store::{RecordStore, RecordStoreExt},
};
use ethereum_types::{Address, U256};
use parking_lot::{Mutex, MutexGuard};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};
use tracing::{info, warn};

/// The block template the pool is currently mining on, replaced wholesale
/// whenever the upstream header hash changes
#[derive(Debug)]
pub struct BlockState {
    pub number: u64,
    /// pool difficulty derived from the upstream target
    pub difficulty: U256,
    pub header_hash: U256,
    pub seed_hash: U256,
    pub block_start: Instant,
    /// nonces already accepted for this block
    pub submissions: HashSet<U256>,
}

impl BlockState {
    fn new(now: Instant) -> Self {
        Self {
            number: 0,
            difficulty: U256::from(5_000_000_000_000u64),
            header_hash: U256::zero(),
            seed_hash: U256::zero(),
            block_start: now,
            submissions: HashSet::new(),
        }
    }
}

pub(crate) struct PoolState {
    pub miners: HashMap<Address, Miner>,
    pub block: BlockState,
    /// accepted nonce → block it solved; kept for 8 blocks
    pub solutions: HashMap<U256, u64>,
    /// maintenance clock, advanced in whole seconds
    pub tick: Instant,
}

/// Shared miner-pool state behind the pool lock
pub struct MinerPool {
    config: Arc<PoolConfig>,
    store: Option<Arc<dyn RecordStore>>,
    state: Mutex<PoolState>,
}

// === impl MinerPool ===

impl MinerPool {
    pub fn new(config: Arc<PoolConfig>, store: Option<Arc<dyn RecordStore>>) -> Self {
        let now = Instant::now();
        if let Some(store) = &store {
            if let Err(err) = store.connect() {
                warn!(target: "pool", "could not connect to record store: {err}");
            }
        }
        Self {
            config,
            store,
            state: Mutex::new(PoolState {
                miners: HashMap::new(),
                block: BlockState::new(now),
                solutions: HashMap::new(),
                tick: now,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }

    /// Number of miners currently known
    pub fn miner_count(&self) -> usize {
        self.lock().miners.len()
    }

    /// Returns the miner for `address`, creating and hydrating it from the
    /// record store on first sight. Must be called with the pool lock held.
    pub(crate) fn miner_entry<'a>(
        &self,
        state: &'a mut PoolState,
        address: Address,
    ) -> &'a mut Miner {
        let tick = state.tick;
        state.miners.entry(address).or_insert_with(|| {
            let mut miner = Miner::new(&self.config, address, tick);
            self.hydrate_miner(&mut miner);
            info!(
                target: "pool",
                "new miner joined: {} (shares: {}, blocks: {})",
                address_hex(&address),
                miner.shares,
                miner.blocks
            );
            miner
        })
    }

    /// Loads previously written stats back into a fresh miner
    fn hydrate_miner(&self, miner: &mut Miner) {
        let store = match &self.store {
            Some(store) => store,
            None => return,
        };
        if store.connect().is_err() {
            warn!(target: "pool", "could not connect to record store");
            return;
        }
        if let Ok(stat) = store.get::<MinerStat>(&address_hex(&miner.address)) {
            miner.hashes = U256::from_dec_str(&stat.hashes).unwrap_or_default();
            miner.payout = U256::from_dec_str(&stat.payout).unwrap_or_default();
            miner.shares = stat.shares;
            miner.blocks = stat.blocks;
            miner.online_time = std::time::Duration::from_secs(stat.online_secs);
        }
        let _ = store.disconnect();
    }

    /// Writes the miner's aggregate counters back to the record store and
    /// accounts the elapsed online time
    fn write_miner_stats(&self, miner: &mut Miner) {
        let elapsed = miner.last_stat.elapsed();
        miner.online_time += elapsed;
        miner.last_stat = Instant::now();

        let store = match &self.store {
            Some(store) => store,
            None => return,
        };
        if store.connect().is_err() {
            warn!(target: "pool", "could not connect to record store");
            return;
        }
        let stat = MinerStat {
            address: address_hex(&miner.address),
            hashes: miner.hashes.to_string(),
            payout: miner.payout.to_string(),
            online_secs: miner.online_time.as_secs(),
            shares: miner.shares,
            blocks: miner.blocks,
        };
        info!(target: "pool", "writing miner stats: {}", stat.address);
        if let Err(err) = store.update(&stat) {
            warn!(target: "pool", "could not write miner stats: {err}");
        }
        let _ = store.disconnect();
    }

    /// One maintenance pass: machine GC, idle-miner eviction, periodic stat
    /// writeback and solution GC. No-ops when called more than once a second.
    pub fn update(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        let dstep = now.saturating_duration_since(state.tick).as_secs();
        if dstep < 1 {
            return;
        }

        let tick = state.tick;
        let addresses: Vec<Address> = state.miners.keys().copied().collect();
        for address in addresses {
            let (evict, writeback) = match state.miners.get_mut(&address) {
                Some(miner) => {
                    miner.prune_machines(tick, self.config.machine_timeout);
                    (
                        now.saturating_duration_since(miner.last_post) > self.config.client_timeout,
                        now.saturating_duration_since(miner.last_stat)
                            > self.config.client_db_writeback,
                    )
                }
                None => continue,
            };

            if evict {
                info!(target: "pool", "removing idle miner: {}", address_hex(&address));
                if let Some(mut miner) = state.miners.remove(&address) {
                    self.write_miner_stats(&mut miner);
                }
            } else if writeback {
                if let Some(miner) = state.miners.get_mut(&address) {
                    self.write_miner_stats(miner);
                }
            }
        }

        let stale = state.block.number.saturating_sub(self.config.confirmation_depth);
        state.solutions.retain(|_, solved| *solved >= stale);

        state.tick += std::time::Duration::from_secs(dstep);
    }

    /// Claimed hashrate per miner, clamped to within a factor of two of the
    /// measured rate; this is what accounting sees
    pub fn sanitized_hashrates(&self) -> Vec<(Address, u64)> {
        let state = self.lock();
        state
            .miners
            .values()
            .map(|miner| {
                let claimed = miner.claimed_hashrate().low_u128() as f64;
                let measured = miner.ehashrate.max(0.0);
                let reported = claimed.clamp(0.5 * measured, 2.0 * measured);
                (miner.address, reported as u64)
            })
            .collect()
    }

    /// Splits `value` over all miners in proportion to their hash counts,
    /// minus the house rake. Legacy balance-distribution path.
    pub fn divvy(&self, value: U256) -> Vec<BalanceUpdate> {
        let state = self.lock();
        let total: U256 =
            state.miners.values().fold(U256::zero(), |acc, miner| acc + miner.hashes);
        if total.is_zero() {
            return Vec::new();
        }
        let keep = U256::from(10_000 - self.config.rake_basis_points());
        state
            .miners
            .values()
            .map(|miner| {
                let share = value * miner.hashes * keep / (total * U256::from(10_000u64));
                BalanceUpdate {
                    address: address_hex(&miner.address),
                    balance: share.to_string(),
                }
            })
            .collect()
    }

    /// Zeroes every miner's hash counter after a distribution
    pub fn reset_hash_counts(&self) {
        let mut state = self.lock();
        for miner in state.miners.values_mut() {
            miner.hashes = U256::zero();
        }
    }

    /// Evicts every miner, writing stats, and releases the record store
    pub fn destroy(&self) {
        let mut state = self.lock();
        let addresses: Vec<Address> = state.miners.keys().copied().collect();
        for address in addresses {
            if let Some(mut miner) = state.miners.remove(&address) {
                self.write_miner_stats(&mut miner);
            }
        }
        if let Some(store) = &self.store {
            let _ = store.disconnect();
        }
    }

    /// Drives the maintenance loop until shutdown, pushing sanitized
    /// hashrates to accounting every tick
    pub async fn run(
        self: Arc<Self>,
        accounting: Option<AccountingClient>,
        shutdown: Shutdown,
    ) {
        let mut interval = tokio::time::interval(self.config.pool_poll_time);
        // the first tick of a tokio interval fires immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.clone() => break,
            }
            self.update();

            if let Some(accounting) = &accounting {
                for (address, hashrate) in self.sanitized_hashrates() {
                    let accounting = accounting.clone();
                    tokio::spawn(async move {
                        accounting.add_hashes(address, hashrate).await;
                    });
                }
            }
        }
        self.destroy();
        info!(target: "pool", "pool loop stopped");
    }
}

/// The hash ceiling a solution must stay under to satisfy `difficulty`;
/// an unset difficulty falls back to the default share target
pub fn boundary(config: &PoolConfig, difficulty: U256) -> U256 {
    let difficulty =
        if difficulty.is_zero() { config.default_difficulty() } else { difficulty };
    ((U256::one() << 255) / difficulty) << 1
}

/// Pool difficulty for an upstream 256-bit target, `(1 << 256) / target`
/// computed within 256 bits
pub fn pool_difficulty(target: U256) -> U256 {
    if target.is_zero() {
        return U256::zero();
    }
    ((U256::one() << 255) / target) << 1
}

/// Wei credited for one share of `difficulty` against `pool_difficulty`,
/// assuming a five-ether block reward, after the house rake
pub fn share_payout(config: &PoolConfig, difficulty: U256, pool_difficulty: U256) -> U256 {
    if pool_difficulty.is_zero() {
        return U256::zero();
    }
    let five_ether = U256::from(5_000_000_000_000_000_000u64);
    let keep = U256::from(10_000 - config.rake_basis_points());
    five_ether * difficulty * keep / (pool_difficulty * U256::from(10_000u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordStoreExt};
    use std::time::Duration;

    #[test]
    fn idle_miners_are_evicted_with_their_stats_written() {
        let mut config = PoolConfig::default();
        config.client_timeout = Duration::ZERO;
        let store = Arc::new(MemoryStore::default());
        let pool = MinerPool::new(Arc::new(config), Some(store.clone()));

        let address = Address::from_low_u64_be(0xbeef);
        {
            let mut state = pool.lock();
            // rewind the clock so the next update actually steps
            state.tick = Instant::now() - Duration::from_secs(5);
            let miner = pool.miner_entry(&mut state, address);
            miner.shares = 7;
            miner.payout = U256::from(123u64);
        }
        pool.update();

        assert_eq!(pool.miner_count(), 0);
        let stat = store.get::<MinerStat>(&address_hex(&address)).unwrap();
        assert_eq!(stat.shares, 7);
        assert_eq!(stat.payout, "123");
    }

    #[test]
    fn eviction_writeback_survives_a_rejoin() {
        let mut config = PoolConfig::default();
        config.client_timeout = Duration::ZERO;
        let store = Arc::new(MemoryStore::default());
        let pool = MinerPool::new(Arc::new(config), Some(store.clone()));

        let address = Address::from_low_u64_be(0xbeef);
        {
            let mut state = pool.lock();
            state.tick = Instant::now() - Duration::from_secs(5);
            pool.miner_entry(&mut state, address).shares = 3;
        }
        pool.update();
        assert_eq!(pool.miner_count(), 0);

        // the counters come back on the next RPC from that address
        let mut state = pool.lock();
        let miner = pool.miner_entry(&mut state, address);
        assert_eq!(miner.shares, 3);
    }

    #[test]
    fn stale_solutions_are_garbage_collected() {
        let pool = MinerPool::new(Arc::new(PoolConfig::default()), None);
        {
            let mut state = pool.lock();
            state.tick = Instant::now() - Duration::from_secs(5);
            state.block.number = 100;
            state.solutions.insert(U256::from(1u64), 80);
            state.solutions.insert(U256::from(2u64), 95);
        }
        pool.update();
        let state = pool.lock();
        assert_eq!(state.solutions.len(), 1);
        assert!(state.solutions.contains_key(&U256::from(2u64)));
    }

    #[test]
    fn reported_hashrate_is_clamped_around_the_measured_rate() {
        let pool = MinerPool::new(Arc::new(PoolConfig::default()), None);
        let address = Address::from_low_u64_be(0xbeef);
        {
            let mut state = pool.lock();
            let miner = pool.miner_entry(&mut state, address);
            miner.ehashrate = 100_000.0;
            miner
                .machine_mut(ethereum_types::H256::from_low_u64_be(1))
                .claimed_hashrate = U256::from(1_000_000u64);
        }
        let rates = pool.sanitized_hashrates();
        assert_eq!(rates, vec![(address, 200_000u64)]);

        {
            let mut state = pool.lock();
            let miner = state.miners.get_mut(&address).unwrap();
            miner.machine_mut(ethereum_types::H256::from_low_u64_be(1)).claimed_hashrate =
                U256::from(10u64);
        }
        let rates = pool.sanitized_hashrates();
        assert_eq!(rates, vec![(address, 50_000u64)]);
    }

    #[test]
    fn share_payout_matches_the_reference_value() {
        let config = PoolConfig::default();
        let payout = share_payout(
            &config,
            U256::from(1_000_000u64),
            U256::from(5_000_000_000_000u64),
        );
        assert_eq!(payout, U256::from(980_000_000_000u64));
    }

    #[test]
    fn boundary_falls_back_to_the_default_target() {
        let config = PoolConfig::default();
        assert_eq!(boundary(&config, U256::zero()), boundary(&config, config.default_difficulty()));
        // a higher difficulty yields a lower ceiling
        assert!(
            boundary(&config, U256::from(2_000_000u64)) < boundary(&config, U256::from(1_000_000u64))
        );
    }

    #[test]
    fn pool_difficulty_inverts_the_target() {
        // target of 2^255 → difficulty 2
        assert_eq!(pool_difficulty(U256::one() << 255), U256::from(2u64));
        assert_eq!(pool_difficulty(U256::zero()), U256::zero());
    }
}
