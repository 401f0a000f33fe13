//! Miner-facing RPC surface
//!
//! Every request arrives as a JSON-RPC POST with a `miner=<address>` query
//! parameter. Work requests are proxied to the chain node with the boundary
//! rewritten to the miner's own share target; submits are verified against
//! the external verifier, deduplicated per block and forwarded upstream when
//! they solve the full block.

use crate::{
    accounting::AccountingClient,
    config::PoolConfig,
    eth::{
        client::{ChainApi, ChainError},
        types::{address_hex, parse_address},
        verify::WorkVerifier,
    },
    pool::{boundary, pool_difficulty, share_payout, MinerPool},
    shutdown::ShutdownFlag,
};
use ethereum_types::{Address, H256, U256};
use ethpool_rpc::{
    error::RpcError,
    request::RpcMethodCall,
    response::{ResponseResult, RpcResponse},
};
use ethpool_server::{RequestMeta, RpcHandler};
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

/// Methods the proxy understands at all
fn method_is_valid(method: &str) -> bool {
    matches!(
        method,
        "web3_clientVersion"
            | "web3_sha3"
            | "net_version"
            | "net_peerCount"
            | "net_listening"
            | "eth_alive"
            | "eth_protocolVersion"
            | "eth_coinbase"
            | "eth_mining"
            | "eth_hashrate"
            | "eth_gasPrice"
            | "eth_accounts"
            | "eth_blockNumber"
            | "eth_getBalance"
            | "eth_getStorageAt"
            | "eth_getTransactionCount"
            | "eth_getBlockTransactionCountByHash"
            | "eth_getBlockTransactionCountByNumber"
            | "eth_getUncleCountByBlockHash"
            | "eth_getUncleCountByBlockNumber"
            | "eth_getCode"
            | "eth_sign"
            | "eth_sendTransaction"
            | "eth_call"
            | "eth_estimateGas"
            | "eth_getBlockByHash"
            | "eth_getBlockByNumber"
            | "eth_getTransactionByHash"
            | "eth_getTransactionByBlockHashAndIndex"
            | "eth_getTransactionByBlockNumberAndIndex"
            | "eth_getTransactionReceipt"
            | "eth_getUncleByBlockHashAndIndex"
            | "eth_getUncleByBlockNumberAndIndex"
            | "eth_getCompilers"
            | "eth_compileLLL"
            | "eth_compileSolidity"
            | "eth_compileSerpent"
            | "eth_newFilter"
            | "eth_newBlockFilter"
            | "eth_newPendingTransactionFilter"
            | "eth_ping"
            | "eth_uninstallFilter"
            | "eth_getFilterChanges"
            | "eth_getFilterLogs"
            | "eth_getLogs"
            | "eth_getWork"
            | "eth_submitWork"
            | "eth_submitHashrate"
            | "db_putString"
            | "db_getString"
            | "db_putHex"
            | "db_getHex"
            | "shh_post"
            | "shh_version"
            | "shh_newIdentity"
            | "shh_hasIdentity"
            | "shh_newGroup"
            | "shh_addToGroup"
            | "shh_newFilter"
            | "shh_uninstallFilter"
            | "shh_getFilterChanges"
            | "shh_getMessages"
    )
}

/// Methods miners are allowed to reach
fn method_is_allowed(method: &str) -> bool {
    matches!(
        method,
        "eth_getWork"
            | "eth_alive"
            | "eth_submitWork"
            | "eth_submitHashrate"
            | "eth_ping"
            | "eth_protocolVersion"
            | "eth_coinbase"
            | "eth_mining"
    )
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("{0}")]
    Rpc(RpcError),
}

impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        ApiError::Rpc(err)
    }
}

type ApiResult = Result<RpcResponse, ApiError>;

/// The entry point for executing miner RPC calls.
///
/// Cheap to clone, used concurrently by every request task.
#[derive(Clone)]
pub struct PoolApi {
    pool: Arc<MinerPool>,
    chain: Arc<dyn ChainApi>,
    verifier: Arc<dyn WorkVerifier>,
    accounting: Option<AccountingClient>,
    config: Arc<PoolConfig>,
    shutdown: ShutdownFlag,
}

// === impl PoolApi ===

impl PoolApi {
    pub fn new(
        pool: Arc<MinerPool>,
        chain: Arc<dyn ChainApi>,
        verifier: Arc<dyn WorkVerifier>,
        accounting: Option<AccountingClient>,
        config: Arc<PoolConfig>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self { pool, chain, verifier, accounting, config, shutdown }
    }

    /// Classifies and executes one method call on behalf of `miner`
    pub async fn execute(&self, call: RpcMethodCall, miner: Address) -> RpcResponse {
        let id = call.id();
        if !method_is_valid(&call.method) {
            return RpcResponse::new(id, RpcError::unknown_method(&call.method));
        }
        if !method_is_allowed(&call.method) {
            return RpcResponse::new(id, RpcError::restricted_method(&call.method));
        }

        let outcome = match call.method.as_str() {
            "eth_ping" | "eth_alive" => {
                Ok(RpcResponse::new(id.clone(), ResponseResult::success(true)))
            }
            "eth_getWork" => self.get_work(call, miner).await,
            "eth_submitWork" => self.submit_work(call, miner).await,
            "eth_submitHashrate" => self.submit_hashrate(call, miner).await,
            // anything else on the allow-list goes upstream untouched
            _ => self.chain.raw_call(call).await.map_err(Into::into),
        };

        match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(target: "rpc", miner = %address_hex(&miner), "error proxying request: {err}");
                RpcResponse::new(id, RpcError::proxy_failure())
            }
        }
    }

    /// Serves `eth_getWork`, rotating the block state when the upstream
    /// header changed and rewriting the boundary to the miner's target
    async fn get_work(&self, call: RpcMethodCall, miner: Address) -> ApiResult {
        {
            let mut state = self.pool.lock();
            self.pool.miner_entry(&mut state, miner);
        }

        let mut response = self.chain.raw_call(call).await?;
        let header_hash = response.result_array_u256(0, 32).map_err(ApiError::Rpc)?;
        let seed_hash = response.result_array_u256(1, 32).map_err(ApiError::Rpc)?;
        let target = response.result_array_u256(2, 32).map_err(ApiError::Rpc)?;

        let rotate = self.pool.lock().block.header_hash != header_hash;
        if rotate {
            let number = self.chain.get_block_number().await?;
            let difficulty = pool_difficulty(target);
            let mut state = self.pool.lock();
            // re-checked under the lock; another request may have rotated
            if state.block.header_hash != header_hash {
                state.block.number = number;
                state.block.difficulty = difficulty;
                state.block.header_hash = header_hash;
                state.block.seed_hash = seed_hash;
                state.block.block_start = Instant::now();
                state.block.submissions.clear();
                info!(target: "pool", block = number, "new work template");
            }
        }

        let difficulty = {
            let mut state = self.pool.lock();
            let entry = self.pool.miner_entry(&mut state, miner);
            entry.last_post = Instant::now();
            entry.difficulty
        };
        let target = boundary(&self.config, difficulty);
        response
            .replace_result_entry(2, Value::String(ethpool_rpc::hex::to_hex(target, 64)))
            .map_err(ApiError::Rpc)?;
        Ok(response)
    }

    /// Serves `eth_submitWork`: verify, dedup, account, re-vardiff and
    /// forward full solutions upstream
    async fn submit_work(&self, call: RpcMethodCall, miner: Address) -> ApiResult {
        let id = call.id();
        let nonce = call.param_u256(0, 8).map_err(ApiError::Rpc)?;
        let _pow_hash = call.param_u256(1, 32).map_err(ApiError::Rpc)?;
        let mix_hash = call.param_u256(2, 32).map_err(ApiError::Rpc)?;

        let (difficulty, dt, block_number, header_hash, pool_diff) = {
            let mut state = self.pool.lock();
            let block_number = state.block.number;
            let header_hash = state.block.header_hash;
            let pool_diff = state.block.difficulty;
            let entry = self.pool.miner_entry(&mut state, miner);
            entry.last_post = Instant::now();
            let dt = entry.last_submit.elapsed().as_secs_f64() + 0.1;
            (entry.difficulty, dt, block_number, header_hash, pool_diff)
        };

        if !self
            .verifier
            .verify(block_number, header_hash, mix_hash, nonce, difficulty)
            .await
        {
            info!(target: "pool", "failed submit from {}", address_hex(&miner));
            return Ok(RpcResponse::new(id, ResponseResult::success(false)));
        }

        let payout = {
            let mut state = self.pool.lock();
            // first writer wins; a concurrent submit of the same nonce loses
            if !state.block.submissions.insert(nonce) {
                return Ok(RpcResponse::new(id, ResponseResult::success(false)));
            }
            state.solutions.insert(nonce, block_number);

            let payout = share_payout(&self.config, difficulty, pool_diff);
            let entry = self.pool.miner_entry(&mut state, miner);
            entry.last_submit = Instant::now();
            entry.claim_share(&self.config, difficulty, dt, payout);
            entry.difficulty = entry.new_difficulty(&self.config);
            debug!(
                target: "pool",
                miner = %address_hex(&miner),
                shares = entry.shares,
                ehashrate = entry.ehashrate,
                "accepted share"
            );
            payout
        };

        if let Some(accounting) = &self.accounting {
            let accounting = accounting.clone();
            tokio::spawn(async move {
                accounting.add_shares(miner, difficulty, payout).await;
            });
        }

        // the same solution may also satisfy the full block target
        if self
            .verifier
            .verify(block_number, header_hash, mix_hash, nonce, pool_diff)
            .await
        {
            info!(target: "pool", block = block_number, miner = %address_hex(&miner), "block found");
            {
                let mut state = self.pool.lock();
                let entry = self.pool.miner_entry(&mut state, miner);
                entry.blocks += 1;
            }
            return Ok(self.chain.raw_call(call).await?);
        }

        Ok(RpcResponse::new(id, ResponseResult::success(true)))
    }

    /// Serves `eth_submitHashrate`, replacing the claimed rate with the
    /// server-side estimate before it reaches the chain node
    async fn submit_hashrate(&self, mut call: RpcMethodCall, miner: Address) -> ApiResult {
        let claimed = call.param_u256(0, 32).map_err(ApiError::Rpc)?;
        let machine_id: H256 = {
            let mut bytes = [0u8; 32];
            call.param_u256(1, 32).map_err(ApiError::Rpc)?.to_big_endian(&mut bytes);
            H256::from(bytes)
        };

        let true_rate = {
            let mut state = self.pool.lock();
            self.pool.miner_entry(&mut state, miner).true_hashrate()
        };
        call.replace_param(0, Value::String(ethpool_rpc::hex::to_hex(true_rate, 64)))
            .map_err(ApiError::Rpc)?;

        let response = self.chain.raw_call(call).await?;
        if !response.result_bool().unwrap_or(false) {
            return Err(RpcError::invalid_params("hashrate submitted is invalid").into());
        }

        let mut state = self.pool.lock();
        let tick = state.tick;
        let entry = self.pool.miner_entry(&mut state, miner);
        entry.last_post = Instant::now();
        let machine = entry.machine_mut(machine_id);
        machine.claimed_hashrate = claimed;
        machine.last_update = tick;

        Ok(response)
    }
}

#[async_trait::async_trait]
impl RpcHandler for PoolApi {
    async fn on_call(&self, call: RpcMethodCall, meta: RequestMeta) -> RpcResponse {
        if self.shutdown.is_set() {
            return RpcResponse::new(call.id(), ResponseResult::success(Value::Null));
        }
        let miner = meta.query_param("miner").and_then(parse_address);
        match miner {
            Some(miner) => self.execute(call, miner).await,
            None => {
                warn!(target: "rpc", "attempt to mine without a miner id");
                RpcResponse::new(call.id(), RpcError::invalid_miner())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::mock::{MockChain, MockVerifier};
    use ethpool_rpc::request::Id;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const MINER: u64 = 0xbeef;
    const POOL_DIFF: u64 = 5_000_000_000_000;
    const MINER_DIFF: u64 = 1_000_000;

    fn submit_call(nonce: &str) -> RpcMethodCall {
        RpcMethodCall::new(
            Id::Number(1),
            "eth_submitWork",
            vec![
                json!(nonce),
                json!("0x00000000000000000000000000000000000000000000000000000000000000aa"),
                json!("0x00000000000000000000000000000000000000000000000000000000000000bb"),
            ],
        )
    }

    fn test_api(quality: u64) -> (PoolApi, Arc<MinerPool>, Arc<MockChain>, Arc<MockVerifier>) {
        let config = Arc::new(PoolConfig::default());
        let pool = Arc::new(MinerPool::new(config.clone(), None));
        let chain = Arc::new(MockChain::new(100));
        let verifier = Arc::new(MockVerifier::new(U256::from(quality)));
        let api = PoolApi::new(
            pool.clone(),
            chain.clone(),
            verifier.clone(),
            None,
            config,
            ShutdownFlag::default(),
        );
        // seed the miner at the scenario difficulty
        let miner = Address::from_low_u64_be(MINER);
        {
            let mut state = pool.lock();
            state.block.number = 100;
            state.block.difficulty = U256::from(POOL_DIFF);
            state.block.header_hash = U256::from(0xaau64);
            let entry = api.pool.miner_entry(&mut state, miner);
            entry.difficulty = U256::from(MINER_DIFF);
        }
        (api, pool, chain, verifier)
    }

    #[tokio::test]
    async fn accepts_a_valid_share_and_pays_it() {
        let (api, pool, _chain, _verifier) = test_api(MINER_DIFF);
        let miner = Address::from_low_u64_be(MINER);

        let response = api.execute(submit_call("0x0000000000000001"), miner).await;
        assert!(response.result_bool().unwrap());

        let state = pool.lock();
        let entry = &state.miners[&miner];
        assert_eq!(entry.shares, 1);
        assert_eq!(entry.blocks, 0);
        assert_eq!(entry.payout, U256::from(980_000_000_000u64));
        assert_eq!(state.solutions.len(), 1);
    }

    #[tokio::test]
    async fn rejects_a_duplicate_nonce() {
        let (api, pool, _chain, _verifier) = test_api(MINER_DIFF);
        let miner = Address::from_low_u64_be(MINER);

        let first = api.execute(submit_call("0x0000000000000001"), miner).await;
        assert!(first.result_bool().unwrap());
        let second = api.execute(submit_call("0x0000000000000001"), miner).await;
        assert!(!second.result_bool().unwrap());

        // a second miner does not get credit for the same nonce either
        let other = Address::from_low_u64_be(0xcafe);
        {
            let mut state = pool.lock();
            api.pool.miner_entry(&mut state, other).difficulty = U256::from(MINER_DIFF);
        }
        let third = api.execute(submit_call("0x0000000000000001"), other).await;
        assert!(!third.result_bool().unwrap());

        assert_eq!(pool.lock().miners[&miner].shares, 1);
        assert_eq!(pool.lock().miners[&other].shares, 0);
    }

    #[tokio::test]
    async fn forwards_a_full_block_solution_upstream() {
        // the verifier accepts the share even at the pool difficulty
        let (api, pool, chain, _verifier) = test_api(POOL_DIFF);
        let miner = Address::from_low_u64_be(MINER);

        let response = api.execute(submit_call("0x0000000000000002"), miner).await;
        // the upstream's own answer is returned to the miner
        assert!(response.result_bool().unwrap());
        assert_eq!(chain.forwarded(), vec!["eth_submitWork".to_string()]);
        assert_eq!(pool.lock().miners[&miner].blocks, 1);
    }

    #[tokio::test]
    async fn rejects_when_the_verifier_says_no() {
        let (api, pool, _chain, verifier) = test_api(MINER_DIFF);
        verifier.set_quality(U256::zero());
        let miner = Address::from_low_u64_be(MINER);

        let response = api.execute(submit_call("0x0000000000000003"), miner).await;
        assert!(!response.result_bool().unwrap());
        assert_eq!(pool.lock().miners[&miner].shares, 0);
    }

    #[tokio::test]
    async fn vardiff_refreshes_after_an_accepted_share() {
        let (api, pool, _chain, _verifier) = test_api(MINER_DIFF);
        let miner = Address::from_low_u64_be(MINER);
        let config = PoolConfig::default();

        api.execute(submit_call("0x0000000000000004"), miner).await;
        let difficulty = pool.lock().miners[&miner].difficulty;
        assert!(difficulty >= config.default_difficulty());
    }

    #[tokio::test]
    async fn get_work_rotates_the_template_and_rewrites_the_boundary() {
        let (api, pool, chain, _verifier) = test_api(MINER_DIFF);
        let miner = Address::from_low_u64_be(MINER);
        chain.set_block_number(123);
        // target of 2^255 → pool difficulty 2
        chain.set_work(U256::from(0xccu64), U256::from(0xddu64), U256::one() << 255);

        let call = RpcMethodCall::new(Id::Number(1), "eth_getWork", vec![]);
        let response = api.execute(call, miner).await;

        {
            let state = pool.lock();
            assert_eq!(state.block.header_hash, U256::from(0xccu64));
            assert_eq!(state.block.seed_hash, U256::from(0xddu64));
            assert_eq!(state.block.number, 123);
            assert_eq!(state.block.difficulty, U256::from(2u64));
            assert!(state.block.submissions.is_empty());
        }
        // boundary rewritten for the miner's own difficulty
        let config = PoolConfig::default();
        let expected = boundary(&config, U256::from(MINER_DIFF));
        assert_eq!(response.result_array_u256(2, 32).unwrap(), expected);
    }

    #[tokio::test]
    async fn submit_hashrate_registers_the_machine() {
        let (api, pool, _chain, _verifier) = test_api(MINER_DIFF);
        let miner = Address::from_low_u64_be(MINER);

        let call = RpcMethodCall::new(
            Id::Number(1),
            "eth_submitHashrate",
            vec![
                json!("0x500000"),
                json!("0x00000000000000000000000000000000000000000000000000000000000000ee"),
            ],
        );
        let response = api.execute(call, miner).await;
        assert!(response.result_bool().unwrap());

        let state = pool.lock();
        let entry = &state.miners[&miner];
        assert_eq!(entry.machine_count(), 1);
        assert_eq!(entry.claimed_hashrate(), U256::from(0x500000u64));
    }

    #[tokio::test]
    async fn classifies_unknown_and_restricted_methods() {
        let (api, _pool, _chain, _verifier) = test_api(MINER_DIFF);
        let miner = Address::from_low_u64_be(MINER);

        let unknown = RpcMethodCall::new(Id::Number(1), "foo_bar", vec![]);
        let response = api.execute(unknown, miner).await;
        assert_eq!(response.error().unwrap().code.code(), -32602);

        let restricted = RpcMethodCall::new(Id::Number(1), "eth_sendTransaction", vec![]);
        let response = api.execute(restricted, miner).await;
        let err = response.error().unwrap();
        assert_eq!(err.code.code(), -32602);
        assert!(err.message.contains("restricted"));

        let ping = RpcMethodCall::new(Id::Number(1), "eth_ping", vec![]);
        let response = api.execute(ping, miner).await;
        assert!(response.result_bool().unwrap());
    }

    #[tokio::test]
    async fn handler_requires_a_miner_address() {
        let (api, _pool, _chain, _verifier) = test_api(MINER_DIFF);
        let call = RpcMethodCall::new(Id::Number(1), "eth_ping", vec![]);
        let response = api.on_call(call, RequestMeta::default()).await;
        assert_eq!(response.error().unwrap().code.code(), -32602);
    }
}
