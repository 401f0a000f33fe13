//! Chain and verifier stand-ins for tests

use crate::eth::{
    client::{ChainApi, ChainError, ChainResult},
    types::{address_hex, Block, Transaction},
    verify::WorkVerifier,
};
use ethereum_types::{Address, U256};
use ethpool_rpc::{
    hex,
    request::RpcMethodCall,
    response::{ResponseResult, RpcResponse},
};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct MockState {
    block_number: u64,
    transaction_count: u64,
    transactions_confirmed: bool,
    unreachable: bool,
    work: Option<(U256, U256, U256)>,
    raw_calls: Vec<String>,
}

/// In-memory [ChainApi] with scriptable chain height and confirmation state
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(block_number: u64) -> Self {
        let chain = Self::default();
        chain.set_block_number(block_number);
        chain
    }

    pub fn set_block_number(&self, number: u64) {
        self.state.lock().block_number = number;
    }

    pub fn set_transactions_confirmed(&self, confirmed: bool) {
        self.state.lock().transactions_confirmed = confirmed;
    }

    /// Simulates the node dropping off the network
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    fn check_reachable(&self) -> ChainResult<()> {
        if self.state.lock().unreachable {
            return Err(ChainError::Upstream("node unreachable".to_string()));
        }
        Ok(())
    }

    /// The `[header, seed, target]` triple served for `eth_getWork`
    pub fn set_work(&self, header: U256, seed: U256, target: U256) {
        self.state.lock().work = Some((header, seed, target));
    }

    /// Number of transactions submitted through [ChainApi::send_transaction]
    pub fn sent_count(&self) -> u64 {
        self.state.lock().transaction_count
    }

    /// Methods that were forwarded through [ChainApi::raw_call]
    pub fn forwarded(&self) -> Vec<String> {
        self.state.lock().raw_calls.clone()
    }
}

#[async_trait::async_trait]
impl ChainApi for MockChain {
    async fn raw_call(&self, call: RpcMethodCall) -> ChainResult<RpcResponse> {
        let mut state = self.state.lock();
        state.raw_calls.push(call.method.clone());
        let id = call.id();
        match call.method.as_str() {
            "eth_getWork" => {
                let (header, seed, target) = state
                    .work
                    .ok_or_else(|| ChainError::Upstream("no work available".to_string()))?;
                Ok(RpcResponse::new(
                    id,
                    ResponseResult::success(vec![
                        hex::to_hex(header, 64),
                        hex::to_hex(seed, 64),
                        hex::to_hex(target, 64),
                    ]),
                ))
            }
            _ => Ok(RpcResponse::new(id, ResponseResult::success(true))),
        }
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        value: U256,
        nonce: Option<u64>,
    ) -> ChainResult<Transaction> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        let nonce = nonce.unwrap_or(state.transaction_count + 1);
        state.transaction_count += 1;
        Ok(Transaction {
            hash: hex::to_hex(U256::from(nonce), 40),
            from: address_hex(&from),
            to: address_hex(&to),
            value: value.to_string(),
            nonce: hex::to_hex(U256::from(nonce), 0),
            block_number: format!("{}", state.block_number),
            timestamp: String::new(),
        })
    }

    async fn get_block_by_number(&self, number: u64, _full: bool) -> ChainResult<Option<Block>> {
        Ok(Some(Block {
            number: hex::to_hex(U256::from(number), 0),
            hash: "0x1234567890123456789012345678901234567890".to_string(),
            parent_hash: "0x0987654321098765432109876543210987654321".to_string(),
            nonce: "0x8888444422221111".to_string(),
            miner: "0x1111111111222222222233333333334444444444".to_string(),
            difficulty: "0x442211".to_string(),
            timestamp: "0x55e67c30".to_string(),
            transactions: Vec::new(),
            uncles: Vec::new(),
        }))
    }

    async fn get_transaction_by_hash(&self, hash: U256) -> ChainResult<Option<Transaction>> {
        self.check_reachable()?;
        let state = self.state.lock();
        Ok(Some(Transaction {
            hash: hex::to_hex(hash, 40),
            from: "0x1111111111222222222233333333334444444444".to_string(),
            to: "0x4444444444333333333322222222221111111111".to_string(),
            value: "0x10".to_string(),
            nonce: String::new(),
            block_number: if state.transactions_confirmed {
                "0x30".to_string()
            } else {
                String::new()
            },
            timestamp: String::new(),
        }))
    }

    async fn get_block_number(&self) -> ChainResult<u64> {
        self.check_reachable()?;
        Ok(self.state.lock().block_number)
    }

    async fn get_coinbase(&self) -> ChainResult<Address> {
        Ok(Address::from_low_u64_be(0x12345))
    }

    async fn get_balance_of(&self, _address: Address) -> ChainResult<U256> {
        Ok(U256::from(88_888u64))
    }

    async fn get_transaction_count(&self, _address: Address) -> ChainResult<u64> {
        self.check_reachable()?;
        Ok(self.state.lock().transaction_count + 1)
    }
}

/// Verifier that accepts any solution whose target difficulty does not
/// exceed the configured solution quality
pub struct MockVerifier {
    quality: Mutex<U256>,
}

impl MockVerifier {
    pub fn new(quality: U256) -> Self {
        Self { quality: Mutex::new(quality) }
    }

    pub fn set_quality(&self, quality: U256) {
        *self.quality.lock() = quality;
    }
}

#[async_trait::async_trait]
impl WorkVerifier for MockVerifier {
    async fn verify(
        &self,
        _block_number: u64,
        _header_hash: U256,
        _mix_hash: U256,
        _nonce: U256,
        difficulty: U256,
    ) -> bool {
        difficulty <= *self.quality.lock()
    }
}
