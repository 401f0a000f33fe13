//! Reliable outbound payments
//!
//! The chain node's payments are fire-and-forget; this engine makes them
//! reliable. Every requested transfer lives in a persisted pending map until
//! it has been observed on-chain with eight confirmations, getting resent
//! with a fresh nonce whenever it goes stale.

pub mod listeners;
pub mod rpc;

use crate::{
    config::PoolConfig,
    eth::{client::ChainApi, types::Transaction},
    payment::listeners::PaymentListener,
    persist::FilePersist,
    shutdown::Shutdown,
};
use ethereum_types::{Address, U256};
use ethpool_rpc::hex;
use std::{collections::HashMap, io, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A payment in flight
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingPayment {
    /// correlation id handed to us by the requester
    pub id: String,
    /// chain block at which the current attempt was issued; `0` means the
    /// transfer never went out successfully
    pub block_sent: u64,
    pub transaction: Transaction,
}

/// Where a pending payment stands this tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentState {
    /// never sent
    Unsent,
    /// an attempt was recorded but no usable hash came back
    Invalid,
    /// sent long enough ago that it should have hardened by now
    StalePending,
    /// sent recently; give the chain time
    Waiting,
}

// === impl PendingPayment ===

impl PendingPayment {
    /// Classifies the payment against the newest hardened block
    pub fn state(&self, last_confirmed: u64) -> PaymentState {
        if self.block_sent == 0 {
            PaymentState::Unsent
        } else if self.transaction.hash_value().is_zero() {
            PaymentState::Invalid
        } else if self.block_sent < last_confirmed {
            PaymentState::StalePending
        } else {
            PaymentState::Waiting
        }
    }

    fn endpoints(&self) -> Option<(Address, Address)> {
        Some((self.transaction.from_address()?, self.transaction.to_address()?))
    }
}

struct EngineState {
    pending: HashMap<String, PendingPayment>,
    /// next-nonce cursor; re-seeded from the chain node's pending count,
    /// which is only sound while this process is the coinbase's sole writer
    current_nonce: u64,
}

/// Nonce-managed outbound transaction queue
pub struct PaymentEngine {
    chain: Arc<dyn ChainApi>,
    config: Arc<PoolConfig>,
    persist: FilePersist,
    listeners: Vec<Box<dyn PaymentListener>>,
    inner: Mutex<EngineState>,
}

// === impl PaymentEngine ===

impl PaymentEngine {
    /// Creates the engine, rehydrating the pending map from disk
    pub fn new(chain: Arc<dyn ChainApi>, config: Arc<PoolConfig>) -> io::Result<Self> {
        let persist = FilePersist::new(&config.pay_persist_file);
        let pending: HashMap<String, PendingPayment> = if persist.exists() {
            persist.read()?
        } else {
            let empty = HashMap::new();
            persist.write(&empty)?;
            empty
        };
        if !pending.is_empty() {
            info!(target: "pay", count = pending.len(), "rehydrated pending payments");
        }
        Ok(Self {
            chain,
            config,
            persist,
            listeners: Vec::new(),
            inner: Mutex::new(EngineState { pending, current_nonce: 0 }),
        })
    }

    /// Registers a side-effect listener; call before the engine starts
    pub fn register_listener(&mut self, listener: Box<dyn PaymentListener>) {
        self.listeners.push(listener);
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Allocates the next nonce: the internal cursor advances by one and
    /// adopts the chain node's pending transaction count when that is ahead
    async fn next_nonce(&self, state: &mut EngineState) -> Result<u64, crate::eth::client::ChainError> {
        let coinbase = self.chain.get_coinbase().await?;
        let on_chain = self.chain.get_transaction_count(coinbase).await?;
        state.current_nonce += 1;
        if on_chain > state.current_nonce {
            state.current_nonce = on_chain;
        }
        Ok(state.current_nonce)
    }

    fn persist_pending(&self, state: &EngineState) -> io::Result<()> {
        self.persist.write(&state.pending)
    }

    fn notify(&self, payment: &PendingPayment, event: fn(&dyn PaymentListener, &PendingPayment)) {
        for listener in &self.listeners {
            event(listener.as_ref(), payment);
        }
    }

    /// Queues a transfer. The entry lands in the pending map under a fresh
    /// random key so a retried request cannot collide with the outstanding
    /// entry, and is persisted before the call returns.
    pub async fn add_payment(
        &self,
        id: &str,
        from: Address,
        to: Address,
        value: U256,
    ) -> io::Result<()> {
        let mut state = self.inner.lock().await;
        let payment = PendingPayment {
            id: id.to_string(),
            block_sent: 0,
            transaction: Transaction {
                hash: "0x0".to_string(),
                from: crate::eth::types::address_hex(&from),
                to: crate::eth::types::address_hex(&to),
                value: hex::to_hex(value, 0),
                ..Default::default()
            },
        };
        self.notify(&payment, |l, p| l.payment_added(p));

        let mut key = Uuid::new_v4().to_string();
        while state.pending.contains_key(&key) {
            warn!(target: "pay", "pending key collision; very unlikely");
            key = Uuid::new_v4().to_string();
        }
        state.pending.insert(key, payment);
        self.persist_pending(&state)
    }

    /// One pass over the pending map. Chain failures leave entries untouched
    /// for the next tick; persistence failures are loud.
    pub async fn update(&self) {
        let mut state = self.inner.lock().await;

        let last_confirmed = match self.chain.get_last_confirmed_block_number().await {
            Ok(number) => number,
            Err(err) => {
                warn!(target: "pay", "error getting last confirmed block: {err}");
                return;
            }
        };
        let current_block = match self.chain.get_block_number().await {
            Ok(number) => number,
            Err(err) => {
                warn!(target: "pay", "error getting block number: {err}");
                return;
            }
        };

        let keys: Vec<String> = state.pending.keys().cloned().collect();
        for key in keys {
            let payment = match state.pending.get(&key) {
                Some(payment) => payment.clone(),
                None => continue,
            };
            match payment.state(last_confirmed) {
                PaymentState::Unsent => {
                    self.send_unsent(&mut state, &key, payment, current_block).await
                }
                PaymentState::Invalid => {
                    self.resend_invalid(&mut state, &key, payment, last_confirmed, current_block)
                        .await
                }
                PaymentState::StalePending => {
                    self.settle_stale(&mut state, &key, payment, current_block).await
                }
                PaymentState::Waiting => {
                    debug!(
                        target: "pay",
                        nonce = %payment.transaction.nonce,
                        block = current_block,
                        wait_block = payment.block_sent + self.config.confirmation_depth,
                        "waiting for hardened block before confirmation"
                    );
                }
            }
        }
    }

    async fn send_unsent(
        &self,
        state: &mut EngineState,
        key: &str,
        mut payment: PendingPayment,
        current_block: u64,
    ) {
        let (from, to) = match payment.endpoints() {
            Some(endpoints) => endpoints,
            None => {
                warn!(target: "pay", id = %payment.id, "pending payment has malformed addresses");
                return;
            }
        };
        let value = payment.transaction.value_amount();
        let nonce = match self.next_nonce(state).await {
            Ok(nonce) => nonce,
            Err(err) => {
                warn!(target: "pay", "could not get new nonce for unsent transaction: {err}");
                return;
            }
        };

        match self.chain.send_transaction(from, to, value, None).await {
            Ok(transaction) => {
                info!(target: "pay", nonce, "found unsent txn; sending now");
                payment.block_sent = current_block;
                payment.transaction = transaction;
                self.notify(&payment, |l, p| l.payment_sent(p));
                state.pending.insert(key.to_string(), payment);
                if let Err(err) = self.persist_pending(state) {
                    tracing::error!(target: "pay", "could not persist pending payments: {err}");
                }
            }
            Err(err) => {
                warn!(target: "pay", "could not send transaction: {err}");
            }
        }
    }

    /// An attempt was recorded but the node never returned a hash. Reuse the
    /// recorded nonce unless the attempt is stale, then send again.
    async fn resend_invalid(
        &self,
        state: &mut EngineState,
        key: &str,
        mut payment: PendingPayment,
        last_confirmed: u64,
        current_block: u64,
    ) {
        let (from, to) = match payment.endpoints() {
            Some(endpoints) => endpoints,
            None => {
                warn!(target: "pay", id = %payment.id, "pending payment has malformed addresses");
                return;
            }
        };
        let value = payment.transaction.value_amount();
        let mut nonce = payment.transaction.nonce_value().low_u64();
        if payment.block_sent < last_confirmed {
            nonce = match self.next_nonce(state).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    warn!(target: "pay", "could not get new nonce for stale invalid txn: {err}");
                    return;
                }
            };
            info!(target: "pay", nonce, "invalid transaction is stale, grabbed new nonce");
        }

        info!(target: "pay", nonce, "found invalid txn; resending");
        match self.chain.send_transaction(from, to, value, None).await {
            Ok(transaction) => {
                payment.block_sent = current_block;
                payment.transaction = transaction;
                self.notify(&payment, |l, p| l.payment_resent(p));
                state.pending.insert(key.to_string(), payment);
                if let Err(err) = self.persist_pending(state) {
                    tracing::error!(target: "pay", "could not persist pending payments: {err}");
                }
            }
            Err(err) => {
                warn!(target: "pay", "could not send invalid transaction: {err}");
            }
        }
    }

    /// The attempt is old enough to have hardened. Either the chain has it
    /// mined, in which case the payment is verified and leaves the map, or
    /// it vanished or still floats, in which case it goes out again with a
    /// fresh nonce.
    async fn settle_stale(
        &self,
        state: &mut EngineState,
        key: &str,
        mut payment: PendingPayment,
        current_block: u64,
    ) {
        let hash = payment.transaction.hash_value();
        let observed = match self.chain.get_transaction_by_hash(hash).await {
            Ok(observed) => observed,
            Err(err) => {
                warn!(target: "pay", "could not look up stale transaction: {err}");
                return;
            }
        };

        match observed {
            Some(transaction) if !transaction.is_pending() => {
                payment.transaction = transaction;
                self.notify(&payment, |l, p| l.payment_verified(p));
                state.pending.remove(key);
                if let Err(err) = self.persist_pending(state) {
                    tracing::error!(target: "pay", "could not persist pending payments: {err}");
                }
                info!(
                    target: "pay",
                    nonce = %payment.transaction.nonce,
                    "found complete txn; adding to records"
                );
            }
            _ => {
                // missing or still floating after the confirmation window
                let (from, to) = match payment.endpoints() {
                    Some(endpoints) => endpoints,
                    None => {
                        warn!(target: "pay", id = %payment.id, "pending payment has malformed addresses");
                        return;
                    }
                };
                let value = payment.transaction.value_amount();
                let nonce = match self.next_nonce(state).await {
                    Ok(nonce) => nonce,
                    Err(err) => {
                        warn!(target: "pay", "could not get a fresh nonce: {err}");
                        return;
                    }
                };
                info!(target: "pay", nonce, "found stale txn; resending");
                match self.chain.send_transaction(from, to, value, None).await {
                    Ok(transaction) => {
                        payment.block_sent = current_block;
                        payment.transaction = transaction;
                        state.pending.insert(key.to_string(), payment);
                        if let Err(err) = self.persist_pending(state) {
                            tracing::error!(target: "pay", "could not persist pending payments: {err}");
                        }
                    }
                    Err(err) => {
                        warn!(target: "pay", "could not resend transaction: {err}");
                    }
                }
            }
        }
    }

    /// Drives the update loop until shutdown
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let flag = shutdown.flag();
        loop {
            if flag.is_set() {
                break;
            }
            self.update().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.pay_wait) => {}
                _ = shutdown.clone() => break,
            }
        }
        info!(target: "pay", "pay server is down");
    }
}
