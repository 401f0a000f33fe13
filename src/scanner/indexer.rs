//! Record-store block indexing

use crate::{
    eth::types::{Account, Block},
    scanner::{BlockProcessor, PendingBlockProcessor, ProcessorResult},
    store::{RecordStore, RecordStoreExt},
};
use ethereum_types::Address;
use std::{collections::HashMap, sync::Arc};
use tracing::{error, info, warn};

/// Indexes confirmed blocks, transactions and per-account history into the
/// record store. Accounts are cached for the duration of a tick and flushed
/// at commit; the `pending_*` shadow tables are wiped at the start of every
/// tick and rebuilt from the unconfirmed tail.
pub struct StoreIndexer {
    store: Arc<dyn RecordStore>,
    cache: HashMap<String, Account>,
}

// === impl StoreIndexer ===

impl StoreIndexer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store, cache: HashMap::new() }
    }

    /// Cached account lookup backed by the main `accounts` table
    fn account_mut(&mut self, address: &str) -> &mut Account {
        let store = &self.store;
        self.cache.entry(address.to_string()).or_insert_with(|| {
            store.get::<Account>(address).unwrap_or_else(|_| Account::new(address))
        })
    }

    /// Uncached account lookup against the pending shadow table
    fn pending_account(&self, address: &str) -> Account {
        self.store
            .get_from::<Account>("pending_accounts", address)
            .unwrap_or_else(|_| Account::new(address))
    }

    fn flush_cache(&mut self) -> ProcessorResult<()> {
        for account in self.cache.values_mut() {
            account.truncate_history();
            if let Err(err) = self.store.update(&*account) {
                error!(target: "scanner", address = %account.address, "could not update account: {err}");
                return Err(err.into());
            }
        }
        self.cache.clear();
        Ok(())
    }
}

impl BlockProcessor for StoreIndexer {
    fn begin_processing(&mut self) -> ProcessorResult<()> {
        self.store.connect()?;
        for table in ["pending_blocks", "pending_transactions", "pending_accounts"] {
            if let Err(err) = self.store.drop_table(table) {
                warn!(target: "scanner", table, "could not drop shadow table: {err}");
            }
        }
        Ok(())
    }

    fn add_block(&mut self, block: &Block) {
        if let Err(err) = self.store.add(block) {
            warn!(target: "scanner", "error adding block to store: {err}");
        }

        self.account_mut(&block.miner).mined.push(block.number.clone());

        for txn in &block.transactions {
            if let Err(err) = self.store.add(txn) {
                warn!(target: "scanner", "error adding transaction to store: {err}");
            }
            self.account_mut(&txn.from).outgoing.push(txn.clone());
            self.account_mut(&txn.to).incoming.push(txn.clone());
        }
    }

    fn commit(&mut self) -> ProcessorResult<()> {
        self.flush_cache()
    }

    fn end_processing(&mut self) -> ProcessorResult<()> {
        self.flush_cache()?;
        self.store.disconnect()?;
        Ok(())
    }
}

impl PendingBlockProcessor for StoreIndexer {
    fn add_pending_block(&mut self, block: &Block) -> ProcessorResult<()> {
        self.store.add_to("pending_blocks", block)?;

        let mut miner = self.pending_account(&block.miner);
        miner.mined.push(block.number.clone());
        self.store.update_to("pending_accounts", &miner)?;

        for txn in &block.transactions {
            if let Err(err) = self.store.add_to("pending_transactions", txn) {
                warn!(target: "scanner", "error adding pending transaction: {err}");
            }

            let mut from = self.pending_account(&txn.from);
            from.outgoing.push(txn.clone());
            if let Err(err) = self.store.update_to("pending_accounts", &from) {
                warn!(target: "scanner", "error updating sender account: {err}");
            }

            let mut to = self.pending_account(&txn.to);
            to.incoming.push(txn.clone());
            if let Err(err) = self.store.update_to("pending_accounts", &to) {
                warn!(target: "scanner", "error updating recipient account: {err}");
            }
        }
        Ok(())
    }
}

/// Watches for blocks mined by the pool itself. Informational: the legacy
/// per-block distribution moved to the backend, so this only reports.
pub struct BalanceUpdater {
    coinbase: Option<Address>,
    cache: Vec<Block>,
}

// === impl BalanceUpdater ===

impl BalanceUpdater {
    pub fn new(coinbase: Option<Address>) -> Self {
        Self { coinbase, cache: Vec::new() }
    }
}

impl BlockProcessor for BalanceUpdater {
    fn begin_processing(&mut self) -> ProcessorResult<()> {
        Ok(())
    }

    fn add_block(&mut self, block: &Block) {
        self.cache.push(block.clone());
    }

    fn commit(&mut self) -> ProcessorResult<()> {
        let coinbase = match self.coinbase {
            Some(coinbase) => coinbase,
            None => {
                self.cache.clear();
                return Ok(());
            }
        };
        for block in self.cache.drain(..) {
            if block.miner_address() == Some(coinbase) {
                info!(target: "scanner", number = %block.number, "pool mined this block");
            }
        }
        Ok(())
    }

    fn end_processing(&mut self) -> ProcessorResult<()> {
        Ok(())
    }
}
