//! Chain catch-up scanner
//!
//! Walks confirmed blocks from a persisted cursor up to `head − 8`, fanning
//! each block out to the registered processors, then feeds the unconfirmed
//! tail to the processors that opted into it. The cursor is persisted at
//! every commit and never regresses.

pub mod indexer;

use crate::{
    config::PoolConfig,
    eth::{client::ChainApi, types::Block},
    persist::FilePersist,
    shutdown::Shutdown,
    store::StoreError,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Other(String),
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Consumer of confirmed blocks
pub trait BlockProcessor: Send {
    /// Called once per scanner tick before any block is delivered; a failure
    /// skips the whole tick
    fn begin_processing(&mut self) -> ProcessorResult<()>;

    fn add_block(&mut self, block: &Block);

    /// Flushes whatever the processor buffered
    fn commit(&mut self) -> ProcessorResult<()>;

    fn end_processing(&mut self) -> ProcessorResult<()>;
}

/// A [BlockProcessor] that also wants to see the unconfirmed tail
pub trait PendingBlockProcessor: BlockProcessor {
    fn add_pending_block(&mut self, block: &Block) -> ProcessorResult<()>;
}

/// Registration wrapper; whether a processor sees pending blocks is decided
/// at registration time, not probed at runtime
pub enum RegisteredProcessor {
    Confirmed(Box<dyn BlockProcessor>),
    WithPending(Box<dyn PendingBlockProcessor>),
}

impl RegisteredProcessor {
    fn begin(&mut self) -> ProcessorResult<()> {
        match self {
            RegisteredProcessor::Confirmed(p) => p.begin_processing(),
            RegisteredProcessor::WithPending(p) => p.begin_processing(),
        }
    }

    fn add(&mut self, block: &Block) {
        match self {
            RegisteredProcessor::Confirmed(p) => p.add_block(block),
            RegisteredProcessor::WithPending(p) => p.add_block(block),
        }
    }

    fn commit(&mut self) -> ProcessorResult<()> {
        match self {
            RegisteredProcessor::Confirmed(p) => p.commit(),
            RegisteredProcessor::WithPending(p) => p.commit(),
        }
    }

    fn end(&mut self) -> ProcessorResult<()> {
        match self {
            RegisteredProcessor::Confirmed(p) => p.end_processing(),
            RegisteredProcessor::WithPending(p) => p.end_processing(),
        }
    }
}

/// Catch-up-and-tail loop over the chain node
pub struct ChainScanner {
    chain: Arc<dyn ChainApi>,
    config: Arc<PoolConfig>,
    persist: FilePersist,
    last_processed_block: i64,
    processors: Vec<RegisteredProcessor>,
}

// === impl ChainScanner ===

impl ChainScanner {
    pub fn new(chain: Arc<dyn ChainApi>, config: Arc<PoolConfig>) -> Self {
        let persist = FilePersist::new(&config.block_persist_file);
        let last_processed_block = if persist.exists() {
            match persist.read::<i64>() {
                Ok(cursor) => {
                    let cursor = cursor.max(config.min_processed_block);
                    info!(target: "scanner", cursor, "loaded block persistence");
                    cursor
                }
                Err(err) => {
                    error!(target: "scanner", "corrupted block cursor, starting at floor: {err}");
                    config.min_processed_block
                }
            }
        } else {
            if let Err(err) = persist.write(&config.min_processed_block) {
                warn!(target: "scanner", "could not seed block cursor: {err}");
            }
            config.min_processed_block
        };
        Self { chain, config, persist, last_processed_block, processors: Vec::new() }
    }

    pub fn register(&mut self, processor: Box<dyn BlockProcessor>) {
        self.processors.push(RegisteredProcessor::Confirmed(processor));
    }

    pub fn register_pending(&mut self, processor: Box<dyn PendingBlockProcessor>) {
        self.processors.push(RegisteredProcessor::WithPending(processor));
    }

    pub fn last_processed_block(&self) -> i64 {
        self.last_processed_block
    }

    /// Flushes every processor and, only when all of them succeeded,
    /// persists the cursor. A failed flush leaves the persisted cursor at
    /// its last good value so the unflushed blocks are walked again.
    fn commit_all(&mut self) -> bool {
        let mut all_ok = true;
        for processor in &mut self.processors {
            if let Err(err) = processor.commit() {
                error!(target: "scanner", "processor commit failed: {err}");
                all_ok = false;
            }
        }
        if !all_ok {
            error!(
                target: "scanner",
                cursor = self.last_processed_block,
                "cursor not persisted after failed commit"
            );
            return false;
        }
        if let Err(err) = self.persist.write(&self.last_processed_block) {
            error!(target: "scanner", "could not persist block cursor: {err}");
            return false;
        }
        true
    }

    /// One scanner tick: catch up confirmed blocks, then the pending tail
    pub async fn update_new_blocks(&mut self, shutdown: &crate::shutdown::ShutdownFlag) {
        let head = match self.chain.get_block_number().await {
            Ok(head) => head as i64,
            Err(err) => {
                warn!(target: "scanner", "could not get current block number: {err}");
                return;
            }
        };
        // stay clear of the reorg window
        let confirmed = head - self.config.confirmation_depth as i64;

        for processor in &mut self.processors {
            if let Err(err) = processor.begin() {
                warn!(target: "scanner", "error beginning block processing: {err}; skipping block update");
                return;
            }
        }

        while self.last_processed_block < confirmed && !shutdown.is_set() {
            let number = self.last_processed_block;
            let block = match self.chain.get_block_by_number(number as u64, true).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    warn!(target: "scanner", number, "block not available yet");
                    break;
                }
                Err(err) => {
                    warn!(target: "scanner", number, "could not fetch block: {err}");
                    break;
                }
            };

            if confirmed - number > 10 {
                if number % 500 == 0 {
                    info!(target: "scanner", number, "processing block");
                }
            } else {
                info!(target: "scanner", number, "processing block");
            }

            for processor in &mut self.processors {
                processor.add(&block);
            }

            if number % 1000 == 0 && !self.commit_all() {
                warn!(target: "scanner", number, "halting catch-up until the store recovers");
                break;
            }
            self.last_processed_block += 1;
        }

        for number in self.last_processed_block..head {
            let block = match self.chain.get_block_by_number(number as u64, true).await {
                Ok(Some(block)) => block,
                _ => continue,
            };
            for processor in &mut self.processors {
                if let RegisteredProcessor::WithPending(processor) = processor {
                    if let Err(err) = processor.add_pending_block(&block) {
                        warn!(target: "scanner", number, "pending block processing failed: {err}");
                    }
                }
            }
        }

        self.commit_all();
        for processor in &mut self.processors {
            if let Err(err) = processor.end() {
                warn!(target: "scanner", "error ending block processing: {err}");
            }
        }
    }

    /// Drives the scanner until shutdown
    pub async fn run(mut self, shutdown: Shutdown) {
        let flag = shutdown.flag();

        // wait for the node to answer before scanning
        loop {
            if flag.is_set() {
                return;
            }
            match self.chain.get_balance().await {
                Ok(balance) => {
                    info!(target: "scanner", %balance, "initial coinbase balance");
                    break;
                }
                Err(err) => {
                    warn!(target: "scanner", "unable to get initial balance: {err}");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                        _ = shutdown.clone() => return,
                    }
                }
            }
        }

        loop {
            if flag.is_set() {
                break;
            }
            self.update_new_blocks(&flag).await;
            if flag.is_set() {
                break;
            }
            if let Ok(balance) = self.chain.get_balance().await {
                info!(target: "scanner", %balance, "coinbase balance");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.balance_poll_time) => {}
                _ = shutdown.clone() => break,
            }
        }
        info!(target: "scanner", "closed status poll");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::mock::MockChain;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorded {
        begins: usize,
        commits: usize,
        ends: usize,
        fail_commit: bool,
        blocks: Vec<u64>,
        pending: Vec<u64>,
    }

    #[derive(Clone, Default)]
    struct RecordingProcessor {
        seen: Arc<Mutex<Recorded>>,
        fail_begin: bool,
    }

    impl BlockProcessor for RecordingProcessor {
        fn begin_processing(&mut self) -> ProcessorResult<()> {
            if self.fail_begin {
                return Err(ProcessorError::Other("down".to_string()));
            }
            self.seen.lock().begins += 1;
            Ok(())
        }

        fn add_block(&mut self, block: &Block) {
            self.seen.lock().blocks.push(block.number_value());
        }

        fn commit(&mut self) -> ProcessorResult<()> {
            let mut seen = self.seen.lock();
            if seen.fail_commit {
                return Err(ProcessorError::Other("store down".to_string()));
            }
            seen.commits += 1;
            Ok(())
        }

        fn end_processing(&mut self) -> ProcessorResult<()> {
            self.seen.lock().ends += 1;
            Ok(())
        }
    }

    impl PendingBlockProcessor for RecordingProcessor {
        fn add_pending_block(&mut self, block: &Block) -> ProcessorResult<()> {
            self.seen.lock().pending.push(block.number_value());
            Ok(())
        }
    }

    fn scanner_config(dir: &tempfile::TempDir, cursor: i64) -> Arc<PoolConfig> {
        let mut config = PoolConfig::default();
        config.block_persist_file = dir.path().join("block.last");
        config.min_processed_block = cursor;
        Arc::new(config)
    }

    #[tokio::test]
    async fn catches_up_to_the_confirmed_tip_and_tails_pending() {
        let dir = tempfile::tempdir().unwrap();
        let config = scanner_config(&dir, 100);
        let chain = Arc::new(MockChain::new(120));

        let confirmed = RecordingProcessor::default();
        let pending = RecordingProcessor::default();
        let confirmed_seen = confirmed.seen.clone();
        let pending_seen = pending.seen.clone();

        let mut scanner = ChainScanner::new(chain, config);
        scanner.register(Box::new(confirmed));
        scanner.register_pending(Box::new(pending));

        scanner.update_new_blocks(&crate::shutdown::ShutdownFlag::default()).await;

        // confirmed tip = 120 - 8 = 112
        assert_eq!(scanner.last_processed_block(), 112);
        let confirmed = confirmed_seen.lock();
        assert_eq!(confirmed.blocks, (100..112).collect::<Vec<u64>>());
        // plain processors never see the pending tail
        assert!(confirmed.pending.is_empty());
        let pending = pending_seen.lock();
        assert_eq!(pending.blocks, (100..112).collect::<Vec<u64>>());
        assert_eq!(pending.pending, (112..120).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn cursor_survives_restart_and_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let config = scanner_config(&dir, 100);
        let chain = Arc::new(MockChain::new(120));

        let mut scanner = ChainScanner::new(chain.clone(), config.clone());
        let processor = RecordingProcessor::default();
        let seen = processor.seen.clone();
        scanner.register(Box::new(processor));
        scanner.update_new_blocks(&crate::shutdown::ShutdownFlag::default()).await;
        assert_eq!(scanner.last_processed_block(), 112);
        drop(scanner);

        // restarting with the same chain reprocesses nothing
        let mut scanner = ChainScanner::new(chain, config);
        let restarted = RecordingProcessor::default();
        let restarted_seen = restarted.seen.clone();
        scanner.register(Box::new(restarted));
        assert_eq!(scanner.last_processed_block(), 112);
        scanner.update_new_blocks(&crate::shutdown::ShutdownFlag::default()).await;
        assert_eq!(scanner.last_processed_block(), 112);
        assert!(restarted_seen.lock().blocks.is_empty());
        assert_eq!(seen.lock().blocks, (100..112).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn failed_commit_neither_persists_nor_advances_past_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let config = scanner_config(&dir, 995);
        let chain = Arc::new(MockChain::new(1020));

        let processor = RecordingProcessor::default();
        let seen = processor.seen.clone();
        seen.lock().fail_commit = true;

        let mut scanner = ChainScanner::new(chain.clone(), config.clone());
        scanner.register(Box::new(processor));
        scanner.update_new_blocks(&crate::shutdown::ShutdownFlag::default()).await;

        // catch-up halted at the failed checkpoint commit
        assert_eq!(scanner.last_processed_block(), 1000);
        assert_eq!(seen.lock().blocks, (995..=1000).collect::<Vec<u64>>());
        // the persisted cursor still reads the last good value
        let restarted = ChainScanner::new(chain.clone(), config.clone());
        assert_eq!(restarted.last_processed_block(), 995);

        // the store recovers; the walk finishes and the cursor lands
        seen.lock().fail_commit = false;
        scanner.update_new_blocks(&crate::shutdown::ShutdownFlag::default()).await;
        assert_eq!(scanner.last_processed_block(), 1012);
        let restarted = ChainScanner::new(chain, config);
        assert_eq!(restarted.last_processed_block(), 1012);
    }

    #[tokio::test]
    async fn failed_begin_skips_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let config = scanner_config(&dir, 100);
        let chain = Arc::new(MockChain::new(120));

        let processor = RecordingProcessor { fail_begin: true, ..Default::default() };
        let seen = processor.seen.clone();
        let mut scanner = ChainScanner::new(chain, config);
        scanner.register(Box::new(processor));
        scanner.update_new_blocks(&crate::shutdown::ShutdownFlag::default()).await;

        assert_eq!(scanner.last_processed_block(), 100);
        assert!(seen.lock().blocks.is_empty());
    }
}
