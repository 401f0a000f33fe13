//! ethpool: a mining-pool proxy between many miners and one Ethereum node
//!
//! Three cooperating subsystems share one process: the miner-facing proxy
//! with its share engine and vardiff, the chain scanner that indexes
//! confirmed blocks into the record store, and the payment engine that
//! keeps outbound payouts alive until they harden on-chain.

use crate::{
    accounting::AccountingClient,
    config::PoolConfig,
    eth::{
        client::{ChainApi, ChainClient},
        verify::{VerifierClient, WorkVerifier},
    },
    payment::{
        listeners::{StorePaymentListener, WebPaymentListener},
        rpc::PaymentRpc,
        PaymentEngine,
    },
    pool::{api::PoolApi, MinerPool},
    scanner::{
        indexer::{BalanceUpdater, StoreIndexer},
        ChainScanner,
    },
    shutdown::{Shutdown, ShutdownFlag, Signal},
    store::{MemoryStore, RecordStore},
};
use axum::{extract::Extension, routing::post, Json, Router, Server};
use ethereum_types::U256;
use serde::Deserialize;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod accounting;
pub mod config;
pub mod eth;
pub mod payment;
pub mod persist;
pub mod pool;
pub mod scanner;
pub mod shutdown;
pub mod store;

/// contains cli command
#[cfg(feature = "cli")]
pub mod cmd;

/// Creates every enabled subsystem and runs them as background tasks.
///
/// Returns a [PoolHandle] whose [PoolHandle::shutdown] stops the loops and
/// servers; await [PoolHandle::wait] for everything to drain.
pub async fn spawn(config: PoolConfig) -> io::Result<PoolHandle> {
    let config = Arc::new(config);
    let (signal, shutdown) = shutdown::signal();
    let flag = shutdown.flag();

    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::default());
    let chain: Arc<dyn ChainApi> = Arc::new(ChainClient::new(&config.chain_url));
    let accounting = config.enable_web.then(|| AccountingClient::new(&config.backend_url));

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut scanner = ChainScanner::new(chain.clone(), config.clone());

    if config.enable_scanner {
        scanner.register_pending(Box::new(StoreIndexer::new(store.clone())));
        info!("registered block processor");
    }

    if config.enable_pay {
        // informational watcher for blocks the pool itself mined
        let coinbase = chain.get_coinbase().await.ok();
        scanner.register(Box::new(BalanceUpdater::new(coinbase)));

        let mut engine = PaymentEngine::new(chain.clone(), config.clone())?;
        engine.register_listener(Box::new(StorePaymentListener::new(store.clone())));
        info!("registered record-store payment listener");
        if let Some(accounting) = &accounting {
            engine.register_listener(Box::new(WebPaymentListener::new(accounting.clone())));
            info!("registered web payment listener");
        }
        let engine = Arc::new(engine);

        let pay_addr = SocketAddr::from(([0, 0, 0, 0], config.pay_rpc_port));
        let handler = PaymentRpc::new(engine.clone(), flag.clone());
        let pay_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = ethpool_server::serve_http(pay_addr, handler, pay_shutdown).await {
                error!(target: "pay", "payment rpc server failed: {err}");
            }
        }));
        tasks.push(tokio::spawn(engine.run(shutdown.clone())));
    }

    tasks.push(tokio::spawn(scanner.run(shutdown.clone())));

    if config.enable_pool {
        let pool = Arc::new(MinerPool::new(config.clone(), Some(store.clone())));
        let verifier: Arc<dyn WorkVerifier> =
            Arc::new(VerifierClient::new(&config.verifier_url));
        let api = PoolApi::new(
            pool.clone(),
            chain.clone(),
            verifier,
            accounting.clone(),
            config.clone(),
            flag.clone(),
        );

        let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
        let pool_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = ethpool_server::serve_http(listen_addr, api, pool_shutdown).await {
                error!(target: "pool", "miner rpc server failed: {err}");
            }
        }));

        let secret_addr = SocketAddr::from(([0, 0, 0, 0], config.secret_port));
        tasks.push(tokio::spawn(serve_secret(
            secret_addr,
            pool.clone(),
            accounting.clone(),
            shutdown.clone(),
        )));

        tasks.push(tokio::spawn(pool.run(accounting, shutdown)));
        info!("pool listening on {listen_addr}");
    }

    Ok(PoolHandle { signal: Some(signal), tasks })
}

/// A handle to the spawned subsystems
pub struct PoolHandle {
    signal: Option<Signal>,
    tasks: Vec<JoinHandle<()>>,
}

// === impl PoolHandle ===

impl PoolHandle {
    /// Fires the shutdown signal; loops evict and drain on their next
    /// iteration boundary
    pub fn shutdown(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.fire();
        }
    }

    /// Waits for every background task to finish
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Legacy balance-distribution command: `{"magic": <ether>}` splits that
/// many ether over the miners' hash counts and resets the counters
#[derive(Debug, Deserialize)]
struct SecretCommand {
    magic: f64,
}

#[derive(Clone)]
struct SecretContext {
    pool: Arc<MinerPool>,
    accounting: Option<AccountingClient>,
    shutdown: ShutdownFlag,
}

async fn handle_secret(
    Extension(ctx): Extension<SecretContext>,
    Json(command): Json<SecretCommand>,
) {
    if ctx.shutdown.is_set() {
        return;
    }
    info!(target: "pool", magic = command.magic, "legacy balance distribution requested");
    let value = U256::from(command.magic.max(0.0) as u64) * U256::exp10(18);
    let updates = ctx.pool.divvy(value);
    if let Some(accounting) = ctx.accounting {
        tokio::spawn(async move {
            accounting.add_ether(updates).await;
        });
    }
    ctx.pool.reset_hash_counts();
}

async fn serve_secret(
    addr: SocketAddr,
    pool: Arc<MinerPool>,
    accounting: Option<AccountingClient>,
    shutdown: Shutdown,
) {
    let ctx = SecretContext { pool, accounting, shutdown: shutdown.flag() };
    let app = Router::new()
        .route("/", post(handle_secret))
        .layer(Extension(ctx))
        .layer(tower_http::trace::TraceLayer::new_for_http());
    let server = Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown);
    if let Err(err) = server.await {
        error!(target: "pool", "secret endpoint failed: {err}");
    }
}

/// Installs the `tracing` subscriber the binary runs with
pub fn init_tracing() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
