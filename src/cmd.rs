use crate::config::PoolConfig;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Clone, Debug, Parser)]
#[clap(name = "ethpool", about = "Ethereum mining pool proxy")]
pub struct PoolArgs {
    #[clap(long, help = "Enable the miner-facing pool proxy")]
    pub pool: bool,

    #[clap(long, help = "Enable the block chain scanner")]
    pub scanner: bool,

    #[clap(long, help = "Enable the payment component")]
    pub pay: bool,

    #[clap(long, help = "Enable web backend communication")]
    pub web: bool,

    #[clap(long, help = "Enable all features")]
    pub all: bool,

    #[clap(long, value_name = "FILE", help = "write cpu profile to file")]
    pub cpuprofile: Option<PathBuf>,

    #[clap(long, short, default_value = "8080", help = "Port for the miner-facing RPC")]
    pub port: u16,

    #[clap(
        long,
        default_value = "http://127.0.0.1:8545",
        help = "Endpoint of the upstream chain node"
    )]
    pub chain_url: String,

    #[clap(
        long,
        default_value = "http://127.0.0.1:8081",
        help = "Endpoint of the PoW verifier"
    )]
    pub verifier_url: String,

    #[clap(
        long,
        default_value = "http://127.0.0.1:9999",
        help = "Endpoint of the accounting backend"
    )]
    pub backend_url: String,
}

// === impl PoolArgs ===

impl PoolArgs {
    pub fn into_config(self) -> PoolConfig {
        let mut config = PoolConfig::default()
            .with_listen_port(self.port)
            .with_chain_url(self.chain_url)
            .with_verifier_url(self.verifier_url)
            .with_backend_url(self.backend_url);
        config.enable_pool = self.pool || self.all;
        config.enable_scanner = self.scanner || self.all;
        config.enable_pay = self.pay || self.all;
        config.enable_web = self.web || self.all;
        config
    }

    /// Starts the configured subsystems and runs until interrupted
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(profile) = &self.cpuprofile {
            warn!(
                "--cpuprofile {} requested; profile with external tooling instead",
                profile.display()
            );
        }

        info!("starting...");
        let mut handle = crate::spawn(self.into_config()).await?;

        tokio::signal::ctrl_c().await?;
        info!("exiting");
        handle.shutdown();
        handle.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_flag_enables_every_subsystem() {
        let args = PoolArgs::parse_from(["ethpool", "--all"]);
        let config = args.into_config();
        assert!(config.enable_pool);
        assert!(config.enable_scanner);
        assert!(config.enable_pay);
        assert!(config.enable_web);
    }

    #[test]
    fn subsystems_toggle_independently() {
        let args = PoolArgs::parse_from(["ethpool", "--pool", "--port", "9001"]);
        let config = args.into_config();
        assert!(config.enable_pool);
        assert!(!config.enable_pay);
        assert!(!config.enable_scanner);
        assert_eq!(config.listen_port, 9001);
    }
}
