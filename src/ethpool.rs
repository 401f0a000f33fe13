use clap::Parser;
use ethpool::cmd::PoolArgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ethpool::init_tracing();
    PoolArgs::parse().run().await
}
