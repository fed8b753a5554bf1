use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::sync::oneshot;

use anc_core::cli::Cli;
use anc_core::config::ConfigManager;
use anc_core::stream_shim::StreamShim;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let manager = ConfigManager::new().context("failed to load configuration")?;
    let config = cli.apply(manager.get_config().clone());

    info!(
        "starting anc-core against {}:{} (chunk_size={}, filter_length={})",
        config.broker.host,
        config.broker.port,
        config.engine.chunk_size,
        config.engine.filter.filter_length
    );

    let mut shim = StreamShim::new(&config);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let run = tokio::spawn(async move { shim.run(&config.broker, shutdown_rx).await });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(());

    match run.await {
        Ok(Ok(())) => {
            info!("anc-core stopped cleanly");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("fatal transport error: {e}");
            std::process::exit(1);
        }
        Err(join_err) => {
            error!("engine task panicked: {join_err}");
            std::process::exit(1);
        }
    }
}
