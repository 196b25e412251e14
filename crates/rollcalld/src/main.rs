use anyhow::{Context, Result};
use clap::Parser;
use rollcall_engine::{ChannelSink, Config, Rollcall};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod delivery;
mod sweep;

#[derive(Parser)]
#[command(name = "rollcalld", about = "Rollcall attendance daemon")]
struct Args {
    /// TOML configuration file; defaults and ROLLCALL_* variables apply without one
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::info!("rollcalld starting");

    let config = Config::load(args.config.as_deref()).context("loading configuration")?;
    let (sink, rx) = ChannelSink::new(config.notifications.queue_capacity);
    let rollcall = Arc::new(
        Rollcall::from_config(&config, Arc::new(sink)).context("starting attendance engine")?,
    );

    let interval = config.sweep_interval();
    let sweeper = tokio::spawn(sweep::run(rollcall.clone(), interval));
    let courier = tokio::spawn(delivery::run(rollcall.clone(), rx, interval));

    tracing::info!(
        db = %config.db_path.display(),
        sweep_secs = interval.as_secs(),
        "rollcalld ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");
    sweeper.abort();
    courier.abort();

    Ok(())
}
