use anyhow::{Context, Result};
use broadcast_client_core::config::{Cli, Config};
use broadcast_client_core::session::run_session;
use broadcast_client_core::telemetry::logging;
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::try_from(Cli::parse()).context("invalid configuration")?;
    logging::init(&config.log).context("failed to initialise logging")?;

    info!(
        url = %config.signaling_url,
        sid = %config.sid,
        video = ?config.video,
        "starting broadcast session"
    );
    run_session(&config)
        .await
        .with_context(|| format!("session with {} failed", config.signaling_url))?;
    info!("signaling channel closed; exiting");
    Ok(())
}
