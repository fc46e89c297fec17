//! ppe-relay CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use ppe_relay::{RelayBuilder, Secrets};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Secrets and PPE_* overrides may live in .env
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let json = cli.json_logs;

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(filter)
        .init();

    info!("ppe-relay v{}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No .env loaded: {e}"),
    }

    let config = cli.into_config()?;
    let secrets = Secrets::from_env()?;
    info!(
        "Operator {} / bot {}",
        secrets.operator.public_key(),
        secrets.bot.public_key()
    );

    let mut relay = RelayBuilder::new(config, secrets).build().await?;
    relay.run().await?;

    info!("Goodbye!");
    Ok(())
}
