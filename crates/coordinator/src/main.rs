mod cli;
mod commands;
mod router;

use clap::Parser;
use human_panic::setup_panic;

use crate::cli::{Cli, run_cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_panic!();
    shared::env::configure_env()?;
    shared::logging::configure_logging()?;
    shared::crypto::ensure_crypto_registered()?;

    let cli = Cli::parse();

    run_cli(cli).await
}
