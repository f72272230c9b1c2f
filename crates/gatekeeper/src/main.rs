mod bootstrap_helpers;
mod health;
mod startup;

use anyhow::Result;
use clap::Parser;
use gatekeeper_cli::Cli;

use crate::bootstrap_helpers::init_tracing;
use crate::startup::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
