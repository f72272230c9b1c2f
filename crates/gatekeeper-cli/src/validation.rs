use anyhow::{bail, Result};

use crate::{Cli, CliStoreBackend};

fn resolve_non_empty_cli_value(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Cross-flag checks clap cannot express on its own.
pub fn validate_gateway_cli(cli: &Cli) -> Result<()> {
    if resolve_non_empty_cli_value(&cli.telegram_bot_token).is_none() {
        bail!("--telegram-bot-token cannot be empty");
    }
    let api_base = cli.telegram_api_base.trim();
    if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
        bail!("--telegram-api-base must be an http(s) URL, got '{api_base}'");
    }
    if cli.store_backend == CliStoreBackend::Memory && cli.sqlite_path.is_some() {
        bail!("--sqlite-path requires --store-backend sqlite");
    }
    Ok(())
}
