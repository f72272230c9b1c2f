use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use gatekeeper_admission::BatchPolicy;
use gatekeeper_cli::{validate_gateway_cli, Cli, CliStoreBackend};
use gatekeeper_store::{AdmissionStore, InMemoryAdmissionStore, SqliteAdmissionStore};
use gatekeeper_telegram::{run_telegram_gateway, TelegramGatewayConfig};
use tracing::{info, warn};

use crate::health::start_health_server;

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    validate_gateway_cli(&cli)?;
    let store = build_admission_store(&cli)?;

    let health = if cli.health_enabled {
        Some(start_health_server(cli.health_bind).await?)
    } else {
        None
    };

    let result = run_telegram_gateway(build_gateway_config(&cli), store).await;
    if let Some((_, handle)) = health {
        handle.abort();
    }
    result
}

pub(crate) fn build_admission_store(cli: &Cli) -> Result<Arc<dyn AdmissionStore>> {
    match cli.store_backend {
        CliStoreBackend::Sqlite => {
            let path = cli.resolved_sqlite_path();
            let store = SqliteAdmissionStore::new(&path)
                .with_context(|| format!("failed to open sqlite store {}", path.display()))?;
            info!(path = %path.display(), "using sqlite admission store");
            Ok(Arc::new(store))
        }
        CliStoreBackend::Memory => {
            warn!("using in-memory admission store; registrations are lost on restart");
            Ok(Arc::new(InMemoryAdmissionStore::new()))
        }
    }
}

pub(crate) fn build_gateway_config(cli: &Cli) -> TelegramGatewayConfig {
    TelegramGatewayConfig {
        api_base: cli.telegram_api_base.clone(),
        bot_token: cli.telegram_bot_token.clone(),
        owner_id: cli.owner_id,
        state_dir: cli.state_dir.clone(),
        poll_timeout_seconds: cli.poll_timeout_seconds,
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
        error_backoff: Duration::from_millis(cli.error_backoff_ms),
        max_destinations_per_principal: cli.max_destinations_per_principal,
        batch_policy: BatchPolicy::from_limit(cli.pending_max_failed_attempts),
    }
}
