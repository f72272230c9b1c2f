use std::{net::SocketAddr, path::PathBuf};

use clap::{ArgAction, Parser};

use crate::CliStoreBackend;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_i64(value: &str) -> Result<i64, String> {
    let parsed = value
        .trim()
        .parse::<i64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed <= 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "gatekeeper",
    about = "Telegram join-request admission gateway",
    version
)]
pub struct Cli {
    #[arg(
        long = "telegram-bot-token",
        env = "GATEKEEPER_TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram Bot API token"
    )]
    pub telegram_bot_token: String,

    #[arg(
        long = "telegram-api-base",
        env = "GATEKEEPER_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Telegram Bot API base URL"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "owner-id",
        env = "GATEKEEPER_OWNER_ID",
        value_parser = parse_positive_i64,
        help = "Telegram user id of the operator allowed to change the admission mode"
    )]
    pub owner_id: i64,

    #[arg(
        long = "state-dir",
        env = "GATEKEEPER_STATE_DIR",
        default_value = ".gatekeeper",
        help = "Directory for the polling cursor, decision log and default SQLite database"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "store-backend",
        env = "GATEKEEPER_STORE_BACKEND",
        value_enum,
        default_value_t = CliStoreBackend::Sqlite,
        help = "Persistence backend for registrations, mode and pending requests"
    )]
    pub store_backend: CliStoreBackend,

    #[arg(
        long = "sqlite-path",
        env = "GATEKEEPER_SQLITE_PATH",
        help = "SQLite database path (defaults to <state-dir>/gatekeeper.sqlite)"
    )]
    pub sqlite_path: Option<PathBuf>,

    #[arg(
        long = "poll-timeout-seconds",
        env = "GATEKEEPER_POLL_TIMEOUT_SECONDS",
        default_value_t = 30,
        help = "Long-poll window passed to getUpdates (0 polls without waiting)"
    )]
    pub poll_timeout_seconds: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "GATEKEEPER_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for Telegram API calls, added on top of the long-poll window"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "GATEKEEPER_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum attempts for retryable polling/messaging failures (429/5xx/transport)"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "GATEKEEPER_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff delay between retries in milliseconds"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "error-backoff-ms",
        env = "GATEKEEPER_ERROR_BACKOFF_MS",
        default_value_t = 2_000,
        value_parser = parse_positive_u64,
        help = "Pause after a failed poll cycle before polling again"
    )]
    pub error_backoff_ms: u64,

    #[arg(
        long = "max-destinations-per-principal",
        env = "GATEKEEPER_MAX_DESTINATIONS_PER_PRINCIPAL",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Maximum number of chats a single user may connect"
    )]
    pub max_destinations_per_principal: usize,

    #[arg(
        long = "pending-max-failed-attempts",
        env = "GATEKEEPER_PENDING_MAX_FAILED_ATTEMPTS",
        default_value_t = 5,
        help = "Drop a queued request after this many failed batch approvals (0 keeps it forever)"
    )]
    pub pending_max_failed_attempts: u32,

    #[arg(
        long = "health-bind",
        env = "GATEKEEPER_HEALTH_BIND",
        default_value = "127.0.0.1:8080",
        help = "Socket address for the /healthz liveness endpoint"
    )]
    pub health_bind: SocketAddr,

    #[arg(
        long = "health-enabled",
        env = "GATEKEEPER_HEALTH_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Serve the /healthz liveness endpoint"
    )]
    pub health_enabled: bool,
}

impl Cli {
    pub fn resolved_sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("gatekeeper.sqlite"))
    }
}
