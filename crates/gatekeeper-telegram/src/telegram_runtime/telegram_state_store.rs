use std::{
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, bail, Context, Result};
use gatekeeper_core::{current_unix_timestamp_ms, write_text_atomic};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TELEGRAM_STATE_SCHEMA_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TelegramGatewayState {
    schema_version: u32,
    #[serde(default)]
    next_update_offset: i64,
    #[serde(default)]
    updated_unix_ms: u64,
}

impl Default for TelegramGatewayState {
    fn default() -> Self {
        Self {
            schema_version: TELEGRAM_STATE_SCHEMA_VERSION,
            next_update_offset: 0,
            updated_unix_ms: 0,
        }
    }
}

/// Polling cursor persisted between restarts so updates are not replayed.
pub(super) struct TelegramGatewayStateStore {
    path: PathBuf,
    state: TelegramGatewayState,
}

impl TelegramGatewayStateStore {
    pub(super) fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            serde_json::from_str::<TelegramGatewayState>(&raw).with_context(|| {
                format!("failed to parse telegram gateway state file {}", path.display())
            })?
        } else {
            TelegramGatewayState::default()
        };

        if state.schema_version != TELEGRAM_STATE_SCHEMA_VERSION {
            bail!(
                "unsupported telegram gateway state schema: expected {}, found {}",
                TELEGRAM_STATE_SCHEMA_VERSION,
                state.schema_version
            );
        }
        Ok(Self { path, state })
    }

    pub(super) fn next_update_offset(&self) -> i64 {
        self.state.next_update_offset
    }

    /// Moves the cursor forward only; returns true when it changed.
    pub(super) fn advance_offset(&mut self, next_offset: i64) -> bool {
        if next_offset <= self.state.next_update_offset {
            return false;
        }
        self.state.next_update_offset = next_offset;
        true
    }

    pub(super) fn save(&mut self) -> Result<()> {
        self.state.updated_unix_ms = current_unix_timestamp_ms();
        let mut payload =
            serde_json::to_string_pretty(&self.state).context("failed to serialize state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write state file {}", self.path.display()))?;
        Ok(())
    }
}

/// Append-only JSON lines audit log of gateway decisions.
#[derive(Clone)]
pub(super) struct JsonlEventLog {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
}

impl JsonlEventLog {
    pub(super) fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub(super) fn append(&self, value: &Value) -> Result<()> {
        let line = serde_json::to_string(value).context("failed to encode log event")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("event log mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}
