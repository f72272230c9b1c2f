//! Long-polling Telegram gateway that drives the admission core.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use gatekeeper_admission::{
    AdmissionDecision, AdmissionEngine, AdmissionError, BatchApprovalWorkflow, BatchPolicy,
    BatchTrigger, JoinRequestEvent, OperatorAuthorizer, RegistrationPolicy, RegistrationService,
};
use gatekeeper_core::current_unix_timestamp_ms;
use gatekeeper_store::AdmissionStore;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

mod telegram_api_client;
mod telegram_command_helpers;
mod telegram_render_helpers;
mod telegram_state_store;
mod telegram_updates;


use telegram_api_client::TelegramApiClient;
use telegram_command_helpers::{gateway_command_usage, parse_gateway_command, GatewayCommand};
use telegram_render_helpers::{
    render_batch_report, render_denied, render_mode, render_registration_outcome, render_start,
    render_status, render_unlink_outcome,
};
use telegram_state_store::{JsonlEventLog, TelegramGatewayStateStore};
use telegram_updates::{classify_update, update_id, InboundUpdate, OperatorMessage};

const TELEGRAM_STATE_SCHEMA_VERSION: u32 = 1;
const STORE_UNAVAILABLE_REPLY: &str = "Storage is temporarily unavailable. Please try again later.";

#[derive(Debug, Clone)]
/// Runtime configuration for the Telegram gateway polling loop.
pub struct TelegramGatewayConfig {
    pub api_base: String,
    pub bot_token: String,
    /// The single operator allowed to change the admission mode.
    pub owner_id: i64,
    pub state_dir: PathBuf,
    pub poll_timeout_seconds: u64,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub error_backoff: Duration,
    pub max_destinations_per_principal: usize,
    pub batch_policy: BatchPolicy,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PollCycleReport {
    pub discovered_updates: usize,
    pub join_requests: usize,
    pub commands: usize,
    pub ignored_updates: usize,
    pub invalid_updates: usize,
    pub failed_events: usize,
}

impl PollCycleReport {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Runs the gateway until ctrl-c.
pub async fn run_telegram_gateway(
    config: TelegramGatewayConfig,
    store: Arc<dyn AdmissionStore>,
) -> Result<()> {
    let mut runtime = TelegramGatewayRuntime::new(config, store).await?;
    runtime.run().await
}

struct TelegramGatewayRuntime {
    config: TelegramGatewayConfig,
    client: Arc<TelegramApiClient>,
    store: Arc<dyn AdmissionStore>,
    state_store: TelegramGatewayStateStore,
    decision_log: JsonlEventLog,
    bot_username: String,
    engine: AdmissionEngine,
    batch: BatchApprovalWorkflow,
    registration: RegistrationService,
    authorizer: OperatorAuthorizer,
}

impl TelegramGatewayRuntime {
    async fn new(config: TelegramGatewayConfig, store: Arc<dyn AdmissionStore>) -> Result<Self> {
        let state_dir = config.state_dir.clone();
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("failed to create {}", state_dir.display()))?;

        let client = Arc::new(TelegramApiClient::new(
            config.api_base.clone(),
            config.bot_token.clone(),
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?);
        let bot = client
            .get_me()
            .await
            .context("failed to resolve telegram bot identity")?;
        let bot_username = bot
            .username
            .clone()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| anyhow!("telegram getMe did not return a username"))?;

        let mode = store
            .initialize_mode()
            .await
            .context("failed to initialize admission mode")?;
        info!(bot_user_id = bot.id, %bot_username, %mode, "telegram gateway ready");

        let state_store = TelegramGatewayStateStore::load(state_dir.join("state.json"))?;
        let decision_log = JsonlEventLog::open(state_dir.join("decisions.jsonl"))?;

        let engine = AdmissionEngine::new(store.clone(), client.clone());
        let batch = BatchApprovalWorkflow::new(store.clone(), client.clone(), config.batch_policy);
        let registration = RegistrationService::new(
            store.clone(),
            client.clone(),
            RegistrationPolicy {
                max_destinations_per_principal: config.max_destinations_per_principal,
                bot_user_id: bot.id,
            },
        );
        let authorizer = OperatorAuthorizer::new(config.owner_id);

        Ok(Self {
            config,
            client,
            store,
            state_store,
            decision_log,
            bot_username,
            engine,
            batch,
            registration,
            authorizer,
        })
    }

    async fn run(&mut self) -> Result<()> {
        let mut failure_streak = 0_usize;
        loop {
            let cycle = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("telegram gateway shutdown requested");
                    return Ok(());
                }
                cycle = self.poll_once() => cycle,
            };

            match cycle {
                Ok(report) => {
                    failure_streak = 0;
                    if !report.is_empty() {
                        info!(
                            discovered = report.discovered_updates,
                            join_requests = report.join_requests,
                            commands = report.commands,
                            ignored = report.ignored_updates,
                            invalid = report.invalid_updates,
                            failed = report.failed_events,
                            "telegram gateway cycle"
                        );
                    }
                }
                Err(error) => {
                    failure_streak = failure_streak.saturating_add(1);
                    warn!(failure_streak, error = %format!("{error:#}"), "telegram poll cycle failed");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("telegram gateway shutdown requested");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }
    }

    /// Fetches one batch of updates, handles each and persists the new offset.
    async fn poll_once(&mut self) -> Result<PollCycleReport> {
        let offset = self.state_store.next_update_offset();
        let updates = self
            .client
            .get_updates(offset, self.config.poll_timeout_seconds)
            .await?;

        let mut report = PollCycleReport::default();
        let mut next_offset = offset;
        for raw in &updates {
            report.discovered_updates = report.discovered_updates.saturating_add(1);
            if let Some(id) = update_id(raw) {
                next_offset = next_offset.max(id.saturating_add(1));
            }
            self.handle_update(raw, &mut report).await;
        }

        if self.state_store.advance_offset(next_offset) {
            self.state_store.save()?;
        }
        Ok(report)
    }

    async fn handle_update(&self, raw: &Value, report: &mut PollCycleReport) {
        match classify_update(raw) {
            InboundUpdate::JoinRequest(event) => {
                report.join_requests = report.join_requests.saturating_add(1);
                self.handle_join_request(&event, report).await
            }
            InboundUpdate::Message(message) => match parse_gateway_command(
                &message.text,
                &self.bot_username,
                message.private_chat,
            ) {
                Some(command) => {
                    report.commands = report.commands.saturating_add(1);
                    self.handle_command(&message, command, report).await
                }
                None => {
                    report.ignored_updates = report.ignored_updates.saturating_add(1);
                }
            },
            InboundUpdate::Ignored => {
                report.ignored_updates = report.ignored_updates.saturating_add(1);
            }
            InboundUpdate::Invalid { reason } => {
                report.invalid_updates = report.invalid_updates.saturating_add(1);
                warn!(update_id = ?update_id(raw), %reason, "skipping invalid telegram update");
            }
        }
    }

    async fn handle_join_request(&self, event: &JoinRequestEvent, report: &mut PollCycleReport) {
        let decision = match self.engine.handle_join_request(event).await {
            Ok(decision) => decision,
            Err(error) => {
                report.failed_events = report.failed_events.saturating_add(1);
                warn!(
                    destination_id = event.destination_id,
                    subject_id = event.subject_id,
                    %error,
                    "join request could not be processed"
                );
                return;
            }
        };
        if decision == AdmissionDecision::IgnoredUnregistered {
            return;
        }

        let mut record = json!({
            "timestamp_unix_ms": current_unix_timestamp_ms(),
            "kind": "join_request",
            "destination_id": event.destination_id,
            "subject_id": event.subject_id,
            "requested_at": event.requested_at.to_rfc3339(),
            "decision": decision.as_str(),
        });
        if let AdmissionDecision::ApprovalFailed { reason } = &decision {
            record["reason"] = Value::String(reason.clone());
        }
        self.record_decision(&record, report);
    }

    async fn handle_command(
        &self,
        message: &OperatorMessage,
        command: GatewayCommand,
        report: &mut PollCycleReport,
    ) {
        let principal_id = message.sender.id;
        let command_name = command.name();
        let (reply, status) = match self.execute_command(message, command).await {
            Ok(outcome) => outcome,
            Err(error) => {
                report.failed_events = report.failed_events.saturating_add(1);
                warn!(principal_id, command = command_name, %error, "operator command failed");
                (STORE_UNAVAILABLE_REPLY.to_string(), "error")
            }
        };

        let record = json!({
            "timestamp_unix_ms": current_unix_timestamp_ms(),
            "kind": "command",
            "command": command_name,
            "chat_id": message.chat_id,
            "principal_id": principal_id,
            "status": status,
        });
        self.record_decision(&record, report);
        self.reply(message.chat_id, &reply).await;
    }

    /// The decision log is an audit trail; a failed append never stops admission.
    fn record_decision(&self, record: &Value, report: &mut PollCycleReport) {
        if let Err(error) = self.decision_log.append(record) {
            report.failed_events = report.failed_events.saturating_add(1);
            warn!(
                kind = record["kind"].as_str().unwrap_or("unknown"),
                error = %format!("{error:#}"),
                "failed to append decision log record"
            );
        }
    }

    async fn execute_command(
        &self,
        message: &OperatorMessage,
        command: GatewayCommand,
    ) -> Result<(String, &'static str), AdmissionError> {
        let principal_id = message.sender.id;
        let max_destinations = self.registration.policy().max_destinations_per_principal;
        let outcome = match command {
            GatewayCommand::Start => {
                let principal = self.registration.summary(principal_id).await?;
                (
                    render_start(&message.sender, &principal, max_destinations),
                    "reported",
                )
            }
            GatewayCommand::Help => (gateway_command_usage(), "reported"),
            GatewayCommand::Status => {
                let principal = self.registration.summary(principal_id).await?;
                let mode = self.engine.current_mode().await?;
                let mut pending = Vec::with_capacity(principal.destinations.len());
                for destination_id in &principal.destinations {
                    let count = self.store.count_pending(*destination_id).await?;
                    pending.push((*destination_id, count));
                }
                (
                    render_status(&principal, max_destinations, mode, &pending),
                    "reported",
                )
            }
            GatewayCommand::Connect { destination_id } => {
                let outcome = self
                    .registration
                    .register(principal_id, destination_id)
                    .await?;
                (
                    render_registration_outcome(&outcome, destination_id),
                    "applied",
                )
            }
            GatewayCommand::Disconnect { destination_id } => {
                let outcome = self.registration.unlink(principal_id, destination_id).await?;
                (render_unlink_outcome(outcome, destination_id), "applied")
            }
            GatewayCommand::Mode { target: None } => {
                (render_mode(self.engine.current_mode().await?), "reported")
            }
            GatewayCommand::Mode { target: Some(mode) } => {
                let decision = self.authorizer.authorize_mode_change(principal_id);
                if decision.is_allowed() {
                    self.engine.set_mode(mode).await?;
                    (render_mode(mode), "applied")
                } else {
                    debug!(principal_id, reason_code = decision.reason_code(), "mode change denied");
                    (render_denied(&decision), "denied")
                }
            }
            GatewayCommand::ApproveAll { destination_id } => {
                let destination_id = match destination_id {
                    Some(destination_id) => destination_id,
                    None if !message.private_chat => message.chat_id,
                    None => {
                        return Ok((
                            "Usage: /approveall -100xxxxxxxxxx (or send /approveall in the group)"
                                .to_string(),
                            "invalid",
                        ))
                    }
                };
                match self
                    .batch
                    .trigger(&self.authorizer, destination_id, principal_id)
                    .await?
                {
                    BatchTrigger::Denied(decision) => (render_denied(&decision), "denied"),
                    BatchTrigger::Completed(report) => (render_batch_report(&report), "applied"),
                }
            }
            GatewayCommand::Invalid { message: usage } => (usage, "invalid"),
        };
        Ok(outcome)
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(error) = self.client.send_message(chat_id, text).await {
            warn!(chat_id, error = %format!("{error:#}"), "failed to send telegram reply");
        }
    }
}
