//! Operator-facing reply text.

use gatekeeper_admission::{BatchReport, OperatorDecision, RegistrationOutcome, UnlinkOutcome};
use gatekeeper_store::{AdmissionMode, PrincipalRecord};

use super::telegram_updates::TelegramUser;
use crate::telegram_helpers::fit_telegram_message;

pub(super) fn render_start(
    sender: &TelegramUser,
    principal: &PrincipalRecord,
    max_destinations: usize,
) -> String {
    let name = sender
        .first_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("there");
    format!(
        "Hello {name}!\n\nYour ID: {}\nConnected chats: {}/{max_destinations}\n\n\
         I approve join requests for the channels and groups you connect.\n\
         Make me an administrator there, then send /connect <chat_id>.",
        principal.principal_id,
        principal.destinations.len(),
    )
}

pub(super) fn render_status(
    principal: &PrincipalRecord,
    max_destinations: usize,
    mode: AdmissionMode,
    pending: &[(i64, usize)],
) -> String {
    let mut lines = vec![
        format!("Admission mode: {mode}"),
        format!(
            "Connected chats: {}/{max_destinations}",
            principal.destinations.len()
        ),
    ];
    for (destination_id, count) in pending {
        lines.push(format!("- {destination_id}: {count} pending"));
    }
    fit_telegram_message(&lines.join("\n"))
}

pub(super) fn render_registration_outcome(
    outcome: &RegistrationOutcome,
    destination_id: i64,
) -> String {
    match outcome {
        RegistrationOutcome::Registered => format!(
            "Connected {destination_id}. Join requests there are now handled automatically."
        ),
        RegistrationOutcome::AlreadyRegistered => {
            format!("{destination_id} is already connected.")
        }
        RegistrationOutcome::LimitReached { limit } => {
            format!("Limit reached: you already have {limit} connected chats.")
        }
        RegistrationOutcome::BotNotAdmin => format!(
            "I am not an administrator in {destination_id}. Promote me first, then try again."
        ),
        RegistrationOutcome::VerificationFailed { reason } => format!(
            "Could not verify {destination_id}. Check that I was added there and the id is correct.\nError: {reason}"
        ),
    }
}

pub(super) fn render_unlink_outcome(outcome: UnlinkOutcome, destination_id: i64) -> String {
    match outcome {
        UnlinkOutcome::Removed => format!("Disconnected {destination_id}."),
        UnlinkOutcome::NotRegistered => format!("{destination_id} is not connected to your account."),
    }
}

pub(super) fn render_mode(mode: AdmissionMode) -> String {
    match mode {
        AdmissionMode::Immediate => {
            "Admission mode: immediate. Join requests are approved as they arrive.".to_string()
        }
        AdmissionMode::Queued => {
            "Admission mode: queued. Join requests wait for /approveall.".to_string()
        }
    }
}

pub(super) fn render_denied(decision: &OperatorDecision) -> String {
    let detail = match decision.reason_code() {
        "deny_not_owner" => "only the bot owner can do that",
        "deny_not_destination_admin" => "you are not an administrator of this chat",
        "deny_admin_lookup_failed" => "your administrator rights could not be verified",
        _ => "permission denied",
    };
    format!("Not allowed: {detail}.")
}

pub(super) fn render_batch_report(report: &BatchReport) -> String {
    let tally = &report.tally;
    if tally.total == 0 {
        return format!("No pending join requests for {}.", report.destination_id);
    }
    let mut text = format!(
        "Processed {} pending requests for {}: {} approved, {} failed.",
        tally.total, report.destination_id, tally.succeeded, tally.failed
    );
    if tally.pruned > 0 {
        text.push_str(&format!(
            " {} failed requests were dropped after repeated failures.",
            tally.pruned
        ));
    }
    text
}
