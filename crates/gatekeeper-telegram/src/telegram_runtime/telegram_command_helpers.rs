//! Operator command parsing for messages sent to the bot.

use gatekeeper_admission::parse_destination_id;
use gatekeeper_store::AdmissionMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum GatewayCommand {
    Start,
    Help,
    Status,
    Connect { destination_id: i64 },
    Disconnect { destination_id: i64 },
    Mode { target: Option<AdmissionMode> },
    /// `None` targets the chat the command was issued in.
    ApproveAll { destination_id: Option<i64> },
    Invalid { message: String },
}

impl GatewayCommand {
    pub(super) fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Status => "status",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Mode { .. } => "mode",
            Self::ApproveAll { .. } => "approveall",
            Self::Invalid { .. } => "invalid",
        }
    }
}

pub(super) fn gateway_command_usage() -> String {
    [
        "Supported commands:",
        "/start - show your account and connected chats",
        "/status - show the admission mode and pending requests",
        "/connect <chat_id> - auto-approve join requests for a chat (-100...)",
        "/disconnect <chat_id> - stop handling a chat",
        "/mode [immediate|queued] - show or change the admission mode (owner only)",
        "/approveall [chat_id] - approve every queued request for a chat",
        "/help - show this message",
    ]
    .join("\n")
}

/// Returns `None` for plain text, for commands addressed to another bot and,
/// outside private chats, for unknown commands not addressed to this bot.
pub(super) fn parse_gateway_command(
    text: &str,
    bot_username: &str,
    private_chat: bool,
) -> Option<GatewayCommand> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let remainder = parts.next().unwrap_or_default().trim();

    let (command, addressee) = match head[1..].split_once('@') {
        Some((command, addressee)) => (command, Some(addressee)),
        None => (&head[1..], None),
    };
    if let Some(addressee) = addressee {
        if !addressee.eq_ignore_ascii_case(bot_username) {
            return None;
        }
    }

    let parsed = match command.to_ascii_lowercase().as_str() {
        "start" => GatewayCommand::Start,
        "help" => GatewayCommand::Help,
        "status" => no_arguments(remainder, GatewayCommand::Status, "/status"),
        "connect" => match single_argument(remainder) {
            Some(raw) => match parse_destination_id(raw) {
                Ok(destination_id) => GatewayCommand::Connect { destination_id },
                Err(error) => invalid(format!("{error}. Usage: /connect -100xxxxxxxxxx")),
            },
            None => invalid("Usage: /connect -100xxxxxxxxxx".to_string()),
        },
        "disconnect" => match single_argument(remainder) {
            Some(raw) => match parse_destination_id(raw) {
                Ok(destination_id) => GatewayCommand::Disconnect { destination_id },
                Err(error) => invalid(format!("{error}. Usage: /disconnect -100xxxxxxxxxx")),
            },
            None => invalid("Usage: /disconnect -100xxxxxxxxxx".to_string()),
        },
        "mode" => {
            if remainder.is_empty() {
                GatewayCommand::Mode { target: None }
            } else {
                match single_argument(remainder).map(str::parse::<AdmissionMode>) {
                    Some(Ok(mode)) => GatewayCommand::Mode { target: Some(mode) },
                    _ => invalid("Usage: /mode [immediate|queued]".to_string()),
                }
            }
        }
        "approveall" => {
            if remainder.is_empty() {
                GatewayCommand::ApproveAll {
                    destination_id: None,
                }
            } else {
                match single_argument(remainder).map(parse_destination_id) {
                    Some(Ok(destination_id)) => GatewayCommand::ApproveAll {
                        destination_id: Some(destination_id),
                    },
                    _ => invalid("Usage: /approveall [-100xxxxxxxxxx]".to_string()),
                }
            }
        }
        _ if addressee.is_none() && !private_chat => return None,
        _ => invalid(format!(
            "Unknown command /{command}.\n\n{}",
            gateway_command_usage()
        )),
    };
    Some(parsed)
}

fn single_argument(remainder: &str) -> Option<&str> {
    let mut args = remainder.split_whitespace();
    match (args.next(), args.next()) {
        (Some(value), None) => Some(value),
        _ => None,
    }
}

fn no_arguments(remainder: &str, command: GatewayCommand, usage: &str) -> GatewayCommand {
    if remainder.is_empty() {
        command
    } else {
        invalid(format!("Usage: {usage}"))
    }
}

fn invalid(message: String) -> GatewayCommand {
    GatewayCommand::Invalid { message }
}
