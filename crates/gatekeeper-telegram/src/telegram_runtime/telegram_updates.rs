//! Boundary validation that turns raw `getUpdates` items into gateway inputs.

use gatekeeper_admission::JoinRequestEvent;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(super) struct TelegramUser {
    pub(super) id: i64,
    #[serde(default)]
    pub(super) is_bot: bool,
    #[serde(default)]
    pub(super) first_name: Option<String>,
    #[serde(default)]
    pub(super) username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramChatJoinRequest {
    chat: TelegramChat,
    from: TelegramUser,
    date: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramUpdate {
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    chat_join_request: Option<TelegramChatJoinRequest>,
}

/// A text message that may carry an operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct OperatorMessage {
    pub(super) chat_id: i64,
    pub(super) private_chat: bool,
    pub(super) sender: TelegramUser,
    pub(super) text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum InboundUpdate {
    JoinRequest(JoinRequestEvent),
    Message(OperatorMessage),
    /// Well-formed but irrelevant to the gateway (edits, bot senders, non-text).
    Ignored,
    Invalid { reason: String },
}

pub(super) fn update_id(raw: &Value) -> Option<i64> {
    raw.get("update_id").and_then(Value::as_i64)
}

pub(super) fn classify_update(raw: &Value) -> InboundUpdate {
    let update = match TelegramUpdate::deserialize(raw) {
        Ok(update) => update,
        Err(error) => {
            return InboundUpdate::Invalid {
                reason: error.to_string(),
            }
        }
    };

    if let Some(request) = update.chat_join_request {
        return match JoinRequestEvent::from_unix_seconds(
            request.chat.id,
            request.from.id,
            request.date,
        ) {
            Ok(event) => InboundUpdate::JoinRequest(event),
            Err(error) => InboundUpdate::Invalid {
                reason: error.to_string(),
            },
        };
    }

    let Some(message) = update.message else {
        return InboundUpdate::Ignored;
    };
    let Some(sender) = message.from.filter(|sender| !sender.is_bot) else {
        return InboundUpdate::Ignored;
    };
    let Some(text) = message.text.filter(|text| !text.trim().is_empty()) else {
        return InboundUpdate::Ignored;
    };
    InboundUpdate::Message(OperatorMessage {
        chat_id: message.chat.id,
        private_chat: message.chat.kind == "private",
        sender,
        text,
    })
}
