//! Telegram Bot API gateway for join-request admission.
//!
//! Long-polls `getUpdates`, feeds validated join requests into the admission
//! engine and answers operator commands sent to the bot.

mod telegram_helpers;
mod telegram_runtime;

pub use telegram_runtime::{run_telegram_gateway, TelegramGatewayConfig};
