use std::borrow::Cow;
use std::time::Duration;

use reqwest::StatusCode;

/// Telegram rejects `sendMessage` text above this many characters.
pub(crate) const TELEGRAM_MESSAGE_MAX_CHARS: usize = 4_096;
const MAX_BACKOFF_DOUBLINGS: usize = 6;
const ELLIPSIS: &str = "...";

/// Attempt budget and backoff schedule for retryable Bot API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    /// True when a call that has failed `attempts_made` times may be sent again.
    pub(crate) fn permits_retry(&self, attempts_made: usize) -> bool {
        attempts_made < self.max_attempts
    }

    /// Pause before the next attempt. A flood-wait hint from Telegram wins over
    /// the doubling schedule.
    pub(crate) fn delay_after(
        &self,
        attempts_made: usize,
        retry_after_seconds: Option<u64>,
    ) -> Duration {
        if let Some(seconds) = retry_after_seconds {
            return Duration::from_secs(seconds);
        }
        let doublings = attempts_made.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        (0..doublings).fold(self.base_delay, |delay, _| delay.saturating_mul(2))
    }
}

/// Reads a `Retry-After` header given in whole seconds.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse().ok()
}

/// Flood control and server-side failures clear up on their own.
pub(crate) fn is_transient_status(status: u16) -> bool {
    StatusCode::from_u16(status)
        .is_ok_and(|status| status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
}

pub(crate) fn is_transient_transport(error: &reqwest::Error) -> bool {
    if error.is_builder() || error.is_redirect() || error.is_decode() {
        return false;
    }
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// Cuts `value` to at most `max_chars` characters, marking the cut with an ellipsis.
pub(crate) fn clip_chars(value: &str, max_chars: usize) -> Cow<'_, str> {
    match value.char_indices().nth(max_chars) {
        None => Cow::Borrowed(value),
        Some((cut, _)) => Cow::Owned(format!("{}{ELLIPSIS}", &value[..cut])),
    }
}

pub(crate) fn fit_telegram_message(text: &str) -> String {
    clip_chars(text, TELEGRAM_MESSAGE_MAX_CHARS - ELLIPSIS.len()).into_owned()
}
