//! Telegram Bot API client used by the polling gateway and the admission core.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gatekeeper_admission::{MembershipPlatform, PlatformError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use super::telegram_updates::TelegramUser;
use crate::telegram_helpers::{
    clip_chars, is_transient_status, is_transient_transport, retry_after_header, RetryPolicy,
};

const ALLOWED_UPDATES: [&str; 2] = ["message", "chat_join_request"];

#[derive(Debug, Deserialize)]
struct TelegramEnvelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<TelegramResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct TelegramResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TelegramChatMember {
    status: String,
}

#[derive(Debug, Error)]
pub(super) enum TelegramCallError {
    #[error("telegram {method} failed with status {status}: {description}")]
    Api {
        method: &'static str,
        status: u16,
        description: String,
        retry_after: Option<u64>,
    },
    #[error("telegram {method} request failed: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode telegram {method} response: {message}")]
    Decode {
        method: &'static str,
        message: String,
    },
}

impl TelegramCallError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => is_transient_status(*status),
            Self::Transport { source, .. } => is_transient_transport(source),
            Self::Decode { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn into_platform_error(self) -> PlatformError {
        match self {
            Self::Api {
                method,
                description,
                ..
            } => PlatformError::Rejected {
                operation: method,
                description,
            },
            Self::Transport { method, .. } | Self::Decode { method, .. } => {
                PlatformError::Transport {
                    operation: method,
                    message: self.to_string(),
                }
            }
        }
    }
}

#[derive(Clone)]
pub(super) struct TelegramApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl TelegramApiClient {
    pub(super) fn new(
        api_base: String,
        bot_token: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("gatekeeper-telegram"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create telegram api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
            request_timeout: Duration::from_millis(request_timeout_ms.max(1)),
            retry: RetryPolicy::new(retry_max_attempts, retry_base_delay_ms),
        })
    }

    pub(super) async fn get_me(&self) -> Result<TelegramUser> {
        let user = self
            .call_with_retry::<TelegramUser>("getMe", &json!({}), self.request_timeout)
            .await?;
        Ok(user)
    }

    /// Long-polls for updates. The HTTP timeout is widened by the poll window.
    pub(super) async fn get_updates(&self, offset: i64, timeout_seconds: u64) -> Result<Vec<Value>> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout_seconds,
            "allowed_updates": ALLOWED_UPDATES,
        });
        let timeout = self.request_timeout + Duration::from_secs(timeout_seconds);
        let updates = self
            .call_with_retry::<Vec<Value>>("getUpdates", &payload, timeout)
            .await?;
        Ok(updates)
    }

    pub(super) async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        self.call_with_retry::<Value>("sendMessage", &payload, self.request_timeout)
            .await?;
        Ok(())
    }

    /// Single attempt: approval failures are terminal for the request.
    pub(super) async fn approve_chat_join_request(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<(), TelegramCallError> {
        let payload = json!({ "chat_id": chat_id, "user_id": user_id });
        self.call_once::<bool>("approveChatJoinRequest", &payload, self.request_timeout)
            .await?;
        Ok(())
    }

    pub(super) async fn get_chat_member_status(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<String, TelegramCallError> {
        let payload = json!({ "chat_id": chat_id, "user_id": user_id });
        let member = self
            .call_with_retry::<TelegramChatMember>("getChatMember", &payload, self.request_timeout)
            .await?;
        Ok(member.status)
    }

    async fn call_with_retry<T>(
        &self,
        method: &'static str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<T, TelegramCallError>
    where
        T: DeserializeOwned,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let error = match self.send(method, payload, timeout, attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_retryable() || !self.retry.permits_retry(attempt) {
                return Err(error);
            }
            let delay = self.retry.delay_after(attempt, error.retry_after());
            debug!(
                method,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %error,
                "retrying telegram call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn call_once<T>(
        &self,
        method: &'static str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<T, TelegramCallError>
    where
        T: DeserializeOwned,
    {
        self.send(method, payload, timeout, 1).await
    }

    async fn send<T>(
        &self,
        method: &'static str,
        payload: &Value,
        timeout: Duration,
        attempt: usize,
    ) -> Result<T, TelegramCallError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/bot{}/{method}", self.api_base, self.bot_token))
            .header(
                "x-gatekeeper-retry-attempt",
                attempt.saturating_sub(1).to_string(),
            )
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|source| TelegramCallError::Transport { method, source })?;

        let status = response.status();
        let header_retry_after = retry_after_header(response.headers());
        let body = response
            .text()
            .await
            .map_err(|source| TelegramCallError::Transport { method, source })?;
        let envelope = serde_json::from_str::<TelegramEnvelope<T>>(&body);

        match envelope {
            Ok(envelope) if status.is_success() && envelope.ok => {
                envelope.result.ok_or_else(|| TelegramCallError::Decode {
                    method,
                    message: "response is missing result".to_string(),
                })
            }
            Ok(envelope) => Err(TelegramCallError::Api {
                method,
                status: status.as_u16(),
                description: envelope
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
                retry_after: envelope
                    .parameters
                    .and_then(|parameters| parameters.retry_after)
                    .or(header_retry_after),
            }),
            Err(_) if !status.is_success() => Err(TelegramCallError::Api {
                method,
                status: status.as_u16(),
                description: clip_chars(&body, 800).into_owned(),
                retry_after: header_retry_after,
            }),
            Err(error) => Err(TelegramCallError::Decode {
                method,
                message: error.to_string(),
            }),
        }
    }
}

#[async_trait]
impl MembershipPlatform for TelegramApiClient {
    async fn approve_join_request(
        &self,
        destination_id: i64,
        subject_id: i64,
    ) -> Result<(), PlatformError> {
        self.approve_chat_join_request(destination_id, subject_id)
            .await
            .map_err(TelegramCallError::into_platform_error)
    }

    async fn is_admin(
        &self,
        destination_id: i64,
        principal_id: i64,
    ) -> Result<bool, PlatformError> {
        let status = self
            .get_chat_member_status(destination_id, principal_id)
            .await
            .map_err(TelegramCallError::into_platform_error)?;
        Ok(matches!(status.as_str(), "administrator" | "creator"))
    }
}
