//! Per-event admission decision: gate on registration, then approve or queue.

use std::sync::Arc;

use gatekeeper_store::{AdmissionMode, AdmissionStore, AdmissionStoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{JoinRequestEvent, MembershipPlatform};

/// Errors that abort an admission operation. Platform refusals are not errors.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("admission store unavailable: {0}")]
    Store(#[from] AdmissionStoreError),
}

/// What the engine did with one join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// No principal registered the destination; nothing happened.
    IgnoredUnregistered,
    Approved,
    /// Immediate approval was refused; the request is dropped.
    ApprovalFailed { reason: String },
    Queued,
    /// An entry for the same destination and subject was already waiting.
    AlreadyQueued,
}

impl AdmissionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IgnoredUnregistered => "ignored_unregistered",
            Self::Approved => "approved",
            Self::ApprovalFailed { .. } => "approval_failed",
            Self::Queued => "queued",
            Self::AlreadyQueued => "already_queued",
        }
    }
}

#[derive(Clone)]
pub struct AdmissionEngine {
    store: Arc<dyn AdmissionStore>,
    platform: Arc<dyn MembershipPlatform>,
}

impl AdmissionEngine {
    pub fn new(store: Arc<dyn AdmissionStore>, platform: Arc<dyn MembershipPlatform>) -> Self {
        Self { store, platform }
    }

    /// Applies the current admission mode to one join request.
    ///
    /// The mode is read once per event; approving and queueing never both
    /// happen for the same event.
    pub async fn handle_join_request(
        &self,
        event: &JoinRequestEvent,
    ) -> Result<AdmissionDecision, AdmissionError> {
        if !self
            .store
            .is_destination_registered(event.destination_id)
            .await?
        {
            debug!(
                destination_id = event.destination_id,
                subject_id = event.subject_id,
                "ignoring join request for unregistered destination"
            );
            return Ok(AdmissionDecision::IgnoredUnregistered);
        }

        let mode = self.store.read_mode().await?;
        let decision = match mode {
            AdmissionMode::Immediate => {
                match self
                    .platform
                    .approve_join_request(event.destination_id, event.subject_id)
                    .await
                {
                    Ok(()) => {
                        info!(
                            destination_id = event.destination_id,
                            subject_id = event.subject_id,
                            "approved join request"
                        );
                        AdmissionDecision::Approved
                    }
                    Err(error) => {
                        warn!(
                            destination_id = event.destination_id,
                            subject_id = event.subject_id,
                            %error,
                            "failed to approve join request"
                        );
                        AdmissionDecision::ApprovalFailed {
                            reason: error.to_string(),
                        }
                    }
                }
            }
            AdmissionMode::Queued => {
                let inserted = self
                    .store
                    .insert_if_absent(event.destination_id, event.subject_id, event.requested_at)
                    .await?;
                if inserted {
                    info!(
                        destination_id = event.destination_id,
                        subject_id = event.subject_id,
                        "queued join request"
                    );
                    AdmissionDecision::Queued
                } else {
                    debug!(
                        destination_id = event.destination_id,
                        subject_id = event.subject_id,
                        "join request already queued"
                    );
                    AdmissionDecision::AlreadyQueued
                }
            }
        };
        Ok(decision)
    }

    pub async fn current_mode(&self) -> Result<AdmissionMode, AdmissionError> {
        Ok(self.store.read_mode().await?)
    }

    /// Overwrites the global mode. Callers authorize the change first.
    pub async fn set_mode(&self, mode: AdmissionMode) -> Result<(), AdmissionError> {
        self.store.write_mode(mode).await?;
        info!(%mode, "admission mode changed");
        Ok(())
    }
}
