//! Destination registration and unlink on behalf of a principal.

use std::sync::Arc;

use gatekeeper_store::{AdmissionStore, PrincipalRecord};
use thiserror::Error;
use tracing::{info, warn};

use crate::{AdmissionError, MembershipPlatform};

pub const DEFAULT_MAX_DESTINATIONS_PER_PRINCIPAL: usize = 3;
const SUPERGROUP_ID_PREFIX: &str = "-100";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DestinationIdError {
    #[error("chat id must start with -100")]
    InvalidFormat,
    #[error("chat id '{0}' is not a number")]
    NotANumber(String),
}

/// Parses an operator-supplied channel/supergroup id such as `-1001234567890`.
pub fn parse_destination_id(raw: &str) -> Result<i64, DestinationIdError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with(SUPERGROUP_ID_PREFIX) {
        return Err(DestinationIdError::InvalidFormat);
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| DestinationIdError::NotANumber(trimmed.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationPolicy {
    pub max_destinations_per_principal: usize,
    /// The gateway's own platform user; it must administer every registered destination.
    pub bot_user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    AlreadyRegistered,
    LimitReached { limit: usize },
    BotNotAdmin,
    VerificationFailed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkOutcome {
    Removed,
    NotRegistered,
}

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn AdmissionStore>,
    platform: Arc<dyn MembershipPlatform>,
    policy: RegistrationPolicy,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        platform: Arc<dyn MembershipPlatform>,
        policy: RegistrationPolicy,
    ) -> Self {
        Self {
            store,
            platform,
            policy,
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    pub async fn summary(&self, principal_id: i64) -> Result<PrincipalRecord, AdmissionError> {
        Ok(self.store.get_or_create(principal_id).await?)
    }

    /// Registers `destination_id` for `principal_id` after checking the cap and
    /// that the gateway administers the destination.
    pub async fn register(
        &self,
        principal_id: i64,
        destination_id: i64,
    ) -> Result<RegistrationOutcome, AdmissionError> {
        let principal = self.store.get_or_create(principal_id).await?;
        if principal.destinations.contains(&destination_id) {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }
        let limit = self.policy.max_destinations_per_principal;
        if principal.destinations.len() >= limit {
            return Ok(RegistrationOutcome::LimitReached { limit });
        }

        match self
            .platform
            .is_admin(destination_id, self.policy.bot_user_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Ok(RegistrationOutcome::BotNotAdmin),
            Err(error) => {
                warn!(
                    principal_id,
                    destination_id,
                    %error,
                    "could not verify gateway privileges in destination"
                );
                return Ok(RegistrationOutcome::VerificationFailed {
                    reason: error.to_string(),
                });
            }
        }

        if !self
            .store
            .add_destination(principal_id, destination_id)
            .await?
        {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }
        info!(principal_id, destination_id, "destination registered");
        Ok(RegistrationOutcome::Registered)
    }

    pub async fn unlink(
        &self,
        principal_id: i64,
        destination_id: i64,
    ) -> Result<UnlinkOutcome, AdmissionError> {
        if self
            .store
            .remove_destination(principal_id, destination_id)
            .await?
        {
            info!(principal_id, destination_id, "destination unlinked");
            Ok(UnlinkOutcome::Removed)
        } else {
            Ok(UnlinkOutcome::NotRegistered)
        }
    }
}
