use tracing::warn;

use crate::MembershipPlatform;

const ALLOW_OWNER: &str = "allow_owner";
const ALLOW_DESTINATION_ADMIN: &str = "allow_destination_admin";
const DENY_NOT_OWNER: &str = "deny_not_owner";
const DENY_NOT_DESTINATION_ADMIN: &str = "deny_not_destination_admin";
const DENY_ADMIN_LOOKUP_FAILED: &str = "deny_admin_lookup_failed";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of an operator permission check.
pub enum OperatorDecision {
    Allow { reason_code: String },
    Deny { reason_code: String },
}

impl OperatorDecision {
    fn allow(reason_code: &str) -> Self {
        Self::Allow {
            reason_code: reason_code.to_string(),
        }
    }

    fn deny(reason_code: &str) -> Self {
        Self::Deny {
            reason_code: reason_code.to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn reason_code(&self) -> &str {
        match self {
            Self::Allow { reason_code } | Self::Deny { reason_code } => reason_code,
        }
    }
}

/// Gates operator commands on the single configured owner or destination admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuthorizer {
    owner_id: i64,
}

impl OperatorAuthorizer {
    pub fn new(owner_id: i64) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }

    pub fn authorize_mode_change(&self, principal_id: i64) -> OperatorDecision {
        if principal_id == self.owner_id {
            OperatorDecision::allow(ALLOW_OWNER)
        } else {
            OperatorDecision::deny(DENY_NOT_OWNER)
        }
    }

    /// The owner may batch-approve anywhere; others must administer the destination.
    pub async fn authorize_batch(
        &self,
        destination_id: i64,
        principal_id: i64,
        platform: &dyn MembershipPlatform,
    ) -> OperatorDecision {
        if principal_id == self.owner_id {
            return OperatorDecision::allow(ALLOW_OWNER);
        }
        match platform.is_admin(destination_id, principal_id).await {
            Ok(true) => OperatorDecision::allow(ALLOW_DESTINATION_ADMIN),
            Ok(false) => OperatorDecision::deny(DENY_NOT_DESTINATION_ADMIN),
            Err(error) => {
                warn!(
                    destination_id,
                    principal_id,
                    %error,
                    "admin lookup failed while authorizing batch approval"
                );
                OperatorDecision::deny(DENY_ADMIN_LOOKUP_FAILED)
            }
        }
    }
}
