use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by the messaging platform for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The platform answered and refused the call (expired request, missing rights, ...).
    #[error("platform rejected {operation}: {description}")]
    Rejected {
        operation: &'static str,
        description: String,
    },
    /// The call never produced a platform answer.
    #[error("platform {operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

/// Calls the admission core needs from the messaging platform.
#[async_trait]
pub trait MembershipPlatform: Send + Sync {
    /// Grants membership for a pending join request.
    async fn approve_join_request(
        &self,
        destination_id: i64,
        subject_id: i64,
    ) -> Result<(), PlatformError>;

    /// True when `principal_id` administers `destination_id`.
    async fn is_admin(&self, destination_id: i64, principal_id: i64)
        -> Result<bool, PlatformError>;
}
