//! Admission decision engine for join-request automation.
//!
//! Hosts the per-event admission decision, the operator-triggered batch
//! approval workflow, operator authorization and destination registration.
//! Persistence and the messaging platform are injected through
//! [`gatekeeper_store::AdmissionStore`] and [`MembershipPlatform`].

pub mod authorization;
pub mod batch;
pub mod engine;
pub mod event;
pub mod platform;
pub mod registration;

#[cfg(test)]
mod test_support;

pub use authorization::{OperatorAuthorizer, OperatorDecision};
pub use batch::{
    tally_outcomes, BatchApprovalWorkflow, BatchPolicy, BatchReport, BatchTally, BatchTrigger,
    EntryOutcome, EntryOutcomeRecord, DEFAULT_MAX_FAILED_ATTEMPTS,
};
pub use engine::{AdmissionDecision, AdmissionEngine, AdmissionError};
pub use event::{EventValidationError, JoinRequestEvent};
pub use platform::{MembershipPlatform, PlatformError};
pub use registration::{
    parse_destination_id, DestinationIdError, RegistrationOutcome, RegistrationPolicy,
    RegistrationService, UnlinkOutcome, DEFAULT_MAX_DESTINATIONS_PER_PRINCIPAL,
};
