use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated join request ready for the admission engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestEvent {
    pub destination_id: i64,
    pub subject_id: i64,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventValidationError {
    #[error("join request is missing a destination id")]
    MissingDestination,
    #[error("join request subject id must be positive, got {0}")]
    InvalidSubject(i64),
    #[error("join request timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

impl JoinRequestEvent {
    pub fn new(
        destination_id: i64,
        subject_id: i64,
        requested_at: DateTime<Utc>,
    ) -> Result<Self, EventValidationError> {
        if destination_id == 0 {
            return Err(EventValidationError::MissingDestination);
        }
        if subject_id <= 0 {
            return Err(EventValidationError::InvalidSubject(subject_id));
        }
        Ok(Self {
            destination_id,
            subject_id,
            requested_at,
        })
    }

    /// Builds an event from a platform payload carrying a Unix-seconds `date`.
    pub fn from_unix_seconds(
        destination_id: i64,
        subject_id: i64,
        unix_seconds: i64,
    ) -> Result<Self, EventValidationError> {
        if unix_seconds <= 0 {
            return Err(EventValidationError::InvalidTimestamp(unix_seconds));
        }
        let requested_at = DateTime::<Utc>::from_timestamp(unix_seconds, 0)
            .ok_or(EventValidationError::InvalidTimestamp(unix_seconds))?;
        Self::new(destination_id, subject_id, requested_at)
    }
}
