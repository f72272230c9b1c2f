//! Persisted record types shared by every store backend.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of the singleton settings row holding the admission mode.
pub const GLOBAL_MODE_KEY: &str = "global_mode";

/// Global admission policy applied to every join request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Approve join requests as soon as they arrive.
    #[default]
    Immediate,
    /// Defer join requests until an operator runs a batch approval.
    Queued,
}

impl AdmissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Queued => "queued",
        }
    }
}

impl fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when text does not name a known admission mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown admission mode '{0}' (expected 'immediate' or 'queued')")]
pub struct ParseAdmissionModeError(pub String);

impl FromStr for AdmissionMode {
    type Err = ParseAdmissionModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "queued" => Ok(Self::Queued),
            other => Err(ParseAdmissionModeError(other.to_string())),
        }
    }
}

/// A platform user together with the destinations they registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub principal_id: i64,
    pub destinations: BTreeSet<i64>,
}

impl PrincipalRecord {
    pub fn new(principal_id: i64) -> Self {
        Self {
            principal_id,
            destinations: BTreeSet::new(),
        }
    }
}

/// One deferred join request awaiting batch approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub entry_id: i64,
    pub destination_id: i64,
    pub subject_id: i64,
    pub requested_at: DateTime<Utc>,
    pub failed_attempts: u32,
}
