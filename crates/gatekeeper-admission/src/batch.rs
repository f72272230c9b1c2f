//! Operator-triggered batch approval over one destination's pending queue.

use std::sync::Arc;

use gatekeeper_store::{AdmissionStore, AdmissionStoreError, PendingEntry};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{AdmissionError, MembershipPlatform, OperatorAuthorizer, OperatorDecision};

pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

/// Retention policy for entries whose approval keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Entries are dropped once they fail this many batch runs. `None` keeps them forever.
    pub max_failed_attempts: Option<u32>,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: Some(DEFAULT_MAX_FAILED_ATTEMPTS),
        }
    }
}

impl BatchPolicy {
    /// Maps the CLI convention where `0` disables pruning.
    pub fn from_limit(limit: u32) -> Self {
        Self {
            max_failed_attempts: (limit > 0).then_some(limit),
        }
    }

    fn should_prune(&self, failed_attempts: u32) -> bool {
        self.max_failed_attempts
            .is_some_and(|limit| failed_attempts >= limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    Approved,
    Failed { reason: String, pruned: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcomeRecord {
    pub entry_id: i64,
    pub subject_id: i64,
    pub outcome: EntryOutcome,
}

/// Counts reported back to the operator after a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchTally {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed entries removed because they hit the retention limit.
    pub pruned: usize,
}

/// Folds per-entry outcomes into the operator-facing tally.
pub fn tally_outcomes<'a, I>(outcomes: I) -> BatchTally
where
    I: IntoIterator<Item = &'a EntryOutcome>,
{
    outcomes
        .into_iter()
        .fold(BatchTally::default(), |mut tally, outcome| {
            tally.total += 1;
            match outcome {
                EntryOutcome::Approved => tally.succeeded += 1,
                EntryOutcome::Failed { pruned, .. } => {
                    tally.failed += 1;
                    if *pruned {
                        tally.pruned += 1;
                    }
                }
            }
            tally
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub destination_id: i64,
    pub tally: BatchTally,
    pub outcomes: Vec<EntryOutcomeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchTrigger {
    Denied(OperatorDecision),
    Completed(BatchReport),
}

#[derive(Clone)]
pub struct BatchApprovalWorkflow {
    store: Arc<dyn AdmissionStore>,
    platform: Arc<dyn MembershipPlatform>,
    policy: BatchPolicy,
}

impl BatchApprovalWorkflow {
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        platform: Arc<dyn MembershipPlatform>,
        policy: BatchPolicy,
    ) -> Self {
        Self {
            store,
            platform,
            policy,
        }
    }

    /// Authorizes `principal_id` and, only when allowed, runs the batch.
    ///
    /// A denied caller learns nothing about the queue: it is never read.
    pub async fn trigger(
        &self,
        authorizer: &OperatorAuthorizer,
        destination_id: i64,
        principal_id: i64,
    ) -> Result<BatchTrigger, AdmissionError> {
        let decision = authorizer
            .authorize_batch(destination_id, principal_id, self.platform.as_ref())
            .await;
        if !decision.is_allowed() {
            info!(
                destination_id,
                principal_id,
                reason_code = decision.reason_code(),
                "batch approval denied"
            );
            return Ok(BatchTrigger::Denied(decision));
        }
        Ok(BatchTrigger::Completed(self.run(destination_id).await?))
    }

    /// Approves every queued entry of `destination_id` one at a time.
    ///
    /// Successes are deleted; failures stay queued for the next run unless the
    /// retention limit prunes them. A store failure aborts the run and leaves
    /// already-approved entries deleted.
    pub async fn run(&self, destination_id: i64) -> Result<BatchReport, AdmissionError> {
        let entries = self.store.find_all(destination_id).await?;
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = self.process_entry(&entry).await?;
            outcomes.push(EntryOutcomeRecord {
                entry_id: entry.entry_id,
                subject_id: entry.subject_id,
                outcome,
            });
        }

        let tally = tally_outcomes(outcomes.iter().map(|record| &record.outcome));
        info!(
            destination_id,
            total = tally.total,
            succeeded = tally.succeeded,
            failed = tally.failed,
            pruned = tally.pruned,
            "batch approval finished"
        );
        Ok(BatchReport {
            destination_id,
            tally,
            outcomes,
        })
    }

    async fn process_entry(&self, entry: &PendingEntry) -> Result<EntryOutcome, AdmissionError> {
        match self
            .platform
            .approve_join_request(entry.destination_id, entry.subject_id)
            .await
        {
            Ok(()) => {
                self.store.delete(entry.entry_id).await?;
                Ok(EntryOutcome::Approved)
            }
            Err(error) => {
                warn!(
                    destination_id = entry.destination_id,
                    subject_id = entry.subject_id,
                    %error,
                    "batch approval failed for entry"
                );
                let failed_attempts = match self.store.record_failed_attempt(entry.entry_id).await
                {
                    Ok(value) => value,
                    Err(AdmissionStoreError::PendingEntryNotFound(_)) => {
                        debug!(
                            entry_id = entry.entry_id,
                            "entry removed by a concurrent run"
                        );
                        return Ok(EntryOutcome::Failed {
                            reason: error.to_string(),
                            pruned: false,
                        });
                    }
                    Err(other) => return Err(other.into()),
                };
                let pruned = self.policy.should_prune(failed_attempts);
                if pruned {
                    self.store.delete(entry.entry_id).await?;
                    info!(
                        destination_id = entry.destination_id,
                        subject_id = entry.subject_id,
                        failed_attempts,
                        "pruned pending entry after repeated failures"
                    );
                }
                Ok(EntryOutcome::Failed {
                    reason: error.to_string(),
                    pruned,
                })
            }
        }
    }
}
