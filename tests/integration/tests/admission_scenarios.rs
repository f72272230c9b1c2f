use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use gatekeeper_admission::{
    AdmissionDecision, AdmissionEngine, BatchApprovalWorkflow, BatchPolicy, BatchTally,
    BatchTrigger, JoinRequestEvent, MembershipPlatform, OperatorAuthorizer, PlatformError,
    RegistrationOutcome, RegistrationPolicy, RegistrationService, UnlinkOutcome,
};
use gatekeeper_store::{
    AdmissionMode, AdmissionStore, InMemoryAdmissionStore, SqliteAdmissionStore,
};
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;

const OWNER: i64 = 1;
const BOT: i64 = 500;
const PRINCIPAL: i64 = 7;
const DEST: i64 = -1001234567890;

#[derive(Default)]
struct ScriptedPlatform {
    rejected_subjects: AsyncMutex<HashSet<i64>>,
    admins: AsyncMutex<HashMap<i64, HashSet<i64>>>,
    approvals: AsyncMutex<Vec<(i64, i64)>>,
    admin_checks: AsyncMutex<usize>,
}

impl ScriptedPlatform {
    async fn reject(&self, subject_id: i64) {
        self.rejected_subjects.lock().await.insert(subject_id);
    }

    async fn accept(&self, subject_id: i64) {
        self.rejected_subjects.lock().await.remove(&subject_id);
    }

    async fn grant_admin(&self, destination_id: i64, principal_id: i64) {
        self.admins
            .lock()
            .await
            .entry(destination_id)
            .or_default()
            .insert(principal_id);
    }

    async fn approvals(&self) -> Vec<(i64, i64)> {
        self.approvals.lock().await.clone()
    }
}

#[async_trait]
impl MembershipPlatform for ScriptedPlatform {
    async fn approve_join_request(
        &self,
        destination_id: i64,
        subject_id: i64,
    ) -> Result<(), PlatformError> {
        self.approvals
            .lock()
            .await
            .push((destination_id, subject_id));
        if self.rejected_subjects.lock().await.contains(&subject_id) {
            return Err(PlatformError::Rejected {
                operation: "approveChatJoinRequest",
                description: "Bad Request: USER_ALREADY_PARTICIPANT".to_string(),
            });
        }
        Ok(())
    }

    async fn is_admin(
        &self,
        destination_id: i64,
        principal_id: i64,
    ) -> Result<bool, PlatformError> {
        *self.admin_checks.lock().await += 1;
        Ok(self
            .admins
            .lock()
            .await
            .get(&destination_id)
            .is_some_and(|admins| admins.contains(&principal_id)))
    }
}

struct Harness {
    store: Arc<dyn AdmissionStore>,
    platform: Arc<ScriptedPlatform>,
    engine: AdmissionEngine,
    registration: RegistrationService,
    _workspace: Option<TempDir>,
}

impl Harness {
    async fn new(backend: &str) -> Self {
        let (store, workspace): (Arc<dyn AdmissionStore>, Option<TempDir>) = match backend {
            "sqlite" => {
                let workspace = tempfile::tempdir().expect("tempdir");
                let store: Arc<dyn AdmissionStore> = Arc::new(
                    SqliteAdmissionStore::new(workspace.path().join("gatekeeper.sqlite"))
                        .expect("sqlite store"),
                );
                (store, Some(workspace))
            }
            _ => {
                let store: Arc<dyn AdmissionStore> = Arc::new(InMemoryAdmissionStore::new());
                (store, None)
            }
        };
        store.initialize_mode().await.expect("initialize mode");

        let platform = Arc::new(ScriptedPlatform::default());
        platform.grant_admin(DEST, BOT).await;
        let engine = AdmissionEngine::new(store.clone(), platform.clone());
        let registration = RegistrationService::new(
            store.clone(),
            platform.clone(),
            RegistrationPolicy {
                max_destinations_per_principal: 3,
                bot_user_id: BOT,
            },
        );
        Self {
            store,
            platform,
            engine,
            registration,
            _workspace: workspace,
        }
    }

    fn batch(&self, policy: BatchPolicy) -> BatchApprovalWorkflow {
        BatchApprovalWorkflow::new(self.store.clone(), self.platform.clone(), policy)
    }

    async fn join(&self, destination_id: i64, subject_id: i64) -> AdmissionDecision {
        let event = JoinRequestEvent::new(destination_id, subject_id, Utc::now()).expect("event");
        self.engine
            .handle_join_request(&event)
            .await
            .expect("handle join request")
    }
}

fn tally(total: usize, succeeded: usize, failed: usize, pruned: usize) -> BatchTally {
    BatchTally {
        total,
        succeeded,
        failed,
        pruned,
    }
}

async fn immediate_then_queued_scenario(backend: &str) {
    let harness = Harness::new(backend).await;
    assert_eq!(
        harness
            .registration
            .register(PRINCIPAL, DEST)
            .await
            .expect("register"),
        RegistrationOutcome::Registered
    );

    assert_eq!(harness.join(DEST, 100).await, AdmissionDecision::Approved);
    assert_eq!(harness.platform.approvals().await, vec![(DEST, 100)]);
    assert_eq!(harness.store.count_pending(DEST).await.expect("count"), 0);

    harness
        .engine
        .set_mode(AdmissionMode::Queued)
        .await
        .expect("queued");
    assert_eq!(harness.join(DEST, 200).await, AdmissionDecision::Queued);
    assert_eq!(harness.join(DEST, 200).await, AdmissionDecision::AlreadyQueued);
    assert_eq!(harness.store.count_pending(DEST).await.expect("count"), 1);
    assert_eq!(harness.platform.approvals().await.len(), 1);

    let report = harness
        .batch(BatchPolicy::default())
        .run(DEST)
        .await
        .expect("batch");
    assert_eq!(report.tally, tally(1, 1, 0, 0));
    assert_eq!(harness.store.count_pending(DEST).await.expect("count"), 0);
}

#[tokio::test]
async fn immediate_then_queued_scenario_in_memory() {
    immediate_then_queued_scenario("memory").await;
}

#[tokio::test]
async fn immediate_then_queued_scenario_on_sqlite() {
    immediate_then_queued_scenario("sqlite").await;
}

async fn partial_failure_retention_scenario(backend: &str) {
    let harness = Harness::new(backend).await;
    harness
        .registration
        .register(PRINCIPAL, DEST)
        .await
        .expect("register");
    harness
        .engine
        .set_mode(AdmissionMode::Queued)
        .await
        .expect("queued");
    for subject_id in [301, 302, 303, 304] {
        assert_eq!(harness.join(DEST, subject_id).await, AdmissionDecision::Queued);
    }
    harness.platform.reject(302).await;
    harness.platform.reject(304).await;
    let batch = harness.batch(BatchPolicy::default());

    let first = batch.run(DEST).await.expect("first run");
    assert_eq!(first.tally, tally(4, 2, 2, 0));
    let remaining = harness.store.find_all(DEST).await.expect("remaining");
    assert_eq!(
        remaining
            .iter()
            .map(|entry| entry.subject_id)
            .collect::<Vec<_>>(),
        vec![302, 304]
    );

    harness.platform.accept(302).await;
    harness.platform.accept(304).await;
    let second = batch.run(DEST).await.expect("second run");
    assert_eq!(second.tally, tally(2, 2, 0, 0));

    let third = batch.run(DEST).await.expect("third run");
    assert_eq!(third.tally, BatchTally::default());
}

#[tokio::test]
async fn partial_failure_retention_in_memory() {
    partial_failure_retention_scenario("memory").await;
}

#[tokio::test]
async fn partial_failure_retention_on_sqlite() {
    partial_failure_retention_scenario("sqlite").await;
}

#[tokio::test]
async fn unregistered_destinations_never_reach_the_platform_or_queue() {
    let harness = Harness::new("sqlite").await;
    for mode in [AdmissionMode::Immediate, AdmissionMode::Queued] {
        harness.engine.set_mode(mode).await.expect("mode");
        assert_eq!(
            harness.join(-1009, 5).await,
            AdmissionDecision::IgnoredUnregistered
        );
    }
    assert!(harness.platform.approvals().await.is_empty());
    assert_eq!(harness.store.count_pending(-1009).await.expect("count"), 0);
}

#[tokio::test]
async fn repeatedly_failing_entries_are_pruned_at_the_limit() {
    let harness = Harness::new("sqlite").await;
    harness
        .registration
        .register(PRINCIPAL, DEST)
        .await
        .expect("register");
    harness
        .engine
        .set_mode(AdmissionMode::Queued)
        .await
        .expect("queued");
    harness.join(DEST, 401).await;
    harness.platform.reject(401).await;
    let batch = harness.batch(BatchPolicy::from_limit(2));

    assert_eq!(batch.run(DEST).await.expect("first").tally, tally(1, 0, 1, 0));
    assert_eq!(
        harness.store.find_all(DEST).await.expect("entries")[0].failed_attempts,
        1
    );
    assert_eq!(batch.run(DEST).await.expect("second").tally, tally(1, 0, 1, 1));
    assert_eq!(harness.store.count_pending(DEST).await.expect("count"), 0);
}

#[tokio::test]
async fn batch_trigger_is_limited_to_destination_admins_and_the_owner() {
    let harness = Harness::new("memory").await;
    harness
        .registration
        .register(PRINCIPAL, DEST)
        .await
        .expect("register");
    harness
        .engine
        .set_mode(AdmissionMode::Queued)
        .await
        .expect("queued");
    harness.join(DEST, 501).await;
    let authorizer = OperatorAuthorizer::new(OWNER);
    let batch = harness.batch(BatchPolicy::default());

    let denied = batch
        .trigger(&authorizer, DEST, 8)
        .await
        .expect("trigger");
    assert!(matches!(denied, BatchTrigger::Denied(_)));
    assert!(harness.platform.approvals().await.is_empty());
    assert_eq!(harness.store.count_pending(DEST).await.expect("count"), 1);

    harness.platform.grant_admin(DEST, 8).await;
    let BatchTrigger::Completed(report) = batch
        .trigger(&authorizer, DEST, 8)
        .await
        .expect("trigger")
    else {
        panic!("destination admin should be allowed");
    };
    assert_eq!(report.tally, tally(1, 1, 0, 0));

    let owner_checks_before = *harness.platform.admin_checks.lock().await;
    let owner = batch
        .trigger(&authorizer, DEST, OWNER)
        .await
        .expect("trigger");
    assert!(matches!(owner, BatchTrigger::Completed(_)));
    assert_eq!(
        *harness.platform.admin_checks.lock().await,
        owner_checks_before
    );
}

#[tokio::test]
async fn shared_destinations_stay_registered_until_every_principal_unlinks() {
    let harness = Harness::new("sqlite").await;
    for principal_id in [PRINCIPAL, 8] {
        assert_eq!(
            harness
                .registration
                .register(principal_id, DEST)
                .await
                .expect("register"),
            RegistrationOutcome::Registered
        );
    }

    assert_eq!(
        harness
            .registration
            .unlink(PRINCIPAL, DEST)
            .await
            .expect("unlink"),
        UnlinkOutcome::Removed
    );
    assert_eq!(harness.join(DEST, 600).await, AdmissionDecision::Approved);

    harness.registration.unlink(8, DEST).await.expect("unlink");
    assert_eq!(
        harness.join(DEST, 601).await,
        AdmissionDecision::IgnoredUnregistered
    );
}
