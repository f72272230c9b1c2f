//! Admission store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;
mod types;

pub use sqlite::SqliteAdmissionStore;
pub use types::{
    AdmissionMode, ParseAdmissionModeError, PendingEntry, PrincipalRecord, GLOBAL_MODE_KEY,
};

/// Result type for admission store operations.
pub type StoreResult<T> = Result<T, AdmissionStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum AdmissionStoreError {
    #[error("pending entry '{0}' not found")]
    PendingEntryNotFound(i64),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Principal -> destinations mapping used to scope admission automation.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Loads the principal, creating an empty record on first interaction.
    async fn get_or_create(&self, principal_id: i64) -> StoreResult<PrincipalRecord>;
    /// Adds `destination_id` to the principal's set. Returns false when it was already present.
    async fn add_destination(&self, principal_id: i64, destination_id: i64) -> StoreResult<bool>;
    /// Removes `destination_id` from the principal's set. Returns false when it was absent.
    async fn remove_destination(&self, principal_id: i64, destination_id: i64)
        -> StoreResult<bool>;
    /// True when any principal holds `destination_id`.
    async fn is_destination_registered(&self, destination_id: i64) -> StoreResult<bool>;
}

/// Singleton global admission mode.
#[async_trait]
pub trait ModeStore: Send + Sync {
    /// Reads the current mode, falling back to [`AdmissionMode::Immediate`] when unset.
    async fn read_mode(&self) -> StoreResult<AdmissionMode>;
    /// Upserts the singleton mode record.
    async fn write_mode(&self, mode: AdmissionMode) -> StoreResult<()>;
    /// Creates the singleton with the default mode if absent and returns the effective mode.
    async fn initialize_mode(&self) -> StoreResult<AdmissionMode>;
}

/// Deduplicated queue of deferred join requests.
#[async_trait]
pub trait PendingQueueStore: Send + Sync {
    /// Atomically inserts an entry unless one exists for `(destination_id, subject_id)`.
    async fn insert_if_absent(
        &self,
        destination_id: i64,
        subject_id: i64,
        requested_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Returns every entry queued for `destination_id`, oldest first.
    async fn find_all(&self, destination_id: i64) -> StoreResult<Vec<PendingEntry>>;
    /// Deletes one entry. Returns false when it no longer exists.
    async fn delete(&self, entry_id: i64) -> StoreResult<bool>;
    /// Increments the failed-attempt counter and returns the new value.
    async fn record_failed_attempt(&self, entry_id: i64) -> StoreResult<u32>;
    async fn count_pending(&self, destination_id: i64) -> StoreResult<usize>;
}

/// Everything the admission core needs from persistence.
pub trait AdmissionStore: RegistrationStore + ModeStore + PendingQueueStore {}

impl<T> AdmissionStore for T where T: RegistrationStore + ModeStore + PendingQueueStore {}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryAdmissionStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    principals: HashMap<i64, PrincipalRecord>,
    mode: Option<AdmissionMode>,
    pending: BTreeMap<i64, PendingEntry>,
    pending_index: HashMap<(i64, i64), i64>,
    next_entry_id: i64,
}

impl InMemoryAdmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryAdmissionStore {
    async fn get_or_create(&self, principal_id: i64) -> StoreResult<PrincipalRecord> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .principals
            .entry(principal_id)
            .or_insert_with(|| PrincipalRecord::new(principal_id))
            .clone())
    }

    async fn add_destination(&self, principal_id: i64, destination_id: i64) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .principals
            .entry(principal_id)
            .or_insert_with(|| PrincipalRecord::new(principal_id))
            .destinations
            .insert(destination_id))
    }

    async fn remove_destination(
        &self,
        principal_id: i64,
        destination_id: i64,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .principals
            .get_mut(&principal_id)
            .is_some_and(|principal| principal.destinations.remove(&destination_id)))
    }

    async fn is_destination_registered(&self, destination_id: i64) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .principals
            .values()
            .any(|principal| principal.destinations.contains(&destination_id)))
    }
}

#[async_trait]
impl ModeStore for InMemoryAdmissionStore {
    async fn read_mode(&self) -> StoreResult<AdmissionMode> {
        let inner = self.inner.read().await;
        Ok(inner.mode.unwrap_or_default())
    }

    async fn write_mode(&self, mode: AdmissionMode) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.mode = Some(mode);
        Ok(())
    }

    async fn initialize_mode(&self) -> StoreResult<AdmissionMode> {
        let mut inner = self.inner.write().await;
        Ok(*inner.mode.get_or_insert_with(AdmissionMode::default))
    }
}

#[async_trait]
impl PendingQueueStore for InMemoryAdmissionStore {
    async fn insert_if_absent(
        &self,
        destination_id: i64,
        subject_id: i64,
        requested_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner
            .pending_index
            .contains_key(&(destination_id, subject_id))
        {
            return Ok(false);
        }

        inner.next_entry_id += 1;
        let entry_id = inner.next_entry_id;
        inner
            .pending_index
            .insert((destination_id, subject_id), entry_id);
        inner.pending.insert(
            entry_id,
            PendingEntry {
                entry_id,
                destination_id,
                subject_id,
                requested_at,
                failed_attempts: 0,
            },
        );
        Ok(true)
    }

    async fn find_all(&self, destination_id: i64) -> StoreResult<Vec<PendingEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pending
            .values()
            .filter(|entry| entry.destination_id == destination_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, entry_id: i64) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.pending.remove(&entry_id) else {
            return Ok(false);
        };
        inner
            .pending_index
            .remove(&(entry.destination_id, entry.subject_id));
        Ok(true)
    }

    async fn record_failed_attempt(&self, entry_id: i64) -> StoreResult<u32> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .pending
            .get_mut(&entry_id)
            .ok_or(AdmissionStoreError::PendingEntryNotFound(entry_id))?;
        entry.failed_attempts = entry.failed_attempts.saturating_add(1);
        Ok(entry.failed_attempts)
    }

    async fn count_pending(&self, destination_id: i64) -> StoreResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .pending
            .values()
            .filter(|entry| entry.destination_id == destination_id)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AdmissionMode, InMemoryAdmissionStore, ModeStore, PendingQueueStore, RegistrationStore,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn registering_same_destination_twice_keeps_one_occurrence() {
        let store = InMemoryAdmissionStore::new();
        assert!(store.add_destination(7, -1001).await.expect("first add"));
        assert!(!store.add_destination(7, -1001).await.expect("second add"));

        let principal = store.get_or_create(7).await.expect("principal");
        assert_eq!(principal.destinations.len(), 1);
        assert!(principal.destinations.contains(&-1001));
    }

    #[tokio::test]
    async fn destination_stays_registered_while_another_principal_holds_it() {
        let store = InMemoryAdmissionStore::new();
        store.add_destination(1, -1001).await.expect("add p1");
        store.add_destination(2, -1001).await.expect("add p2");

        assert!(store.remove_destination(1, -1001).await.expect("remove p1"));
        assert!(store
            .is_destination_registered(-1001)
            .await
            .expect("registered"));

        assert!(store.remove_destination(2, -1001).await.expect("remove p2"));
        assert!(!store
            .is_destination_registered(-1001)
            .await
            .expect("registered"));
        assert!(!store.remove_destination(2, -1001).await.expect("remove again"));
    }

    #[tokio::test]
    async fn get_or_create_starts_with_empty_destination_set() {
        let store = InMemoryAdmissionStore::new();
        let principal = store.get_or_create(42).await.expect("principal");
        assert_eq!(principal.principal_id, 42);
        assert!(principal.destinations.is_empty());
    }

    #[tokio::test]
    async fn mode_defaults_to_immediate_and_initializes_once() {
        let store = InMemoryAdmissionStore::new();
        assert_eq!(store.read_mode().await.expect("read"), AdmissionMode::Immediate);

        store
            .write_mode(AdmissionMode::Queued)
            .await
            .expect("write");
        assert_eq!(
            store.initialize_mode().await.expect("init"),
            AdmissionMode::Queued
        );
        assert_eq!(store.read_mode().await.expect("read"), AdmissionMode::Queued);
    }

    #[tokio::test]
    async fn insert_if_absent_dedups_by_destination_and_subject() {
        let store = InMemoryAdmissionStore::new();
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert!(store.insert_if_absent(-1001, 5, at).await.expect("insert"));
        assert!(!store.insert_if_absent(-1001, 5, at).await.expect("dup"));
        assert!(store.insert_if_absent(-1002, 5, at).await.expect("other dest"));

        let entries = store.find_all(-1001).await.expect("find");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject_id, 5);
        assert_eq!(entries[0].requested_at, at);
        assert_eq!(store.count_pending(-1002).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_inserts_create_a_single_entry() {
        let store = Arc::new(InMemoryAdmissionStore::new());
        let handles = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_if_absent(-1001, 9, Utc::now())
                        .await
                        .expect("insert")
                })
            })
            .collect::<Vec<_>>();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.expect("join") {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.count_pending(-1001).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn delete_frees_the_pair_for_requeue_and_counts_failures() {
        let store = InMemoryAdmissionStore::new();
        store
            .insert_if_absent(-1001, 5, Utc::now())
            .await
            .expect("insert");
        let entry = store.find_all(-1001).await.expect("find").remove(0);

        assert_eq!(
            store
                .record_failed_attempt(entry.entry_id)
                .await
                .expect("fail 1"),
            1
        );
        assert_eq!(
            store
                .record_failed_attempt(entry.entry_id)
                .await
                .expect("fail 2"),
            2
        );
        assert!(store.delete(entry.entry_id).await.expect("delete"));
        assert!(!store.delete(entry.entry_id).await.expect("delete again"));
        assert!(store.record_failed_attempt(entry.entry_id).await.is_err());

        assert!(store
            .insert_if_absent(-1001, 5, Utc::now())
            .await
            .expect("requeue"));
    }

    #[tokio::test]
    async fn find_all_returns_entries_in_creation_order() {
        let store = InMemoryAdmissionStore::new();
        for subject in [30, 10, 20] {
            store
                .insert_if_absent(-1001, subject, Utc::now())
                .await
                .expect("insert");
        }
        let subjects = store
            .find_all(-1001)
            .await
            .expect("find")
            .into_iter()
            .map(|entry| entry.subject_id)
            .collect::<Vec<_>>();
        assert_eq!(subjects, vec![30, 10, 20]);
    }
}
