//! SQLite-backed admission store with durable persistence.

use crate::{
    AdmissionMode, AdmissionStoreError, ModeStore, PendingEntry, PendingQueueStore,
    PrincipalRecord, RegistrationStore, StoreResult, GLOBAL_MODE_KEY,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent SQLite store backend used by the gateway.
#[derive(Debug)]
pub struct SqliteAdmissionStore {
    db_path: PathBuf,
}

impl SqliteAdmissionStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS principals (
                principal_id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS principal_destinations (
                principal_id INTEGER NOT NULL,
                destination_id INTEGER NOT NULL,
                added_at TEXT NOT NULL,
                PRIMARY KEY (principal_id, destination_id),
                FOREIGN KEY(principal_id) REFERENCES principals(principal_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_principal_destinations_destination
                ON principal_destinations (destination_id);

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pending_entries (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                destination_id INTEGER NOT NULL,
                subject_id INTEGER NOT NULL,
                requested_at TEXT NOT NULL,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                UNIQUE (destination_id, subject_id)
            );
            "#,
        )?;
        Ok(())
    }
}

fn ensure_principal(connection: &Connection, principal_id: i64) -> StoreResult<()> {
    connection.execute(
        "INSERT OR IGNORE INTO principals (principal_id, created_at) VALUES (?1, ?2)",
        params![principal_id, timestamp_to_db(Utc::now())],
    )?;
    Ok(())
}

#[async_trait]
impl RegistrationStore for SqliteAdmissionStore {
    async fn get_or_create(&self, principal_id: i64) -> StoreResult<PrincipalRecord> {
        let connection = self.open_connection()?;
        ensure_principal(&connection, principal_id)?;

        let mut statement = connection.prepare(
            "SELECT destination_id FROM principal_destinations WHERE principal_id = ?1",
        )?;
        let mut rows = statement.query(params![principal_id])?;
        let mut principal = PrincipalRecord::new(principal_id);
        while let Some(row) = rows.next()? {
            principal.destinations.insert(row.get(0)?);
        }
        Ok(principal)
    }

    async fn add_destination(&self, principal_id: i64, destination_id: i64) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        ensure_principal(&connection, principal_id)?;
        let inserted = connection.execute(
            r#"
            INSERT OR IGNORE INTO principal_destinations (principal_id, destination_id, added_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![principal_id, destination_id, timestamp_to_db(Utc::now())],
        )?;
        Ok(inserted == 1)
    }

    async fn remove_destination(
        &self,
        principal_id: i64,
        destination_id: i64,
    ) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM principal_destinations WHERE principal_id = ?1 AND destination_id = ?2",
            params![principal_id, destination_id],
        )?;
        Ok(removed == 1)
    }

    async fn is_destination_registered(&self, destination_id: i64) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let found = connection
            .query_row(
                "SELECT 1 FROM principal_destinations WHERE destination_id = ?1 LIMIT 1",
                params![destination_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl ModeStore for SqliteAdmissionStore {
    async fn read_mode(&self) -> StoreResult<AdmissionMode> {
        let connection = self.open_connection()?;
        let value: Option<String> = connection
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![GLOBAL_MODE_KEY],
                |row| row.get(0),
            )
            .optional()?;
        value
            .as_deref()
            .map(admission_mode_from_db)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    async fn write_mode(&self, mode: AdmissionMode) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![GLOBAL_MODE_KEY, mode.as_str(), timestamp_to_db(Utc::now())],
        )?;
        Ok(())
    }

    async fn initialize_mode(&self) -> StoreResult<AdmissionMode> {
        {
            let connection = self.open_connection()?;
            connection.execute(
                "INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    GLOBAL_MODE_KEY,
                    AdmissionMode::default().as_str(),
                    timestamp_to_db(Utc::now())
                ],
            )?;
        }
        self.read_mode().await
    }
}

#[async_trait]
impl PendingQueueStore for SqliteAdmissionStore {
    async fn insert_if_absent(
        &self,
        destination_id: i64,
        subject_id: i64,
        requested_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            r#"
            INSERT INTO pending_entries (destination_id, subject_id, requested_at, failed_attempts)
            VALUES (?1, ?2, ?3, 0)
            ON CONFLICT(destination_id, subject_id) DO NOTHING
            "#,
            params![destination_id, subject_id, timestamp_to_db(requested_at)],
        )?;
        Ok(inserted == 1)
    }

    async fn find_all(&self, destination_id: i64) -> StoreResult<Vec<PendingEntry>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT entry_id, destination_id, subject_id, requested_at, failed_attempts
            FROM pending_entries
            WHERE destination_id = ?1
            ORDER BY entry_id ASC
            "#,
        )?;
        let mut rows = statement.query(params![destination_id])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(PendingEntry {
                entry_id: row.get(0)?,
                destination_id: row.get(1)?,
                subject_id: row.get(2)?,
                requested_at: timestamp_from_db(&row.get::<_, String>(3)?)?,
                failed_attempts: i64_to_u32("failed_attempts", row.get(4)?)?,
            });
        }
        Ok(entries)
    }

    async fn delete(&self, entry_id: i64) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM pending_entries WHERE entry_id = ?1",
            params![entry_id],
        )?;
        Ok(removed == 1)
    }

    async fn record_failed_attempt(&self, entry_id: i64) -> StoreResult<u32> {
        let connection = self.open_connection()?;
        let failed_attempts: Option<i64> = connection
            .query_row(
                r#"
                UPDATE pending_entries
                SET failed_attempts = failed_attempts + 1
                WHERE entry_id = ?1
                RETURNING failed_attempts
                "#,
                params![entry_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(failed_attempts) = failed_attempts else {
            return Err(AdmissionStoreError::PendingEntryNotFound(entry_id));
        };
        i64_to_u32("failed_attempts", failed_attempts)
    }

    async fn count_pending(&self, destination_id: i64) -> StoreResult<usize> {
        let connection = self.open_connection()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM pending_entries WHERE destination_id = ?1",
            params![destination_id],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| AdmissionStoreError::InvalidPersistedValue {
            field: "pending_count",
            value: count.to_string(),
        })
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn admission_mode_from_db(value: &str) -> StoreResult<AdmissionMode> {
    match value {
        "immediate" => Ok(AdmissionMode::Immediate),
        "queued" => Ok(AdmissionMode::Queued),
        _ => Err(AdmissionStoreError::InvalidPersistedValue {
            field: "global_mode",
            value: value.to_string(),
        }),
    }
}

fn i64_to_u32(field: &'static str, value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| AdmissionStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::SqliteAdmissionStore;
    use crate::{AdmissionMode, ModeStore, PendingQueueStore, RegistrationStore};
    use chrono::{TimeZone, Utc};
    use rusqlite::{params, Connection};
    use tempfile::tempdir;

    #[tokio::test]
    async fn persists_registrations_mode_and_queue_across_reopen() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("state").join("gatekeeper.sqlite");
        let requested_at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

        {
            let store = SqliteAdmissionStore::new(&db_path).expect("create sqlite store");
            assert_eq!(
                store.initialize_mode().await.expect("init mode"),
                AdmissionMode::Immediate
            );
            store
                .add_destination(11, -1001234)
                .await
                .expect("add destination");
            store
                .write_mode(AdmissionMode::Queued)
                .await
                .expect("write mode");
            assert!(store
                .insert_if_absent(-1001234, 77, requested_at)
                .await
                .expect("insert pending"));
        }

        let reopened = SqliteAdmissionStore::new(&db_path).expect("reopen sqlite store");
        assert_eq!(
            reopened.initialize_mode().await.expect("init mode"),
            AdmissionMode::Queued
        );
        assert!(reopened
            .is_destination_registered(-1001234)
            .await
            .expect("registered"));
        let entries = reopened.find_all(-1001234).await.expect("find");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject_id, 77);
        assert_eq!(entries[0].requested_at, requested_at);
        assert_eq!(entries[0].failed_attempts, 0);
    }

    #[tokio::test]
    async fn registration_is_idempotent_and_scoped_per_principal() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteAdmissionStore::new(temp.path().join("gk.sqlite")).expect("store");

        assert!(store.add_destination(1, -1001).await.expect("add"));
        assert!(!store.add_destination(1, -1001).await.expect("add again"));
        store.add_destination(2, -1001).await.expect("add p2");

        let principal = store.get_or_create(1).await.expect("principal");
        assert_eq!(principal.destinations.len(), 1);

        assert!(store.remove_destination(1, -1001).await.expect("remove"));
        assert!(store
            .is_destination_registered(-1001)
            .await
            .expect("still registered"));
        assert!(!store
            .is_destination_registered(-1009)
            .await
            .expect("unknown destination"));

        let fresh = store.get_or_create(3).await.expect("lazy principal");
        assert!(fresh.destinations.is_empty());
    }

    #[tokio::test]
    async fn pending_queue_dedups_counts_failures_and_deletes() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteAdmissionStore::new(temp.path().join("gk.sqlite")).expect("store");

        assert!(store
            .insert_if_absent(-1001, 5, Utc::now())
            .await
            .expect("insert"));
        assert!(!store
            .insert_if_absent(-1001, 5, Utc::now())
            .await
            .expect("duplicate"));
        assert!(store
            .insert_if_absent(-1001, 6, Utc::now())
            .await
            .expect("second subject"));
        assert_eq!(store.count_pending(-1001).await.expect("count"), 2);

        let entries = store.find_all(-1001).await.expect("find");
        assert_eq!(
            entries.iter().map(|e| e.subject_id).collect::<Vec<_>>(),
            vec![5, 6]
        );
        assert_eq!(
            store
                .record_failed_attempt(entries[0].entry_id)
                .await
                .expect("fail"),
            1
        );
        assert!(store.delete(entries[1].entry_id).await.expect("delete"));
        assert!(!store.delete(entries[1].entry_id).await.expect("delete again"));
        assert!(store.record_failed_attempt(entries[1].entry_id).await.is_err());

        let remaining = store.find_all(-1001).await.expect("find");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].failed_attempts, 1);
    }

    #[tokio::test]
    async fn rejects_unknown_persisted_mode() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("gk.sqlite");
        let store = SqliteAdmissionStore::new(&db_path).expect("store");
        Connection::open(&db_path)
            .expect("open")
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES ('global_mode', 'paused', 'x')",
                params![],
            )
            .expect("seed invalid mode");

        let error = store.read_mode().await.expect_err("invalid mode");
        assert!(error.to_string().contains("global_mode"));
    }
}
