//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult, map_unique_violation};
use crate::repos::{AssignmentRepo, AssignmentTx, IdentityRepo, ResourceRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: IdentityRepo + ResourceRepo + AssignmentRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    ///
    /// `query_timeout_secs` bounds how long a caller waits for the connection.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(30);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes every unit of work, so an open
            // assignment transaction blocks other writers at acquire time.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "opened SQLite metadata store"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open assignment transaction on SQLite.
pub struct SqliteAssignmentTx {
    tx: Transaction<'static, Sqlite>,
}

// Trait implementations in a separate module for organization
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;

    #[async_trait]
    impl IdentityRepo for SqliteStore {
        async fn create_identity(&self, identity: &IdentityRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO identities (
                    identity_key, full_name, registration_no, assigned_resource_key,
                    photo_path, assigned_at, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&identity.identity_key)
            .bind(&identity.full_name)
            .bind(&identity.registration_no)
            .bind(&identity.assigned_resource_key)
            .bind(&identity.photo_path)
            .bind(identity.assigned_at)
            .bind(identity.created_at)
            .bind(identity.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_unique_violation(e, || {
                    format!("identity {} already exists", identity.identity_key)
                })
            })?;
            Ok(())
        }

        async fn upsert_identity(&self, identity: &IdentityRow) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM identities WHERE identity_key = ?)")
                    .bind(&identity.identity_key)
                    .fetch_one(&mut *tx)
                    .await?;

            if exists {
                sqlx::query(
                    r#"
                    UPDATE identities
                    SET full_name = ?, registration_no = ?, updated_at = ?
                    WHERE identity_key = ?
                    "#,
                )
                .bind(&identity.full_name)
                .bind(&identity.registration_no)
                .bind(identity.updated_at)
                .bind(&identity.identity_key)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO identities (
                        identity_key, full_name, registration_no, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&identity.identity_key)
                .bind(&identity.full_name)
                .bind(&identity.registration_no)
                .bind(identity.created_at)
                .bind(identity.updated_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(!exists)
        }

        async fn get_identity(&self, identity_key: &str) -> MetadataResult<Option<IdentityRow>> {
            let row =
                sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE identity_key = ?")
                    .bind(identity_key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn count_identities(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identities")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }

        async fn count_assigned_identities(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM identities WHERE assigned_resource_key IS NOT NULL",
            )
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl ResourceRepo for SqliteStore {
        async fn create_resource(&self, resource: &ResourceRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO resources (
                    resource_key, file_path, file_size, content_type,
                    claimed, claimed_at, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&resource.resource_key)
            .bind(&resource.file_path)
            .bind(resource.file_size)
            .bind(&resource.content_type)
            .bind(resource.claimed)
            .bind(resource.claimed_at)
            .bind(resource.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_unique_violation(e, || {
                    format!("resource {} already exists", resource.resource_key)
                })
            })?;
            Ok(())
        }

        async fn get_resource(&self, resource_key: &str) -> MetadataResult<Option<ResourceRow>> {
            let row =
                sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE resource_key = ?")
                    .bind(resource_key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn find_unclaimed(&self, resource_key: &str) -> MetadataResult<Option<ResourceRow>> {
            let row = sqlx::query_as::<_, ResourceRow>(
                "SELECT * FROM resources WHERE resource_key = ? AND claimed = 0",
            )
            .bind(resource_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_unclaimed(
            &self,
            offset: u64,
            limit: u64,
        ) -> MetadataResult<Vec<ResourceRow>> {
            let rows = sqlx::query_as::<_, ResourceRow>(
                "SELECT * FROM resources WHERE claimed = 0 ORDER BY resource_key LIMIT ? OFFSET ?",
            )
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_unclaimed(&self) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM resources WHERE claimed = 0")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn count_resources(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }

        async fn delete_unclaimed_resource(
            &self,
            resource_key: &str,
        ) -> MetadataResult<ResourceRow> {
            let mut tx = self.pool.begin().await?;

            let row =
                sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE resource_key = ?")
                    .bind(resource_key)
                    .fetch_optional(&mut *tx)
                    .await?;

            let Some(row) = row else {
                tx.rollback().await?;
                return Err(MetadataError::NotFound(format!(
                    "resource {resource_key} not found"
                )));
            };

            let result = sqlx::query("DELETE FROM resources WHERE resource_key = ? AND claimed = 0")
                .bind(resource_key)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(MetadataError::Conflict(format!(
                    "resource {resource_key} is claimed"
                )));
            }

            tx.commit().await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl AssignmentRepo for SqliteStore {
        async fn begin_assignment(&self) -> MetadataResult<Box<dyn AssignmentTx>> {
            let tx = self.pool.begin().await?;
            Ok(Box::new(SqliteAssignmentTx { tx }))
        }
    }

    #[async_trait]
    impl AssignmentTx for SqliteAssignmentTx {
        async fn find_identity(
            &mut self,
            identity_key: &str,
        ) -> MetadataResult<Option<IdentityRow>> {
            let row =
                sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE identity_key = ?")
                    .bind(identity_key)
                    .fetch_optional(&mut *self.tx)
                    .await?;
            Ok(row)
        }

        async fn find_resource(
            &mut self,
            resource_key: &str,
        ) -> MetadataResult<Option<ResourceRow>> {
            let row =
                sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE resource_key = ?")
                    .bind(resource_key)
                    .fetch_optional(&mut *self.tx)
                    .await?;
            Ok(row)
        }

        async fn claim_resource(
            &mut self,
            resource_key: &str,
            claimed_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE resources SET claimed = 1, claimed_at = ?
                WHERE resource_key = ? AND claimed = 0
                "#,
            )
            .bind(claimed_at)
            .bind(resource_key)
            .execute(&mut *self.tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::Conflict(format!(
                    "resource {resource_key} is not available to claim"
                )));
            }
            Ok(())
        }

        async fn release_resource(&mut self, resource_key: &str) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE resources SET claimed = 0, claimed_at = NULL
                WHERE resource_key = ? AND claimed = 1
                "#,
            )
            .bind(resource_key)
            .execute(&mut *self.tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "claimed resource {resource_key} not found"
                )));
            }
            Ok(())
        }

        async fn photo_path_in_use(&mut self, photo_path: &str) -> MetadataResult<bool> {
            let in_use: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM identities WHERE photo_path = ?)")
                    .bind(photo_path)
                    .fetch_one(&mut *self.tx)
                    .await?;
            Ok(in_use)
        }

        async fn link_resource(
            &mut self,
            identity_key: &str,
            resource_key: &str,
            photo_path: &str,
            assigned_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE identities
                SET assigned_resource_key = ?, photo_path = ?, assigned_at = ?
                WHERE identity_key = ? AND assigned_resource_key IS NULL
                "#,
            )
            .bind(resource_key)
            .bind(photo_path)
            .bind(assigned_at)
            .bind(identity_key)
            .execute(&mut *self.tx)
            .await;

            let result = match result {
                Ok(result) => result,
                Err(sqlx::Error::Database(db_err)) => {
                    let msg = db_err.message();
                    if msg.contains("UNIQUE constraint") {
                        return Err(MetadataError::Constraint(format!(
                            "resource {resource_key} or path {photo_path} is already linked"
                        )));
                    }
                    return Err(MetadataError::Database(sqlx::Error::Database(db_err)));
                }
                Err(e) => return Err(e.into()),
            };

            if result.rows_affected() == 0 {
                return Err(MetadataError::Conflict(format!(
                    "identity {identity_key} is missing or already linked"
                )));
            }
            Ok(())
        }

        async fn unlink_resource(&mut self, identity_key: &str) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE identities
                SET assigned_resource_key = NULL, photo_path = NULL, assigned_at = NULL
                WHERE identity_key = ? AND assigned_resource_key IS NOT NULL
                "#,
            )
            .bind(identity_key)
            .execute(&mut *self.tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "linked identity {identity_key} not found"
                )));
            }
            Ok(())
        }

        async fn delete_identity(&mut self, identity_key: &str) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM identities WHERE identity_key = ?")
                .bind(identity_key)
                .execute(&mut *self.tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "identity {identity_key} not found"
                )));
            }
            Ok(())
        }

        async fn commit(self: Box<Self>) -> MetadataResult<()> {
            self.tx.commit().await?;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> MetadataResult<()> {
            self.tx.rollback().await?;
            Ok(())
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    resource_key TEXT PRIMARY KEY NOT NULL,
    file_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    claimed INTEGER NOT NULL DEFAULT 0,
    claimed_at TEXT,
    created_at TEXT NOT NULL,
    CHECK (claimed IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_resources_unclaimed ON resources(claimed, resource_key);

CREATE TABLE IF NOT EXISTS identities (
    identity_key TEXT PRIMARY KEY NOT NULL,
    full_name TEXT NOT NULL,
    registration_no TEXT,
    assigned_resource_key TEXT REFERENCES resources(resource_key),
    photo_path TEXT,
    assigned_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((assigned_resource_key IS NULL) = (photo_path IS NULL)),
    CHECK ((assigned_resource_key IS NULL) = (assigned_at IS NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_identities_assigned_resource
    ON identities(assigned_resource_key) WHERE assigned_resource_key IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_identities_photo_path
    ON identities(photo_path) WHERE photo_path IS NOT NULL;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdentityRow, ResourceRow};
    use time::OffsetDateTime;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("metadata.db"), Some(5))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (_dir, store) = open_store().await;
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        store
            .create_resource(&ResourceRow::new("P1", "pending/p1.jpg", 3, "image/jpeg", now))
            .await
            .unwrap();

        let mut tx = store.begin_assignment().await.unwrap();
        tx.claim_resource("P1", now).await.unwrap();
        let second = tx.claim_resource("P1", now).await;
        assert!(matches!(second, Err(MetadataError::Conflict(_))));
        tx.commit().await.unwrap();

        assert!(store.find_unclaimed("P1").await.unwrap().is_none());
        assert!(store.get_resource("P1").await.unwrap().unwrap().claimed);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        store
            .create_resource(&ResourceRow::new("P1", "pending/p1.jpg", 3, "image/jpeg", now))
            .await
            .unwrap();

        {
            let mut tx = store.begin_assignment().await.unwrap();
            tx.claim_resource("P1", now).await.unwrap();
        }

        assert!(store.find_unclaimed("P1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_link_requires_unassigned_identity() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        store
            .create_identity(&IdentityRow::new("S1", "Ada", None, now))
            .await
            .unwrap();
        for key in ["P1", "P2"] {
            store
                .create_resource(&ResourceRow::new(key, "pending/x.jpg", 3, "image/jpeg", now))
                .await
                .unwrap();
        }

        let mut tx = store.begin_assignment().await.unwrap();
        tx.claim_resource("P1", now).await.unwrap();
        tx.link_resource("S1", "P1", "assigned/S1.jpg", now)
            .await
            .unwrap();
        tx.claim_resource("P2", now).await.unwrap();
        let relink = tx.link_resource("S1", "P2", "assigned/S1-b.jpg", now).await;
        assert!(matches!(relink, Err(MetadataError::Conflict(_))));
        tx.rollback().await.unwrap();

        let identity = store.get_identity("S1").await.unwrap().unwrap();
        assert!(!identity.is_assigned());
        assert_eq!(store.count_assigned_identities().await.unwrap(), 0);

        let mut tx = store.begin_assignment().await.unwrap();
        tx.claim_resource("P1", now).await.unwrap();
        tx.link_resource("S1", "P1", "assigned/S1.jpg", now)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.count_assigned_identities().await.unwrap(), 1);
        assert_eq!(store.count_identities().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_photo_path_is_constraint() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        for key in ["S1", "S2"] {
            store
                .create_identity(&IdentityRow::new(key, "Name", None, now))
                .await
                .unwrap();
        }
        for key in ["P1", "P2"] {
            store
                .create_resource(&ResourceRow::new(key, "pending/x.jpg", 3, "image/jpeg", now))
                .await
                .unwrap();
        }

        let mut tx = store.begin_assignment().await.unwrap();
        tx.claim_resource("P1", now).await.unwrap();
        tx.link_resource("S1", "P1", "assigned/same.jpg", now)
            .await
            .unwrap();
        assert!(tx.photo_path_in_use("assigned/same.jpg").await.unwrap());
        tx.claim_resource("P2", now).await.unwrap();
        let dup = tx.link_resource("S2", "P2", "assigned/same.jpg", now).await;
        assert!(matches!(dup, Err(MetadataError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_upsert_identity_keeps_assignment() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        assert!(
            store
                .upsert_identity(&IdentityRow::new("S1", "Ada", None, now))
                .await
                .unwrap()
        );
        store
            .create_resource(&ResourceRow::new("P1", "pending/p1.jpg", 3, "image/jpeg", now))
            .await
            .unwrap();
        let mut tx = store.begin_assignment().await.unwrap();
        tx.claim_resource("P1", now).await.unwrap();
        tx.link_resource("S1", "P1", "assigned/S1.jpg", now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let inserted = store
            .upsert_identity(&IdentityRow::new("S1", "Ada L.", Some("R-9".into()), now))
            .await
            .unwrap();
        assert!(!inserted);

        let identity = store.get_identity("S1").await.unwrap().unwrap();
        assert_eq!(identity.full_name, "Ada L.");
        assert_eq!(identity.registration_no.as_deref(), Some("R-9"));
        assert_eq!(identity.assigned_resource_key.as_deref(), Some("P1"));
    }

    #[tokio::test]
    async fn test_delete_unclaimed_resource() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        for key in ["P1", "P2"] {
            store
                .create_resource(&ResourceRow::new(key, "pending/x.jpg", 3, "image/jpeg", now))
                .await
                .unwrap();
        }
        let mut tx = store.begin_assignment().await.unwrap();
        tx.claim_resource("P2", now).await.unwrap();
        tx.commit().await.unwrap();

        let deleted = store.delete_unclaimed_resource("P1").await.unwrap();
        assert_eq!(deleted.resource_key, "P1");
        assert!(matches!(
            store.delete_unclaimed_resource("P2").await,
            Err(MetadataError::Conflict(_))
        ));
        assert!(matches!(
            store.delete_unclaimed_resource("P9").await,
            Err(MetadataError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_unclaimed_is_ordered_and_paged() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        for key in ["P3", "P1", "P2", "P4"] {
            store
                .create_resource(&ResourceRow::new(key, "pending/x.jpg", 3, "image/jpeg", now))
                .await
                .unwrap();
        }
        let mut tx = store.begin_assignment().await.unwrap();
        tx.claim_resource("P2", now).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.count_unclaimed().await.unwrap(), 3);
        assert_eq!(store.count_resources().await.unwrap(), 4);
        let page: Vec<String> = store
            .list_unclaimed(1, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.resource_key)
            .collect();
        assert_eq!(page, vec!["P3", "P4"]);
    }
}
