//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult, map_unique_violation};
use crate::models::*;
use crate::repos::{AssignmentRepo, AssignmentTx, IdentityRepo, ResourceRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use portrait_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, so the password can
    /// come from an environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityRepo for PostgresStore {
    async fn create_identity(&self, identity: &IdentityRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO identities (
                identity_key, full_name, registration_no, assigned_resource_key,
                photo_path, assigned_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
        // xmax is zero only for a freshly inserted tuple.
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO identities (
                identity_key, full_name, registration_no, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (identity_key) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                registration_no = EXCLUDED.registration_no,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&identity.identity_key)
        .bind(&identity.full_name)
        .bind(&identity.registration_no)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn get_identity(&self, identity_key: &str) -> MetadataResult<Option<IdentityRow>> {
        let row =
            sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE identity_key = $1")
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
impl ResourceRepo for PostgresStore {
    async fn create_resource(&self, resource: &ResourceRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resources (
                resource_key, file_path, file_size, content_type, claimed, claimed_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE resource_key = $1")
                .bind(resource_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn find_unclaimed(&self, resource_key: &str) -> MetadataResult<Option<ResourceRow>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE resource_key = $1 AND claimed = FALSE",
        )
        .bind(resource_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_unclaimed(&self, offset: u64, limit: u64) -> MetadataResult<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT * FROM resources WHERE claimed = FALSE
            ORDER BY resource_key LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_unclaimed(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources WHERE claimed = FALSE")
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

    async fn delete_unclaimed_resource(&self, resource_key: &str) -> MetadataResult<ResourceRow> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE resource_key = $1 FOR UPDATE",
        )
        .bind(resource_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(MetadataError::NotFound(format!(
                "resource {resource_key} not found"
            )));
        };

        if row.claimed {
            tx.rollback().await?;
            return Err(MetadataError::Conflict(format!(
                "resource {resource_key} is claimed"
            )));
        }

        sqlx::query("DELETE FROM resources WHERE resource_key = $1")
            .bind(resource_key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }
}

/// Open assignment transaction on PostgreSQL.
pub struct PgAssignmentTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AssignmentRepo for PostgresStore {
    async fn begin_assignment(&self) -> MetadataResult<Box<dyn AssignmentTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAssignmentTx { tx }))
    }
}

#[async_trait]
impl AssignmentTx for PgAssignmentTx {
    async fn find_identity(&mut self, identity_key: &str) -> MetadataResult<Option<IdentityRow>> {
        // Lock the identity so concurrent assignments to it queue behind us.
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT * FROM identities WHERE identity_key = $1 FOR UPDATE",
        )
        .bind(identity_key)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn find_resource(&mut self, resource_key: &str) -> MetadataResult<Option<ResourceRow>> {
        let row =
            sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE resource_key = $1")
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
            UPDATE resources SET claimed = TRUE, claimed_at = $1
            WHERE resource_key = $2 AND claimed = FALSE
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
            UPDATE resources SET claimed = FALSE, claimed_at = NULL
            WHERE resource_key = $1 AND claimed = TRUE
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
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM identities WHERE photo_path = $1)")
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
            SET assigned_resource_key = $1, photo_path = $2, assigned_at = $3
            WHERE identity_key = $4 AND assigned_resource_key IS NULL
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
                // PostgreSQL error code 23505 = unique_violation
                if db_err.code().as_deref() == Some("23505") {
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
            WHERE identity_key = $1 AND assigned_resource_key IS NOT NULL
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
        let result = sqlx::query("DELETE FROM identities WHERE identity_key = $1")
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
