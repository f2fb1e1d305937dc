//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Photo storage configuration.
///
/// All storage paths recorded in the metadata store are relative to `root`
/// and use `/` as the separator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding the pending and assigned areas.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Directory (relative to root) holding unclaimed originals.
    #[serde(default = "default_pending_dir")]
    pub pending_dir: String,
    /// Directory (relative to root) holding materialized copies.
    #[serde(default = "default_assigned_dir")]
    pub assigned_dir: String,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/uploads")
}

fn default_pending_dir() -> String {
    "pending".to_string()
}

fn default_assigned_dir() -> String {
    "assigned".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            pending_dir: default_pending_dir(),
            assigned_dir: default_assigned_dir(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        for (name, dir) in [
            ("pending_dir", &self.pending_dir),
            ("assigned_dir", &self.assigned_dir),
        ] {
            if dir.is_empty() {
                return Err(format!("storage.{name} must not be empty"));
            }
            if dir.starts_with('/') || dir.split('/').any(|part| part == ".." || part == ".") {
                return Err(format!(
                    "storage.{name} must be a plain relative directory, got '{dir}'"
                ));
            }
        }
        if self.pending_dir.trim_end_matches('/') == self.assigned_dir.trim_end_matches('/') {
            return Err("storage.pending_dir and storage.assigned_dir must differ".to_string());
        }
        Ok(())
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Bounds pool acquisition; SQLite cannot cancel
        /// a statement that is already running.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// Prefer PORTRAIT_METADATA__PASSWORD over storing it in a file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds. PostgreSQL cancels statements
        /// that exceed it.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/portrait.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Assignment engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignmentConfig {
    /// Upper bound for every store and filesystem operation, in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Page size used when a listing request does not specify one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Largest page size a listing request may ask for.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Extension used for a materialized copy when the source has none.
    #[serde(default = "default_fallback_extension")]
    pub fallback_extension: String,
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

fn default_page_size() -> u32 {
    12
}

fn default_max_page_size() -> u32 {
    100
}

fn default_fallback_extension() -> String {
    "jpg".to_string()
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            fallback_extension: default_fallback_extension(),
        }
    }
}

impl AssignmentConfig {
    /// Get the per-operation bound as a Duration.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Validate assignment configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.operation_timeout_ms == 0 {
            return Err("assignment.operation_timeout_ms must be greater than 0".to_string());
        }
        if self.max_page_size == 0 {
            return Err("assignment.max_page_size must be greater than 0".to_string());
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(format!(
                "assignment.default_page_size must be between 1 and {}",
                self.max_page_size
            ));
        }
        if self.fallback_extension.is_empty()
            || !self
                .fallback_extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(format!(
                "assignment.fallback_extension must be alphanumeric, got '{}'",
                self.fallback_extension
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Photo storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Assignment engine configuration.
    #[serde(default)]
    pub assignment: AssignmentConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `dir`.
    ///
    /// **For testing only.** Uses SQLite metadata and filesystem storage
    /// under the given directory.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            storage: StorageConfig {
                root: dir.join("uploads"),
                ..StorageConfig::default()
            },
            metadata: MetadataConfig::Sqlite {
                path: dir.join("portrait.db"),
                query_timeout_secs: None,
            },
            assignment: AssignmentConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.assignment.validate()
    }
}
