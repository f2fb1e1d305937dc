//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Identities
// =============================================================================

/// Identity record (a person that can be paired with exactly one photo).
///
/// `assigned_resource_key`, `photo_path` and `assigned_at` are either all set or
/// all null; the schema enforces this with a CHECK constraint.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct IdentityRow {
    /// Normalized identity key (trimmed, upper-cased).
    pub identity_key: String,
    pub full_name: String,
    /// External registration code.
    pub registration_no: Option<String>,
    pub assigned_resource_key: Option<String>,
    /// Storage path of the materialized copy, relative to the storage root.
    pub photo_path: Option<String>,
    pub assigned_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl IdentityRow {
    /// Create an unassigned identity record.
    pub fn new(
        identity_key: impl Into<String>,
        full_name: impl Into<String>,
        registration_no: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            identity_key: identity_key.into(),
            full_name: full_name.into(),
            registration_no,
            assigned_resource_key: None,
            photo_path: None,
            assigned_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this identity currently references a resource.
    pub fn is_assigned(&self) -> bool {
        self.assigned_resource_key.is_some()
    }
}

// =============================================================================
// Resources
// =============================================================================

/// Resource record (a photo waiting in, or claimed from, the pending area).
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResourceRow {
    pub resource_key: String,
    /// Original backing file, relative to the storage root. Immutable.
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
    pub claimed: bool,
    pub claimed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl ResourceRow {
    /// Create an unclaimed resource record.
    pub fn new(
        resource_key: impl Into<String>,
        file_path: impl Into<String>,
        file_size: i64,
        content_type: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            resource_key: resource_key.into(),
            file_path: file_path.into(),
            file_size,
            content_type: content_type.into(),
            claimed: false,
            claimed_at: None,
            created_at: now,
        }
    }
}
