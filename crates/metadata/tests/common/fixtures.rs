//! Row builders shared by metadata tests.

use portrait_metadata::models::{IdentityRow, ResourceRow};
use time::OffsetDateTime;

/// An unassigned identity named after its key.
#[allow(dead_code)]
pub fn identity(key: &str) -> IdentityRow {
    IdentityRow::new(
        key,
        format!("Person {key}"),
        Some(format!("REG-{key}")),
        OffsetDateTime::now_utc(),
    )
}

/// An unclaimed JPEG resource stored under `pending/`.
#[allow(dead_code)]
pub fn resource(key: &str) -> ResourceRow {
    ResourceRow::new(
        key,
        format!("pending/{key}.jpg"),
        1024,
        "image/jpeg",
        OffsetDateTime::now_utc(),
    )
}
