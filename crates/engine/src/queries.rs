//! Read-only queries.

use crate::engine::Engine;
use crate::error::{AssignError, AssignResult};
use crate::timeout::bounded;
use portrait_core::IdentityKey;
use serde::Serialize;

/// Public view of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySummary {
    pub identity_key: String,
    pub display_name: String,
    pub external_code: Option<String>,
    pub has_assigned_resource: bool,
}

/// One unclaimed resource in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnclaimedResource {
    pub resource_key: String,
    /// Storage path of the original, relative to the storage root.
    pub path: String,
}

/// A page of unclaimed resources ordered by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnclaimedPage {
    pub items: Vec<UnclaimedResource>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

/// Totals over identities and resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentStats {
    pub identities_total: u64,
    pub identities_assigned: u64,
    pub identities_unassigned: u64,
    pub resources_unclaimed: u64,
    pub resources_total: u64,
}

/// Clamp a requested page to `>= 1` and a page size to `[1, max_page_size]`.
pub fn clamp_paging(
    page: i64,
    page_size: Option<i64>,
    default_page_size: u32,
    max_page_size: u32,
) -> (u32, u32) {
    let page = page.clamp(1, i64::from(u32::MAX)) as u32;
    let page_size = page_size
        .unwrap_or(i64::from(default_page_size))
        .clamp(1, i64::from(max_page_size.max(1))) as u32;
    (page, page_size)
}

impl Engine {
    /// Look up an identity for display.
    pub async fn verify_identity(&self, identity_key: &str) -> AssignResult<IdentitySummary> {
        let identity = IdentityKey::parse(identity_key)?;
        let row = bounded(
            self.limit(),
            "identity lookup",
            self.metadata.get_identity(identity.as_str()),
        )
        .await?
        .ok_or_else(|| AssignError::IdentityNotFound(identity.to_string()))?;

        Ok(IdentitySummary {
            has_assigned_resource: row.is_assigned(),
            identity_key: row.identity_key,
            display_name: row.full_name,
            external_code: row.registration_no,
        })
    }

    /// List unclaimed resources one page at a time.
    ///
    /// `page` starts at 1; `page_size` defaults to the configured size.
    /// Out-of-range values are clamped rather than rejected.
    pub async fn list_unclaimed_resources(
        &self,
        page: i64,
        page_size: Option<i64>,
    ) -> AssignResult<UnclaimedPage> {
        let settings = &self.config.assignment;
        let (page, page_size) = clamp_paging(
            page,
            page_size,
            settings.default_page_size,
            settings.max_page_size,
        );
        let limit = self.limit();

        let total_count =
            bounded(limit, "count unclaimed", self.metadata.count_unclaimed()).await?;
        let offset = u64::from(page - 1) * u64::from(page_size);
        let rows = bounded(
            limit,
            "list unclaimed",
            self.metadata.list_unclaimed(offset, u64::from(page_size)),
        )
        .await?;

        Ok(UnclaimedPage {
            items: rows
                .into_iter()
                .map(|row| UnclaimedResource {
                    resource_key: row.resource_key,
                    path: row.file_path,
                })
                .collect(),
            total_count,
            page,
            page_size,
            total_pages: total_count.div_ceil(u64::from(page_size)),
        })
    }

    /// Count identities by assignment state and resources by claim state.
    ///
    /// Each count is a separate read, so totals taken while assignments are
    /// running may be off by the assignments in flight.
    pub async fn assignment_stats(&self) -> AssignResult<AssignmentStats> {
        let limit = self.limit();
        let identities_total =
            bounded(limit, "count identities", self.metadata.count_identities()).await?;
        let identities_assigned = bounded(
            limit,
            "count assigned identities",
            self.metadata.count_assigned_identities(),
        )
        .await?;
        let resources_total =
            bounded(limit, "count resources", self.metadata.count_resources()).await?;
        let resources_unclaimed =
            bounded(limit, "count unclaimed", self.metadata.count_unclaimed()).await?;

        Ok(AssignmentStats {
            identities_total,
            identities_assigned,
            identities_unassigned: identities_total.saturating_sub(identities_assigned),
            resources_unclaimed,
            resources_total,
        })
    }
}
