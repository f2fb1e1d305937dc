//! PostgreSQL-specific behavior.
//!
//! These tests require Docker to be running. Set SKIP_POSTGRES_TESTS=1 to skip.

mod common;

use common::{identity, postgres_or_skip, resource};
use portrait_metadata::MetadataError;
use std::time::Duration;
use time::OffsetDateTime;

#[tokio::test]
async fn test_postgres_identity_lock_serializes_links() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();
    store.create_identity(&identity("S900")).await.unwrap();
    store.create_resource(&resource("P901")).await.unwrap();
    store.create_resource(&resource("P902")).await.unwrap();

    let now = OffsetDateTime::now_utc();
    let mut first = store.begin_assignment().await.unwrap();
    first.find_identity("S900").await.unwrap();
    first.claim_resource("P901", now).await.unwrap();

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tx = store.begin_assignment().await?;
            // Blocks on the row lock held by `first`.
            let current = tx.find_identity("S900").await?;
            if current.as_ref().is_some_and(|row| row.is_assigned()) {
                tx.rollback().await?;
                return Err(MetadataError::Conflict("already linked".to_string()));
            }
            tx.claim_resource("P902", OffsetDateTime::now_utc()).await?;
            tx.link_resource("S900", "P902", "assigned/S900-b.jpg", OffsetDateTime::now_utc())
                .await?;
            tx.commit().await
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    first
        .link_resource("S900", "P901", "assigned/S900.jpg", now)
        .await
        .unwrap();
    first.commit().await.unwrap();

    let second = waiter.await.unwrap();
    assert!(matches!(second, Err(MetadataError::Conflict(_))));
    assert!(store.find_unclaimed("P902").await.unwrap().is_some());
}

#[tokio::test]
async fn test_postgres_upsert_reports_insert() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    let store = metadata.store();

    assert!(store.upsert_identity(&identity("S910")).await.unwrap());
    let mut renamed = identity("S910");
    renamed.full_name = "Renamed".to_string();
    assert!(!store.upsert_identity(&renamed).await.unwrap());

    let row = store.get_identity("S910").await.unwrap().unwrap();
    assert_eq!(row.full_name, "Renamed");
}
