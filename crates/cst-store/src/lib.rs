// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable persistence of [`Scan`](cst_core::Scan) records.
//!
//! This crate defines the [`Store`] trait — the narrow interface the
//! scheduler, API, and worker depend on — plus two implementations: a
//! JSON-file-backed [`file::FileStore`] suitable for a single-process
//! deployment, and an [`memory::InMemoryStore`] test double.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// JSON-file-backed reference [`Store`] implementation.
pub mod file;
/// In-memory [`Store`] test double.
pub mod memory;

use async_trait::async_trait;
use cst_core::{Scan, ScanResult, Status};
use std::sync::Arc;
use uuid::Uuid;

/// Errors returned by [`Store`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No scan exists with the given id.
    #[error("scan not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: Uuid,
    },
    /// The backing storage medium failed (I/O, (de)serialization, etc).
    #[error("storage failure: {0}")]
    Backend(String),
}

/// Durable persistence of [`Scan`] records.
///
/// Implementations must be `Send + Sync` — they are shared as a
/// process-wide singleton across every request-handling task.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a scan if `id` is not yet present, otherwise overwrite the
    /// stored document.
    async fn save(&self, scan: &Scan) -> Result<(), StoreError>;

    /// Returns true iff a persisted scan has `image == image` and
    /// `status == Scheduled`.
    ///
    /// Storage failures are masked as `false` — this is a deliberate
    /// best-effort read used only by the scheduler's advisory
    /// singleton-in-flight check (see [`StoreError`] for the operations
    /// that do propagate failures).
    async fn has_scheduled_scan_by_image(&self, image: &str) -> bool;

    /// Returns every persisted scan with `image == image`. Order is
    /// unspecified; callers must not rely on it.
    async fn get_scans_by_image(&self, image: &str) -> Result<Vec<Scan>, StoreError>;

    /// Atomically appends one result to the scan's result sequence.
    ///
    /// Fails with [`StoreError::NotFound`] if `id` is unknown.
    async fn append_result_to_scan_by_id(
        &self,
        id: Uuid,
        result: ScanResult,
    ) -> Result<(), StoreError>;

    /// Atomically sets the scan's status.
    ///
    /// When transitioning to [`Status::Finished`] or [`Status::Aborted`],
    /// implementations must also set `finished_at` to the current time.
    async fn update_scan_status_by_id(&self, id: Uuid, status: Status) -> Result<(), StoreError>;

    /// True iff the store is reachable.
    async fn ping(&self) -> bool;

    /// Release all resources held by this store. Subsequent calls on the
    /// same handle are undefined.
    async fn close(self: Arc<Self>);
}

#[cfg(test)]
/// Shared behavioral test suite, run against every [`Store`] implementation
/// in this crate so the trait's contract stays consistent across backends.
pub(crate) mod contract_tests {
    use super::*;
    use chrono::Utc;

    pub async fn save_then_get_round_trips(store: &dyn Store) {
        let scan = Scan::new_scheduled(Uuid::new_v4(), "ns/img:tag", Utc::now());
        store.save(&scan).await.unwrap();

        let found = store.get_scans_by_image("ns/img:tag").await.unwrap();
        assert!(found.iter().any(|s| s.id == scan.id));
    }

    pub async fn has_scheduled_scan_reflects_status(store: &dyn Store) {
        let image = format!("ns/img:{}", Uuid::new_v4());
        assert!(!store.has_scheduled_scan_by_image(&image).await);

        let scan = Scan::new_scheduled(Uuid::new_v4(), image.clone(), Utc::now());
        store.save(&scan).await.unwrap();
        assert!(store.has_scheduled_scan_by_image(&image).await);

        store
            .update_scan_status_by_id(scan.id, Status::Running)
            .await
            .unwrap();
        assert!(!store.has_scheduled_scan_by_image(&image).await);
    }

    pub async fn append_result_not_found_errors(store: &dyn Store) {
        let err = store
            .append_result_to_scan_by_id(Uuid::new_v4(), ScanResult::failed("clair", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    pub async fn append_result_is_monotonic(store: &dyn Store) {
        let scan = Scan::new_scheduled(Uuid::new_v4(), "ns/img:tag2", Utc::now());
        store.save(&scan).await.unwrap();

        store
            .append_result_to_scan_by_id(scan.id, ScanResult::ok("clair", serde_json::json!([])))
            .await
            .unwrap();
        store
            .append_result_to_scan_by_id(scan.id, ScanResult::failed("trivy", "timeout"))
            .await
            .unwrap();

        let found = store.get_scans_by_image("ns/img:tag2").await.unwrap();
        let found = found.into_iter().find(|s| s.id == scan.id).unwrap();
        assert_eq!(found.result.len(), 2);
        assert_eq!(found.result[0].scanner, "clair");
        assert_eq!(found.result[1].scanner, "trivy");
    }

    pub async fn finishing_sets_finished_at(store: &dyn Store) {
        let scan = Scan::new_scheduled(Uuid::new_v4(), "ns/img:tag3", Utc::now());
        store.save(&scan).await.unwrap();

        store
            .update_scan_status_by_id(scan.id, Status::Finished)
            .await
            .unwrap();

        let found = store.get_scans_by_image("ns/img:tag3").await.unwrap();
        let found = found.into_iter().find(|s| s.id == scan.id).unwrap();
        assert_eq!(found.status, Status::Finished);
        assert!(found.finished_at.is_some());
        assert!(found.created_at <= found.finished_at.unwrap());
    }
}
