// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`Store`] test double.

use crate::{Store, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use cst_core::{Scan, ScanResult, Status};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A [`Store`] backed by a `HashMap` guarded by a `tokio::sync::RwLock`.
///
/// Intended for unit tests; nothing here is persisted across process
/// restarts.
#[derive(Default)]
pub struct InMemoryStore {
    scans: RwLock<HashMap<Uuid, Scan>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save(&self, scan: &Scan) -> Result<(), StoreError> {
        self.scans.write().await.insert(scan.id, scan.clone());
        Ok(())
    }

    async fn has_scheduled_scan_by_image(&self, image: &str) -> bool {
        self.scans
            .read()
            .await
            .values()
            .any(|s| s.image == image && s.status == Status::Scheduled)
    }

    async fn get_scans_by_image(&self, image: &str) -> Result<Vec<Scan>, StoreError> {
        Ok(self
            .scans
            .read()
            .await
            .values()
            .filter(|s| s.image == image)
            .cloned()
            .collect())
    }

    async fn append_result_to_scan_by_id(
        &self,
        id: Uuid,
        result: ScanResult,
    ) -> Result<(), StoreError> {
        let mut guard = self.scans.write().await;
        let scan = guard.get_mut(&id).ok_or(StoreError::NotFound { id })?;
        scan.result.push(result);
        Ok(())
    }

    async fn update_scan_status_by_id(&self, id: Uuid, status: Status) -> Result<(), StoreError> {
        let mut guard = self.scans.write().await;
        let scan = guard.get_mut(&id).ok_or(StoreError::NotFound { id })?;
        scan.status = status;
        if status.is_terminal() {
            scan.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn close(self: Arc<Self>) {}
}
