// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-file-backed reference [`Store`] implementation.
//!
//! One scan is persisted as one `<root>/<id>.json` file. An in-process
//! index (`HashMap<Uuid, Scan>` behind a `tokio::sync::RwLock`) is hydrated
//! from disk at startup and kept consistent with every write, so reads never
//! touch the filesystem. This mirrors the JSON-per-entity-plus-in-memory-
//! cache pattern this codebase already uses for receipt persistence; see
//! DESIGN.md for why this was chosen over a MongoDB driver.

use crate::{Store, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use cst_core::{Scan, ScanResult, Status};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

/// A [`Store`] that persists one JSON file per scan under `root`.
pub struct FileStore {
    root: PathBuf,
    scans: RwLock<HashMap<Uuid, Scan>>,
}

impl FileStore {
    /// Open (creating if necessary) a file store rooted at `root`, hydrating
    /// the in-memory index from any `*.json` files already present.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Backend(format!("create store root: {e}")))?;

        let mut scans = HashMap::new();
        let mut entries = fs::read_dir(&root)
            .await
            .map_err(|e| StoreError::Backend(format!("read store root: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Backend(format!("iterate store root: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Scan>(&bytes) {
                    Ok(scan) => {
                        scans.insert(scan.id, scan);
                    }
                    Err(err) => {
                        error!(path = %path.display(), error = ?err, "failed to parse scan file");
                    }
                },
                Err(err) => {
                    error!(path = %path.display(), error = ?err, "failed to read scan file");
                }
            }
        }

        Ok(Self {
            root,
            scans: RwLock::new(scans),
        })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        scan_path(&self.root, id)
    }

    async fn write_to_disk(&self, scan: &Scan) -> Result<(), StoreError> {
        let path = self.path_for(scan.id);
        let bytes = serde_json::to_vec_pretty(scan)
            .map_err(|e| StoreError::Backend(format!("encode scan: {e}")))?;
        fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Backend(format!("write scan file: {e}")))
    }
}

fn scan_path(root: &Path, id: Uuid) -> PathBuf {
    root.join(format!("{id}.json"))
}

#[async_trait]
impl Store for FileStore {
    async fn save(&self, scan: &Scan) -> Result<(), StoreError> {
        self.write_to_disk(scan).await?;
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
        let updated = {
            let mut guard = self.scans.write().await;
            let scan = guard.get_mut(&id).ok_or(StoreError::NotFound { id })?;
            scan.result.push(result);
            scan.clone()
        };
        self.write_to_disk(&updated).await
    }

    async fn update_scan_status_by_id(&self, id: Uuid, status: Status) -> Result<(), StoreError> {
        let updated = {
            let mut guard = self.scans.write().await;
            let scan = guard.get_mut(&id).ok_or(StoreError::NotFound { id })?;
            scan.status = status;
            if status.is_terminal() {
                scan.finished_at = Some(Utc::now());
            }
            scan.clone()
        };
        self.write_to_disk(&updated).await
    }

    async fn ping(&self) -> bool {
        fs::metadata(&self.root).await.is_ok()
    }

    async fn close(self: Arc<Self>) {
        if self.scans.read().await.is_empty() {
            warn!("closing file store with no persisted scans");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_tests;

    #[tokio::test]
    async fn contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        contract_tests::save_then_get_round_trips(&store).await;
        contract_tests::has_scheduled_scan_reflects_status(&store).await;
        contract_tests::append_result_not_found_errors(&store).await;
        contract_tests::append_result_is_monotonic(&store).await;
        contract_tests::finishing_sets_finished_at(&store).await;
    }

    #[tokio::test]
    async fn hydrates_from_disk_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            let scan = Scan::new_scheduled(id, "ns/img:tag", Utc::now());
            store.save(&scan).await.unwrap();
        }

        let reopened = FileStore::open(dir.path()).await.unwrap();
        let found = reopened.get_scans_by_image("ns/img:tag").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[tokio::test]
    async fn ignores_non_json_files_in_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.txt"), b"not a scan")
            .await
            .unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.get_scans_by_image("anything").await.unwrap().is_empty());
    }
}
