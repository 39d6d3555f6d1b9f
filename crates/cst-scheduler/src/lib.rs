// SPDX-License-Identifier: MIT OR Apache-2.0
//! Turns an image reference into a scheduled [`Scan`], durably persisted and
//! enqueued for a worker to pick up.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use cst_core::Scan;
use cst_queue::{JobParams, Queue, SCAN_TASK_NAME};
use cst_store::Store;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Errors [`Scheduler::schedule`] can return.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// `image`, after normalization, contained no non-space characters.
    #[error("image reference is empty")]
    EmptyImage,
    /// A scan for this image is already `scheduled` or `running`.
    #[error("image has already been scheduled for scanning")]
    AlreadyScheduled,
    /// The store rejected the write.
    #[error("storage failure: {0}")]
    Store(#[from] cst_store::StoreError),
    /// The queue rejected the enqueue.
    #[error("queue failure: {0}")]
    Queue(#[from] cst_queue::QueueError),
}

/// Schedules scans: validates the image, enforces the singleton-in-flight
/// invariant, persists the new [`Scan`], and hands a job to the [`Queue`].
pub struct Scheduler {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
}

impl Scheduler {
    /// Build a scheduler over the given store and queue.
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn Queue>) -> Self {
        Self { store, queue }
    }

    /// Schedule a scan of `image`.
    ///
    /// `image` is normalized with [`cst_core::normalize_image`] first. If a
    /// scan for the normalized image is already `scheduled` or `running`,
    /// this returns [`ScheduleError::AlreadyScheduled`] rather than creating
    /// a duplicate — a best-effort check, not a hard guarantee (see
    /// `cst_store::Store::has_scheduled_scan_by_image`).
    pub async fn schedule(&self, image: &str) -> Result<Scan, ScheduleError> {
        let image = cst_core::normalize_image(image).ok_or(ScheduleError::EmptyImage)?;

        if self.store.has_scheduled_scan_by_image(&image).await {
            return Err(ScheduleError::AlreadyScheduled);
        }

        let scan = Scan::new_scheduled(Uuid::new_v4(), image.clone(), Utc::now());
        self.store.save(&scan).await?;

        let mut params = JobParams::new();
        params.insert("id".into(), serde_json::json!(scan.id));
        params.insert("image".into(), serde_json::json!(scan.image));
        self.queue.enqueue(SCAN_TASK_NAME, params).await?;

        info!(scan.id = %scan.id, scan.image = %scan.image, "scheduled scan");

        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cst_queue::memory::InMemoryQueue;
    use cst_store::memory::InMemoryStore;

    fn scheduler() -> Scheduler {
        Scheduler::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryQueue::new()),
        )
    }

    #[tokio::test]
    async fn schedules_a_new_image() {
        let scheduler = scheduler();
        let scan = scheduler.schedule("ns/img:tag").await.unwrap();
        assert_eq!(scan.image, "ns/img:tag");
        assert_eq!(scan.status, cst_core::Status::Scheduled);
    }

    #[tokio::test]
    async fn rejects_empty_image() {
        let scheduler = scheduler();
        let err = scheduler.schedule("   ").await.unwrap_err();
        assert!(matches!(err, ScheduleError::EmptyImage));
    }

    #[tokio::test]
    async fn rejects_duplicate_in_flight_schedule() {
        let scheduler = scheduler();
        scheduler.schedule("ns/img:tag").await.unwrap();
        let err = scheduler.schedule("ns/img:tag").await.unwrap_err();
        assert!(matches!(err, ScheduleError::AlreadyScheduled));
    }

    #[tokio::test]
    async fn allows_rescheduling_after_previous_scan_finished() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let scheduler = Scheduler::new(store.clone(), queue.clone());

        let first = scheduler.schedule("ns/img:tag").await.unwrap();
        store
            .update_scan_status_by_id(first.id, cst_core::Status::Finished)
            .await
            .unwrap();

        let second = scheduler.schedule("ns/img:tag").await.unwrap();
        assert_ne!(first.id, second.id);
    }
}
