// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`ScanTask`]: a [`cst_queue::Task`] that runs every configured
//! [`Scanner`] against a scheduled image and records the results.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use cst_queue::{Job, Task};
use cst_scanner::Scanner;
use cst_store::Store;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// A [`Task`] that drives a scan job through every registered [`Scanner`] in
/// order, persisting each result as it completes.
///
/// Delivery is at-least-once (see [`cst_queue::Queue`]): a redelivered job
/// re-runs every scanner and appends a second set of results rather than
/// deduplicating, matching the historical worker's behavior.
pub struct ScanTask {
    store: Arc<dyn Store>,
    scanners: Vec<Arc<dyn Scanner>>,
}

impl ScanTask {
    /// Build a scan task over `scanners`, run in the given order, persisting
    /// through `store`.
    pub fn new(store: Arc<dyn Store>, scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self { store, scanners }
    }

    async fn run_inner(&self, job: &Arc<dyn Job>) -> Result<(), String> {
        let scan_id = parse_param::<Uuid>(job, "id")?;
        let image = job
            .parameters()
            .get("image")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing parameter: image".to_string())?
            .to_string();

        self.store
            .update_scan_status_by_id(scan_id, cst_core::Status::Running)
            .await
            .map_err(|e| format!("could not mark scan running: {e}"))?;

        for scanner in &self.scanners {
            let result = scanner.scan(&image).await;
            if let Err(err) = self
                .store
                .append_result_to_scan_by_id(scan_id, result)
                .await
            {
                error!(
                    scan.id = %scan_id,
                    scanner = scanner.name(),
                    error = %err,
                    "could not persist scanner result"
                );
            }
        }

        self.store
            .update_scan_status_by_id(scan_id, cst_core::Status::Finished)
            .await
            .map_err(|e| format!("could not mark scan finished: {e}"))
    }
}

fn parse_param<T: std::str::FromStr>(job: &Arc<dyn Job>, key: &str) -> Result<T, String> {
    let raw = job
        .parameters()
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing parameter: {key}"))?;
    raw.parse()
        .map_err(|_| format!("malformed parameter: {key}"))
}

#[async_trait::async_trait]
impl Task for ScanTask {
    fn name(&self) -> &str {
        cst_queue::SCAN_TASK_NAME
    }

    async fn run(&self, job: Arc<dyn Job>) {
        let span = info_span!("scan_job", job.id = job.id());
        async {
            info!("initializing a new job");
            match self.run_inner(&job).await {
                Ok(()) => job.success(serde_json::json!({ "ok": true })).await,
                Err(err) => {
                    error!(error = %err, "scan job failed");
                    job.error(err).await;
                }
            }
            info!("finishing job");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cst_core::{Scan, ScanResult};
    use cst_queue::JobParams;
    use cst_scanner::MockScanner;
    use cst_store::memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingJob {
        params: JobParams,
        outcome: tokio::sync::Mutex<Option<Result<serde_json::Value, String>>>,
    }

    #[async_trait::async_trait]
    impl Job for RecordingJob {
        fn id(&self) -> &str {
            "job-1"
        }
        fn task_name(&self) -> &str {
            cst_queue::SCAN_TASK_NAME
        }
        fn parameters(&self) -> &JobParams {
            &self.params
        }
        async fn success(&self, result: serde_json::Value) {
            *self.outcome.lock().await = Some(Ok(result));
        }
        async fn error(&self, err: String) {
            *self.outcome.lock().await = Some(Err(err));
        }
    }

    fn job_for(scan: &Scan) -> Arc<dyn Job> {
        let mut params = JobParams::new();
        params.insert("id".into(), serde_json::json!(scan.id.to_string()));
        params.insert("image".into(), serde_json::json!(scan.image));
        Arc::new(RecordingJob {
            params,
            outcome: tokio::sync::Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn runs_every_scanner_and_finishes() {
        let store = Arc::new(InMemoryStore::new());
        let scan = Scan::new_scheduled(Uuid::new_v4(), "ns/img:tag", chrono::Utc::now());
        store.save(&scan).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_a = calls.clone();
        let calls_b = calls.clone();
        let scanners: Vec<Arc<dyn Scanner>> = vec![
            Arc::new(MockScanner::new("a", move |image| {
                calls_a.fetch_add(1, Ordering::SeqCst);
                ScanResult::ok("a", serde_json::json!({ "image": image }))
            })),
            Arc::new(MockScanner::new("b", move |_| {
                calls_b.fetch_add(1, Ordering::SeqCst);
                ScanResult::failed("b", "unreachable")
            })),
        ];

        let task = ScanTask::new(store.clone(), scanners);
        let job = job_for(&scan);
        task.run(job).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let found = store.get_scans_by_image("ns/img:tag").await.unwrap();
        let found = found.into_iter().find(|s| s.id == scan.id).unwrap();
        assert_eq!(found.status, cst_core::Status::Finished);
        assert!(found.finished_at.is_some());
        assert_eq!(found.result.len(), 2);
        assert!(!found.result[0].is_error());
        assert!(found.result[1].is_error());
    }

    #[tokio::test]
    async fn missing_scan_id_fails_the_job_without_panicking() {
        let store = Arc::new(InMemoryStore::new());
        let task = ScanTask::new(store, vec![]);
        let job: Arc<dyn Job> = Arc::new(RecordingJob {
            params: JobParams::new(),
            outcome: tokio::sync::Mutex::new(None),
        });
        task.run(job.clone()).await;
    }
}
