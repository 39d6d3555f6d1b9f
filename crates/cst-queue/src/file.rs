// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-file-backed reference [`Queue`] implementation.
//!
//! Each job is one JSON file. `enqueue` writes it into `<root>/pending/`.
//! [`Queue::process_loop`] polls that directory and claims a job by
//! `rename`-ing it into `<root>/in-flight/` — a rename within the same
//! filesystem is atomic, so two pollers racing on the same file see exactly
//! one winner, giving single-claim semantics on a single worker process (see
//! DESIGN.md for the multi-process caveat). On a terminal acknowledgement
//! the claimed file moves to `<root>/done/` or `<root>/failed/`.

use crate::{Job, JobParams, Queue, QueueError, Task};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    id: String,
    task_name: String,
    params: JobParams,
}

/// A [`Queue`] that persists jobs as JSON files under a root directory.
pub struct FileQueue {
    pending_dir: PathBuf,
    in_flight_dir: PathBuf,
    done_dir: PathBuf,
    failed_dir: PathBuf,
    tasks: RwLock<HashMap<String, Arc<dyn Task>>>,
    stopping: AtomicBool,
}

impl FileQueue {
    /// Open (creating if necessary) a file queue rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        let pending_dir = root.join("pending");
        let in_flight_dir = root.join("in-flight");
        let done_dir = root.join("done");
        let failed_dir = root.join("failed");

        for dir in [&pending_dir, &in_flight_dir, &done_dir, &failed_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| QueueError::Backend(format!("create {}: {e}", dir.display())))?;
        }

        Ok(Self {
            pending_dir,
            in_flight_dir,
            done_dir,
            failed_dir,
            tasks: RwLock::new(HashMap::new()),
            stopping: AtomicBool::new(false),
        })
    }

    async fn claim_next(&self) -> Option<(PathBuf, JobRecord)> {
        let mut entries = fs::read_dir(&self.pending_dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let from = entry.path();
            if from.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let to = self.in_flight_dir.join(entry.file_name());
            if fs::rename(&from, &to).await.is_err() {
                // Lost the race to another poller (or the file vanished).
                continue;
            }
            match fs::read(&to).await {
                Ok(bytes) => match serde_json::from_slice::<JobRecord>(&bytes) {
                    Ok(record) => return Some((to, record)),
                    Err(err) => {
                        error!(path = %to.display(), error = ?err, "malformed job file");
                        continue;
                    }
                },
                Err(err) => {
                    error!(path = %to.display(), error = ?err, "failed to read claimed job");
                    continue;
                }
            }
        }
        None
    }
}

struct FileJob {
    in_flight_path: PathBuf,
    done_dir: PathBuf,
    failed_dir: PathBuf,
    record: JobRecord,
}

#[async_trait]
impl Job for FileJob {
    fn id(&self) -> &str {
        &self.record.id
    }

    fn task_name(&self) -> &str {
        &self.record.task_name
    }

    fn parameters(&self) -> &JobParams {
        &self.record.params
    }

    async fn success(&self, result: serde_json::Value) {
        self.finish(&self.done_dir, Ok(result)).await;
    }

    async fn error(&self, err: String) {
        self.finish(&self.failed_dir, Err(err)).await;
    }
}

impl FileJob {
    async fn finish(&self, target_dir: &Path, outcome: Result<serde_json::Value, String>) {
        let target = target_dir.join(format!("{}.json", self.record.id));
        let payload = serde_json::json!({
            "id": self.record.id,
            "task_name": self.record.task_name,
            "params": self.record.params,
            "outcome": match &outcome {
                Ok(v) => serde_json::json!({ "success": v }),
                Err(e) => serde_json::json!({ "error": e }),
            },
        });
        if let Ok(bytes) = serde_json::to_vec_pretty(&payload) {
            if let Err(err) = fs::write(&target, bytes).await {
                error!(path = %target.display(), error = ?err, "failed to persist job outcome");
            }
        }
        if let Err(err) = fs::remove_file(&self.in_flight_path).await {
            warn!(path = %self.in_flight_path.display(), error = ?err, "failed to clear in-flight job file");
        }
    }
}

#[async_trait]
impl Queue for FileQueue {
    async fn register_task(&self, task: Arc<dyn Task>) -> Result<(), QueueError> {
        self.tasks
            .write()
            .await
            .insert(task.name().to_string(), task);
        Ok(())
    }

    async fn enqueue(&self, task_name: &str, params: JobParams) -> Result<(), QueueError> {
        let record = JobRecord {
            id: Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            params,
        };
        let path = self.pending_dir.join(format!("{}.json", record.id));
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| QueueError::Backend(format!("encode job: {e}")))?;
        fs::write(&path, bytes)
            .await
            .map_err(|e| QueueError::Backend(format!("write job file: {e}")))
    }

    async fn process_loop(&self) {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let Some((path, record)) = self.claim_next().await else {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            };

            let task = self.tasks.read().await.get(&record.task_name).cloned();
            match task {
                Some(task) => {
                    let job = Arc::new(FileJob {
                        in_flight_path: path,
                        done_dir: self.done_dir.clone(),
                        failed_dir: self.failed_dir.clone(),
                        record,
                    });
                    task.run(job).await;
                }
                None => {
                    warn!(task = %record.task_name, "no handler registered for claimed job");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
    }

    async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}
