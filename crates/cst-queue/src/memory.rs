// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`Queue`] test double.

use crate::{Job, JobParams, Queue, QueueError, Task};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::warn;
use uuid::Uuid;

struct Queued {
    id: String,
    task_name: String,
    params: JobParams,
}

/// A [`Queue`] backed by an in-process FIFO, for unit tests.
///
/// [`process_loop`](Queue::process_loop) polls the queue every 10ms until
/// [`stop`](Queue::stop) is requested.
#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<Queued>>,
    tasks: Mutex<HashMap<String, Arc<dyn Task>>>,
    stopping: AtomicBool,
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
        }
    }
}

struct MemoryJob {
    id: String,
    task_name: String,
    params: JobParams,
    outcome: Mutex<Option<Result<serde_json::Value, String>>>,
}

#[async_trait]
impl Job for MemoryJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn task_name(&self) -> &str {
        &self.task_name
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

#[async_trait]
impl Queue for InMemoryQueue {
    async fn register_task(&self, task: Arc<dyn Task>) -> Result<(), QueueError> {
        self.tasks
            .lock()
            .await
            .insert(task.name().to_string(), task);
        Ok(())
    }

    async fn enqueue(&self, task_name: &str, params: JobParams) -> Result<(), QueueError> {
        self.pending.lock().await.push_back(Queued {
            id: Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            params,
        });
        Ok(())
    }

    async fn process_loop(&self) {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let next = self.pending.lock().await.pop_front();
            let Some(queued) = next else {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            };

            let task = self.tasks.lock().await.get(&queued.task_name).cloned();
            match task {
                Some(task) => {
                    let job = Arc::new(MemoryJob {
                        id: queued.id,
                        task_name: queued.task_name,
                        params: queued.params,
                        outcome: Mutex::new(None),
                    });
                    task.run(job.clone()).await;
                    if job.outcome.lock().await.is_none() {
                        warn!(job.id = %job.id, "handler returned without acknowledging job");
                    }
                }
                None => {
                    warn!(task = %queued.task_name, "no handler registered, dropping job");
                }
            }
        }
    }

    async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for CountingTask {
        fn name(&self) -> &str {
            crate::SCAN_TASK_NAME
        }

        async fn run(&self, job: Arc<dyn Job>) {
            self.count.fetch_add(1, Ordering::SeqCst);
            job.success(serde_json::json!(null)).await;
        }
    }

    #[tokio::test]
    async fn enqueued_job_is_dispatched_to_handler() {
        let queue = Arc::new(InMemoryQueue::new());
        let count = Arc::new(AtomicUsize::new(0));
        queue
            .register_task(Arc::new(CountingTask {
                count: count.clone(),
            }))
            .await
            .unwrap();

        queue
            .enqueue(crate::SCAN_TASK_NAME, JobParams::new())
            .await
            .unwrap();

        let loop_queue = queue.clone();
        let handle = tokio::spawn(async move { loop_queue.process_loop().await });

        for _ in 0..200 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        queue.stop().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_task_is_dropped_not_panicking() {
        let queue = InMemoryQueue::new();
        queue
            .enqueue("no-such-task", JobParams::new())
            .await
            .unwrap();
        queue.stop().await;
        queue.process_loop().await;
    }
}
