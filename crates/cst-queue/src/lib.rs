// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable, at-least-once delivery of jobs from schedulers to workers.
//!
//! This crate defines the [`Queue`] trait plus two implementations: a
//! JSON-file-backed [`file::FileQueue`] and an [`memory::InMemoryQueue`]
//! test double. Delivery is at-least-once: a [`Task`] handler may be
//! invoked more than once for the same job and must tolerate replay.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// JSON-file-backed reference [`Queue`] implementation.
pub mod file;
/// In-memory [`Queue`] test double.
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Canonical task name scan jobs are enqueued under.
pub const SCAN_TASK_NAME: &str = "scan";

/// Arbitrary key-value parameters a job carries.
pub type JobParams = BTreeMap<String, serde_json::Value>;

/// Errors returned by [`Queue`] operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No task handler is registered for the requested name.
    #[error("no task registered for name: {0}")]
    UnknownTask(String),
    /// The backing storage medium failed (I/O, (de)serialization, etc).
    #[error("queue backend failure: {0}")]
    Backend(String),
}

/// A unit of durable work handed from a [`Queue`] to its registered
/// [`Task`].
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &str;

    /// The name of the task this job was enqueued under.
    fn task_name(&self) -> &str;

    /// Parameters carried by this job.
    fn parameters(&self) -> &JobParams;

    /// Signal that the handler completed successfully, carrying `result` as
    /// the job's result payload.
    ///
    /// Exactly one of `success`/`error` must be called per handler
    /// invocation.
    async fn success(&self, result: serde_json::Value);

    /// Signal that the handler failed; `err` is a human-readable reason.
    ///
    /// Exactly one of `success`/`error` must be called per handler
    /// invocation.
    async fn error(&self, err: String);
}

/// A handler bound to a task name via [`Queue::register_task`].
#[async_trait]
pub trait Task: Send + Sync {
    /// The task name this handler processes — must match the name jobs are
    /// enqueued under.
    fn name(&self) -> &str;

    /// Process one job. Exactly one of [`Job::success`]/[`Job::error`] must
    /// be called before returning.
    async fn run(&self, job: Arc<dyn Job>);
}

/// Durable, at-least-once job queue.
///
/// Implementations must be `Send + Sync` — they are shared as a
/// process-wide singleton across every scheduling task and the worker's
/// processing loop.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Bind a handler to its task name. Idempotent per name: registering
    /// the same name again replaces the previous handler.
    async fn register_task(&self, task: Arc<dyn Task>) -> Result<(), QueueError>;

    /// Persist a job under `task_name`. Returns once the job is durable.
    async fn enqueue(&self, task_name: &str, params: JobParams) -> Result<(), QueueError>;

    /// Fetch jobs and invoke their registered handlers until [`stop`] is
    /// called. Safe to run from a dedicated execution context.
    ///
    /// [`stop`]: Queue::stop
    async fn process_loop(&self);

    /// Request graceful termination: after the in-flight call to
    /// [`process_loop`] returns, no new handler invocations will start.
    ///
    /// [`process_loop`]: Queue::process_loop
    async fn stop(&self);
}
