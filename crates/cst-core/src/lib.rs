// SPDX-License-Identifier: MIT OR Apache-2.0
//! cst-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the Container Scan Tracker: the [`Scan`] entity,
//! its [`Status`] lifecycle, and the [`ScanResult`] records a scanner
//! appends to it.
//!
//! If you only take one dependency from this workspace, take this one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One analysis request for one container image, with its full lifecycle
/// history.
///
/// `id`, `image`, and `created_at` are set once at scheduling time and never
/// mutated afterward. `result` only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Opaque unique identifier, assigned by the scheduler.
    pub id: Uuid,
    /// Image reference string, whitespace-stripped, non-empty.
    pub image: String,
    /// Current lifecycle state.
    pub status: Status,
    /// Timestamp set at scheduling time.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Timestamp set when `status` transitions to `finished` or `aborted`.
    #[serde(rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Ordered results, one per scanner that has completed so far.
    #[serde(default)]
    pub result: Vec<ScanResult>,
}

impl Scan {
    /// Construct a freshly scheduled scan: `status = Scheduled`, no results,
    /// `created_at` set to `created_at`.
    pub fn new_scheduled(id: Uuid, image: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            image: image.into(),
            status: Status::Scheduled,
            created_at,
            finished_at: None,
            result: Vec::new(),
        }
    }
}

/// The current state of an analysis.
///
/// See the state machine documented alongside the scheduler and worker: the
/// only legal transitions are `Scheduled -> Running`, `Running -> Finished`,
/// and `Scheduled -> Aborted`. `Finished` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Scheduled, not yet picked up by a worker.
    Scheduled,
    /// Picked up by a worker; scanners may be running.
    Running,
    /// Every configured scanner has been attempted.
    Finished,
    /// Terminated before any scanner ran, due to a pre-condition failure.
    Aborted,
}

impl Status {
    /// True for the two terminal states (`Finished`, `Aborted`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Finished | Status::Aborted)
    }

    /// True for the two in-flight states the singleton invariant tracks
    /// (`Scheduled`, `Running`).
    pub fn is_in_flight(self) -> bool {
        matches!(self, Status::Scheduled | Status::Running)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Scheduled => "scheduled",
            Status::Running => "running",
            Status::Finished => "finished",
            Status::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// An immutable record of one scanner's outcome, attached to a [`Scan`].
///
/// Exactly one of `vulnerabilities`/`error` is meaningful: a scanner never
/// raises, so failure is encoded as `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Human-readable scanner identifier.
    pub scanner: String,
    /// Opaque structured payload from the scanner; absent on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<serde_json::Value>,
    /// Human-readable failure reason; present iff the scanner failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResult {
    /// Build a successful result carrying an opaque vulnerabilities payload.
    pub fn ok(scanner: impl Into<String>, vulnerabilities: serde_json::Value) -> Self {
        Self {
            scanner: scanner.into(),
            vulnerabilities: Some(vulnerabilities),
            error: None,
        }
    }

    /// Build a failed result carrying a human-readable reason.
    pub fn failed(scanner: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            scanner: scanner.into(),
            vulnerabilities: None,
            error: Some(error.into()),
        }
    }

    /// True iff this result represents a scanner failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Strip every space character from `image` and report whether anything
/// non-whitespace remains.
///
/// This mirrors the historical normalization rule: only literal space
/// characters are stripped (not all Unicode whitespace), matching
/// `strings.Replace(image, " ", "", -1)` in the source this was distilled
/// from.
pub fn normalize_image(image: &str) -> Option<String> {
    let stripped: String = image.chars().filter(|c| *c != ' ').collect();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}
