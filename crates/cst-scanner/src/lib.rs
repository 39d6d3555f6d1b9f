// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`Scanner`] abstraction: a small async trait wrapping one external
//! vulnerability-analysis backend.
//!
//! A scanner must never panic or propagate an error out of [`Scanner::scan`]
//! — transport, authentication, and analysis failures are encoded as a
//! failed [`ScanResult`]. Implementations are free to retry internally (a
//! Clair-like scanner, for example, may try several API versions in
//! sequence); those retries are invisible to callers.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use cst_core::ScanResult;

/// An external analysis backend wrapped behind a uniform interface.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Human-readable identifier for this scanner, used as
    /// [`ScanResult::scanner`].
    fn name(&self) -> &str;

    /// Analyze `image`, returning a result that is never an `Err` — failures
    /// are represented as `ScanResult { error: Some(..), .. }`.
    async fn scan(&self, image: &str) -> ScanResult;
}

/// A [`Scanner`] test double whose behavior is supplied by a closure.
pub struct MockScanner<F> {
    name: String,
    scan_fn: F,
}

impl<F> MockScanner<F>
where
    F: Fn(&str) -> ScanResult + Send + Sync,
{
    /// Build a mock scanner named `name` that delegates to `scan_fn`.
    pub fn new(name: impl Into<String>, scan_fn: F) -> Self {
        Self {
            name: name.into(),
            scan_fn,
        }
    }
}

#[async_trait]
impl<F> Scanner for MockScanner<F>
where
    F: Fn(&str) -> ScanResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, image: &str) -> ScanResult {
        (self.scan_fn)(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_scanner_delegates_to_closure() {
        let scanner = MockScanner::new("mock", |image| ScanResult::ok("mock", serde_json::json!({ "image": image })));
        let result = scanner.scan("ns/img:tag").await;
        assert_eq!(result.scanner, "mock");
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn mock_scanner_can_simulate_failure() {
        let scanner = MockScanner::new("mock", |_| ScanResult::failed("mock", "boom"));
        let result = scanner.scan("ns/img:tag").await;
        assert!(result.is_error());
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
