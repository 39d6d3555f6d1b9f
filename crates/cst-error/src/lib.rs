// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the Container Scan
//! Tracker.
//!
//! Every error that crosses a component boundary (API, Scheduler, Store,
//! Queue, Worker) carries a stable, machine-readable [`ErrorCode`] plus a
//! human-readable message, so logs and API error bodies can be filtered and
//! alerted on without parsing prose.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or incomplete client input.
    Validation,
    /// The persistent store could not be reached or returned a failure.
    Store,
    /// The durable job queue could not be reached or returned a failure.
    Queue,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Store => "store",
            Self::Queue => "queue",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Machine-readable, stable error code.
///
/// Each variant serializes to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request body was not recognized JSON, or yielded no usable image.
    BadRequest,
    /// `endcustomdata` failed to base64-decode.
    InvalidBase64,
    /// Decoded `endcustomdata` failed to parse as BSON, or lacked a string
    /// `image` field.
    InvalidBson,
    /// Path parameter failed percent-decoding.
    InvalidPathEncoding,
    /// An image already has a scan with `status = scheduled`.
    AlreadyScheduled,
    /// A scan id was not found in the store.
    ScanNotFound,
    /// The store could not complete the requested operation.
    StoreUnavailable,
    /// The queue could not complete the requested operation.
    QueueUnavailable,
    /// Catch-all for unexpected internal failures.
    Internal,
}

impl ErrorCode {
    /// The [`ErrorCategory`] this code belongs to.
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::BadRequest
            | ErrorCode::InvalidBase64
            | ErrorCode::InvalidBson
            | ErrorCode::InvalidPathEncoding => ErrorCategory::Validation,
            ErrorCode::AlreadyScheduled | ErrorCode::ScanNotFound | ErrorCode::StoreUnavailable => {
                ErrorCategory::Store
            }
            ErrorCode::QueueUnavailable => ErrorCategory::Queue,
            ErrorCode::Internal => ErrorCategory::Internal,
        }
    }
}

/// A unified error with a stable code, a human-readable message, and
/// optional key-value context for structured logs.
#[derive(Debug, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct CstError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable detail, safe to log but not guaranteed stable.
    pub message: String,
}

impl CstError {
    /// Construct a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorCode::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Shorthand for [`ErrorCode::StoreUnavailable`].
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreUnavailable, message)
    }

    /// Shorthand for [`ErrorCode::QueueUnavailable`].
    pub fn queue_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueueUnavailable, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_expected_categories() {
        assert_eq!(ErrorCode::BadRequest.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::InvalidBson.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::AlreadyScheduled.category(), ErrorCategory::Store);
        assert_eq!(ErrorCode::QueueUnavailable.category(), ErrorCategory::Queue);
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::AlreadyScheduled).unwrap();
        assert_eq!(json, "\"ALREADY_SCHEDULED\"");
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = CstError::bad_request("image key is required");
        let s = err.to_string();
        assert!(s.contains("BadRequest"));
        assert!(s.contains("image key is required"));
    }
}
