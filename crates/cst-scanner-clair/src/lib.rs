// SPDX-License-Identifier: MIT OR Apache-2.0
//! A [`Scanner`] that analyzes images against a Clair-like HTTP
//! vulnerability-analysis service.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use cst_core::ScanResult;
use cst_scanner::Scanner;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Default per-request timeout, matching the historical Clair scanner's
/// one-minute default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// API versions attempted, in order, until one succeeds.
const API_VERSIONS: &[u32] = &[1, 3];

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    vulnerabilities: serde_json::Value,
}

/// A [`Scanner`] backed by a Clair-like HTTP vulnerability-analysis
/// service.
///
/// Mirrors the historical implementation's behavior: it tries each of
/// [`API_VERSIONS`] in turn against `address` and returns the first
/// successful response; if every version fails, the scanner reports a
/// single opaque failure rather than leaking transport details.
pub struct ClairScanner {
    client: reqwest::Client,
    address: String,
    name: String,
    timeout: Duration,
}

impl ClairScanner {
    /// Build a scanner named `name` that talks to `address`, using
    /// [`DEFAULT_TIMEOUT`] for each request.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::with_timeout(name, address, DEFAULT_TIMEOUT)
    }

    /// Build a scanner with an explicit per-request timeout.
    pub fn with_timeout(
        name: impl Into<String>,
        address: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            address: address.into(),
            name: name.into(),
            timeout,
        }
    }

    fn endpoint(&self, api_version: u32) -> String {
        format!(
            "{}/v{api_version}/analyze",
            self.address.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Scanner for ClairScanner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, image: &str) -> ScanResult {
        info!(clair.address = %self.address, image, "initializing scan on Clair-like service");

        let mut last_err: Option<String> = None;

        for &api_version in API_VERSIONS {
            let response = self
                .client
                .post(self.endpoint(api_version))
                .timeout(self.timeout)
                .json(&AnalyzeRequest { image })
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => match resp.json::<AnalyzeResponse>().await {
                    Ok(parsed) => {
                        info!(clair.api = api_version, image, "scan succeeded");
                        return ScanResult::ok(self.name.clone(), parsed.vulnerabilities);
                    }
                    Err(err) => {
                        last_err = Some(err.to_string());
                    }
                },
                Ok(resp) => {
                    last_err = Some(format!("http status {}", resp.status()));
                }
                Err(err) => {
                    last_err = Some(err.to_string());
                }
            }

            warn!(
                clair.api = api_version,
                image,
                error = last_err.as_deref().unwrap_or("unknown"),
                "failed to analyze using that Clair API version"
            );
        }

        ScanResult::failed(
            self.name.clone(),
            "could not analyze that image on the Clair-like service",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_vulnerabilities_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/analyze"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "vulnerabilities": ["CVE-1"] })),
            )
            .mount(&server)
            .await;

        let scanner = ClairScanner::new("clair", server.uri());
        let result = scanner.scan("ns/img:tag").await;
        assert!(!result.is_error());
        assert_eq!(
            result.vulnerabilities,
            Some(serde_json::json!(["CVE-1"]))
        );
    }

    #[tokio::test]
    async fn falls_back_to_next_api_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/analyze"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/analyze"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "vulnerabilities": [] })),
            )
            .mount(&server)
            .await;

        let scanner = ClairScanner::new("clair", server.uri());
        let result = scanner.scan("ns/img:tag").await;
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn reports_opaque_failure_when_every_version_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scanner = ClairScanner::new("clair", server.uri());
        let result = scanner.scan("ns/img:tag").await;
        assert!(result.is_error());
        assert!(result.vulnerabilities.is_none());
    }
}
