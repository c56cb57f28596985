//! The Probe Executor (spec.md §4.1): performs one outbound HTTP request
//! against a node's configuration and reports a structured outcome. Pure
//! with respect to state — it writes nothing and never fails; every
//! invocation returns a `ProbeOutcome`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{HttpMethod, BODY_CAPTURE_LIMIT_BYTES, PROBE_TIMEOUT_MS};

/// The effective configuration a probe runs against — either a node's
/// persisted fields (the tick path) or an ad-hoc spec (`TestConnection`).
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub endpoint_url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub expected_status_codes: std::collections::BTreeSet<u16>,
}

/// The result of one probe, independent of whether it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status_code: u16,
    pub status_text: String,
    pub response_time_ms: u64,
    pub success: bool,
    pub error_message: String,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_body_excerpt: Vec<u8>,
}

/// Executes probes over a shared `reqwest::Client`. Cheap to clone: the
/// client pools connections internally.
#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    client: reqwest::Client,
}

impl ProbeExecutor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(PROBE_TIMEOUT_MS))
            .build()
            .expect("failed to build probe HTTP client");
        ProbeExecutor { client }
    }

    /// Runs one probe. Never returns an `Err` — transport failures are
    /// folded into the returned `ProbeOutcome` per spec.md §4.1 step 4.
    pub async fn execute(&self, target: &ProbeTarget) -> ProbeOutcome {
        let start = Instant::now();

        let method = match target.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut request = self.client.request(method, &target.endpoint_url);
        for (name, value) in &target.headers {
            request = request.header(name, value);
        }
        if target.method.carries_body() && !target.body.is_empty() {
            request = request.body(target.body.clone());
        }

        let response = request.send().await;

        match response {
            Ok(resp) => {
                let status_code = resp.status().as_u16();
                let status_text = resp
                    .status()
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .to_string();
                let response_headers = resp
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| {
                        v.to_str().ok().map(|v| (k.to_string(), v.to_string()))
                    })
                    .collect();

                let body = resp.bytes().await;
                let response_time_ms = start.elapsed().as_millis() as u64;

                match body {
                    Ok(bytes) => {
                        let success = target.expected_status_codes.contains(&status_code);
                        let mut excerpt = bytes.to_vec();
                        excerpt.truncate(BODY_CAPTURE_LIMIT_BYTES);
                        debug!(
                            endpoint = %target.endpoint_url,
                            status_code,
                            response_time_ms,
                            success,
                            "probe completed"
                        );
                        ProbeOutcome {
                            status_code,
                            status_text,
                            response_time_ms,
                            success,
                            error_message: String::new(),
                            response_headers,
                            response_body_excerpt: excerpt,
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %target.endpoint_url, error = %e, "probe body read failed");
                        transport_failure(start, format!("body read failed: {e}"))
                    }
                }
            }
            Err(e) => {
                warn!(endpoint = %target.endpoint_url, error = %e, "probe transport failure");
                transport_failure(start, describe_transport_error(&e))
            }
        }
    }
}

impl Default for ProbeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_failure(start: Instant, error_message: String) -> ProbeOutcome {
    ProbeOutcome {
        status_code: 0,
        status_text: "Connection Failed".to_string(),
        response_time_ms: start.elapsed().as_millis() as u64,
        success: false,
        error_message,
        response_headers: BTreeMap::new(),
        response_body_excerpt: Vec::new(),
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> ProbeTarget {
        ProbeTarget {
            endpoint_url: url.to_string(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: Vec::new(),
            expected_status_codes: [200].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_shape() {
        // An unroutable address should resolve/connect-fail quickly and
        // produce the sentinel transport-failure outcome.
        let executor = ProbeExecutor::new();
        let outcome = executor
            .execute(&target("http://127.0.0.1:1"))
            .await;
        assert_eq!(outcome.status_code, 0);
        assert_eq!(outcome.status_text, "Connection Failed");
        assert!(!outcome.success);
        assert!(!outcome.error_message.is_empty());
    }
}
