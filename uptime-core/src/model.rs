use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UptimeError};

/// Lower/upper bounds on `check_interval_ms`, inclusive.
pub const CHECK_INTERVAL_MIN_MS: u64 = 15_000;
pub const CHECK_INTERVAL_MAX_MS: u64 = 3_600_000;

/// Lower/upper bounds on `failure_threshold`, inclusive.
pub const FAILURE_THRESHOLD_MIN: u32 = 1;
pub const FAILURE_THRESHOLD_MAX: u32 = 10;

/// Lower/upper bounds on an individual expected status code, inclusive.
pub const STATUS_CODE_MIN: u16 = 100;
pub const STATUS_CODE_MAX: u16 = 599;

/// Fixed threshold at which a node enters `warning`, independent of the
/// user-configured `failure_threshold`. Not user-configurable: spec.md
/// §4.2 fixes this at 2.
pub const WARNING_THRESHOLD: u32 = 2;

/// Hard probe deadline. Not user-configurable (spec.md §9's open question).
pub const PROBE_TIMEOUT_MS: u64 = 30_000;

/// Diagnostic body capture cap.
pub const BODY_CAPTURE_LIMIT_BYTES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether this method's request carries a body per spec.md §3.
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Paused,
    Warning,
    Down,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Active
    }
}

/// A user-owned monitored HTTP(S) endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub user_id: String,
    pub name: String,
    pub endpoint_url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub check_interval_ms: u64,
    pub expected_status_codes: BTreeSet<u16>,
    pub failure_threshold: u32,
    pub status: NodeStatus,
    pub consecutive_failures: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn default_expected_status_codes() -> BTreeSet<u16> {
        [200, 201, 204].into_iter().collect()
    }
}

/// Request payload for `CreateNode`. Unset optional fields take the
/// defaults named in spec.md §3.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub node_id: Option<String>,
    pub name: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
    pub check_interval_ms: u64,
    #[serde(default)]
    pub expected_status_codes: Option<BTreeSet<u16>>,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
}

/// Partial update payload for `UpdateNode`. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePatch {
    pub name: Option<String>,
    pub endpoint_url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<Vec<u8>>,
    pub check_interval_ms: Option<u64>,
    pub expected_status_codes: Option<BTreeSet<u16>>,
    pub failure_threshold: Option<u32>,
}

/// Validates field ranges/formats per spec.md §3. Does not check ownership
/// or existence — those are store-level concerns.
pub fn validate_spec(spec: &NodeSpec) -> Result<()> {
    if spec.name.is_empty() || spec.name.chars().count() > 100 {
        return Err(UptimeError::Validation(
            "name must be 1-100 characters".into(),
        ));
    }
    validate_endpoint_url(&spec.endpoint_url)?;
    validate_check_interval(spec.check_interval_ms)?;
    if let Some(codes) = &spec.expected_status_codes {
        validate_status_codes(codes)?;
    }
    if let Some(threshold) = spec.failure_threshold {
        validate_failure_threshold(threshold)?;
    }
    Ok(())
}

pub fn validate_patch(patch: &NodePatch) -> Result<()> {
    if let Some(name) = &patch.name {
        if name.is_empty() || name.chars().count() > 100 {
            return Err(UptimeError::Validation(
                "name must be 1-100 characters".into(),
            ));
        }
    }
    if let Some(url) = &patch.endpoint_url {
        validate_endpoint_url(url)?;
    }
    if let Some(interval) = patch.check_interval_ms {
        validate_check_interval(interval)?;
    }
    if let Some(codes) = &patch.expected_status_codes {
        validate_status_codes(codes)?;
    }
    if let Some(threshold) = patch.failure_threshold {
        validate_failure_threshold(threshold)?;
    }
    Ok(())
}

fn validate_endpoint_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| UptimeError::Validation(format!("invalid endpoint_url: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(UptimeError::Validation(format!(
            "endpoint_url scheme must be http or https, got {other}"
        ))),
    }
}

fn validate_check_interval(ms: u64) -> Result<()> {
    if (CHECK_INTERVAL_MIN_MS..=CHECK_INTERVAL_MAX_MS).contains(&ms) {
        Ok(())
    } else {
        Err(UptimeError::Validation(format!(
            "check_interval_ms must be between {CHECK_INTERVAL_MIN_MS} and {CHECK_INTERVAL_MAX_MS}, got {ms}"
        )))
    }
}

fn validate_status_codes(codes: &BTreeSet<u16>) -> Result<()> {
    if codes.is_empty() {
        return Err(UptimeError::Validation(
            "expected_status_codes must not be empty".into(),
        ));
    }
    if let Some(&bad) = codes
        .iter()
        .find(|&&c| !(STATUS_CODE_MIN..=STATUS_CODE_MAX).contains(&c))
    {
        return Err(UptimeError::Validation(format!(
            "expected_status_codes entries must be between {STATUS_CODE_MIN} and {STATUS_CODE_MAX}, got {bad}"
        )));
    }
    Ok(())
}

fn validate_failure_threshold(threshold: u32) -> Result<()> {
    if (FAILURE_THRESHOLD_MIN..=FAILURE_THRESHOLD_MAX).contains(&threshold) {
        Ok(())
    } else {
        Err(UptimeError::Validation(format!(
            "failure_threshold must be between {FAILURE_THRESHOLD_MIN} and {FAILURE_THRESHOLD_MAX}, got {threshold}"
        )))
    }
}

/// Builds a fully-defaulted `Node` from a validated `NodeSpec`.
///
/// `default_status_codes` is the ambient `CoreConfig::telemetry
/// .default_expected_status_codes` value the caller is responsible for
/// threading through — a spec that omits `expected_status_codes` takes
/// that configured default rather than a hardcoded constant.
pub fn node_from_spec(
    user_id: String,
    node_id: String,
    spec: NodeSpec,
    default_status_codes: &BTreeSet<u16>,
    now: DateTime<Utc>,
) -> Node {
    Node {
        node_id,
        user_id,
        name: spec.name,
        endpoint_url: spec.endpoint_url,
        method: spec.method.unwrap_or_default(),
        headers: spec.headers,
        body: spec.body,
        check_interval_ms: spec.check_interval_ms,
        expected_status_codes: spec
            .expected_status_codes
            .unwrap_or_else(|| default_status_codes.clone()),
        failure_threshold: spec.failure_threshold.unwrap_or(3),
        status: NodeStatus::Active,
        consecutive_failures: 0,
        last_check_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Applies a validated patch to a node in place, bumping `updated_at`.
/// Returns whether `check_interval_ms` changed (the Scheduler needs this
/// to decide whether a timer reinstall is required).
pub fn apply_patch(node: &mut Node, patch: NodePatch, now: DateTime<Utc>) -> bool {
    let mut interval_changed = false;
    if let Some(name) = patch.name {
        node.name = name;
    }
    if let Some(url) = patch.endpoint_url {
        node.endpoint_url = url;
    }
    if let Some(method) = patch.method {
        node.method = method;
    }
    if let Some(headers) = patch.headers {
        node.headers = headers;
    }
    if let Some(body) = patch.body {
        node.body = body;
    }
    if let Some(interval) = patch.check_interval_ms {
        if interval != node.check_interval_ms {
            interval_changed = true;
        }
        node.check_interval_ms = interval;
    }
    if let Some(codes) = patch.expected_status_codes {
        node.expected_status_codes = codes;
    }
    if let Some(threshold) = patch.failure_threshold {
        node.failure_threshold = threshold;
    }
    node.updated_at = now;
    interval_changed
}

/// An immutable result of one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub sample_id: String,
    pub node_id: String,
    pub status_code: u16,
    pub status_text: String,
    pub response_time_ms: u64,
    pub success: bool,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(interval: u64) -> NodeSpec {
        NodeSpec {
            node_id: None,
            name: "example".into(),
            endpoint_url: "https://example.test/health".into(),
            method: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
            check_interval_ms: interval,
            expected_status_codes: None,
            failure_threshold: None,
        }
    }

    #[test]
    fn test_check_interval_boundaries_accepted() {
        assert!(validate_spec(&spec(15_000)).is_ok());
        assert!(validate_spec(&spec(3_600_000)).is_ok());
    }

    #[test]
    fn test_check_interval_boundaries_rejected() {
        assert!(validate_spec(&spec(14_999)).is_err());
        assert!(validate_spec(&spec(3_600_001)).is_err());
    }

    #[test]
    fn test_empty_expected_status_codes_rejected() {
        let mut s = spec(15_000);
        s.expected_status_codes = Some(BTreeSet::new());
        assert!(validate_spec(&s).is_err());
    }

    #[test]
    fn test_defaults_filled_on_create() {
        let node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(15_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        assert_eq!(node.status, NodeStatus::Active);
        assert_eq!(node.consecutive_failures, 0);
        assert_eq!(node.failure_threshold, 3);
        assert_eq!(
            node.expected_status_codes,
            Node::default_expected_status_codes()
        );
        assert_eq!(node.method, HttpMethod::Get);
    }

    #[test]
    fn test_patch_detects_interval_change() {
        let mut node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(60_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        let changed = apply_patch(
            &mut node,
            NodePatch {
                check_interval_ms: Some(15_000),
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(changed);
        assert_eq!(node.check_interval_ms, 15_000);
    }

    #[test]
    fn test_patch_same_interval_not_flagged() {
        let mut node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(60_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        let changed = apply_patch(
            &mut node,
            NodePatch {
                check_interval_ms: Some(60_000),
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(!changed);
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let mut s = spec(15_000);
        s.endpoint_url = "ftp://example.test".into();
        assert!(validate_spec(&s).is_err());
    }
}
