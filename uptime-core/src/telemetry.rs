//! The Telemetry Aggregator (spec.md §4.4): turns the sample stream into
//! per-node metrics, fixed-width fleet buckets, and a cached per-user
//! dashboard report.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use metrics::gauge;
use serde::Serialize;

use crate::error::Result;
use crate::model::{Node, NodeStatus, Sample};
use crate::store::{NodeStore, SampleStore};

/// Dashboard cache TTL (spec.md §4.4).
pub const DASHBOARD_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct SampleCounts {
    pub success_count: u64,
    pub failure_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeMetrics {
    pub uptime_percent: f64,
    pub average_response_time_ms: f64,
    pub counts: SampleCounts,
    pub response_time_history: Vec<(DateTime<Utc>, u64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bucket {
    pub timestamp: DateTime<Utc>,
    pub total_checks: u64,
    pub failed_checks: u64,
    pub avg_response_ms: f64,
    pub p99_response_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOverview {
    pub total: u64,
    pub active: u64,
    pub down: u64,
    pub warning: u64,
    pub paused: u64,
    pub system_status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DerivedDashboardFields {
    pub response_time_current: f64,
    pub request_rate_current: f64,
    pub error_rate_current: f64,
    pub latency_p99_current: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub status_overview: StatusOverview,
    pub buckets: Vec<Bucket>,
    pub derived: Option<DerivedDashboardFields>,
}

/// Rounds to the given number of decimal places using plain float math
/// (the sample sizes involved are small; no precision concerns).
fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Approximate p99 via nearest-rank: `ceil(0.99 * n)`th smallest value,
/// 1-indexed. See DESIGN.md for why this runs unconditionally rather than
/// falling back to the mean below 100 samples (spec.md §8 scenario 6 pins
/// the nearest-rank value at n=10).
fn p99_nearest_rank(mut values: Vec<u64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let rank = ((0.99 * values.len() as f64).ceil() as usize).max(1);
    let idx = (rank - 1).min(values.len() - 1);
    round_to(values[idx] as f64, 1)
}

/// Computes per-node metrics over the window `[since, now)`, per
/// spec.md §4.4. `since = None` means "over all history".
pub async fn node_metrics(
    sample_store: &dyn SampleStore,
    node_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<NodeMetrics> {
    let window_samples = match since {
        Some(since) => sample_store.list_by_node_since(node_id, since).await?,
        None => sample_store.list_by_node(node_id, u32::MAX).await?,
    };

    let total = window_samples.len();
    let successes: Vec<&Sample> = window_samples.iter().filter(|s| s.success).collect();

    let uptime_percent = if total == 0 {
        100.0
    } else {
        round_to(100.0 * successes.len() as f64 / total as f64, 2)
    };

    let average_response_time_ms = if successes.is_empty() {
        0.0
    } else {
        successes.iter().map(|s| s.response_time_ms).sum::<u64>() as f64 / successes.len() as f64
    };

    let mut response_time_history: Vec<(DateTime<Utc>, u64)> = successes
        .iter()
        .map(|s| (s.created_at, s.response_time_ms))
        .collect();
    response_time_history.sort_by_key(|(ts, _)| *ts);

    let (success_count, failure_count) = sample_store.aggregate_counts(node_id).await?;

    Ok(NodeMetrics {
        uptime_percent,
        average_response_time_ms,
        counts: SampleCounts {
            success_count,
            failure_count,
        },
        response_time_history,
    })
}

pub async fn recent_samples(
    sample_store: &dyn SampleStore,
    node_id: &str,
    limit: u32,
) -> Result<Vec<Sample>> {
    sample_store.list_by_node(node_id, limit).await
}

pub async fn recent_errors(
    sample_store: &dyn SampleStore,
    node_id: &str,
    limit: u32,
) -> Result<Vec<Sample>> {
    sample_store.list_errors_by_node(node_id, limit).await
}

/// Partitions `[since, now)` into contiguous half-open buckets of width
/// `bucket_seconds`, aligned to the Unix epoch, and aggregates the
/// samples falling into each. Empty buckets are omitted; results are
/// ordered ascending by `timestamp`.
pub async fn buckets(
    sample_store: &dyn SampleStore,
    node_ids: &[String],
    since: DateTime<Utc>,
    bucket_seconds: u64,
) -> Result<Vec<Bucket>> {
    let width_ms = (bucket_seconds.max(1) * 1000) as i64;
    let samples = sample_store.list_by_nodes_since(node_ids, since).await?;

    let mut grouped: HashMap<i64, Vec<&Sample>> = HashMap::new();
    for sample in &samples {
        let ts_ms = sample.created_at.timestamp_millis();
        let key = (ts_ms.div_euclid(width_ms)) * width_ms;
        grouped.entry(key).or_default().push(sample);
    }

    let mut result: Vec<Bucket> = grouped
        .into_iter()
        .map(|(key, bucket_samples)| {
            let total_checks = bucket_samples.len() as u64;
            let failed_checks = bucket_samples.iter().filter(|s| !s.success).count() as u64;
            let sum: u64 = bucket_samples.iter().map(|s| s.response_time_ms).sum();
            let avg_response_ms = round_to(sum as f64 / total_checks as f64, 1);
            let p99_response_ms = p99_nearest_rank(
                bucket_samples.iter().map(|s| s.response_time_ms).collect(),
            );
            Bucket {
                timestamp: Utc.timestamp_millis_opt(key).single().unwrap_or(since),
                total_checks,
                failed_checks,
                avg_response_ms,
                p99_response_ms,
            }
        })
        .collect();

    result.sort_by_key(|b| b.timestamp);
    Ok(result)
}

/// Derived per-dashboard fields computed from the newest bucket, per
/// spec.md §4.4.
pub fn derive_dashboard_fields(buckets: &[Bucket], bucket_seconds: u64) -> Option<DerivedDashboardFields> {
    let newest = buckets.last()?;
    let error_rate_current = if newest.total_checks == 0 {
        0.0
    } else {
        round_to(
            100.0 * newest.failed_checks as f64 / newest.total_checks as f64,
            2,
        )
    };
    Some(DerivedDashboardFields {
        response_time_current: newest.avg_response_ms,
        request_rate_current: newest.total_checks as f64 * (60.0 / bucket_seconds.max(1) as f64),
        error_rate_current,
        latency_p99_current: newest.p99_response_ms,
    })
}

/// The {total, active, down, warning, paused} histogram of spec.md §4.4.
pub async fn status_overview(node_store: &dyn NodeStore, user_id: &str) -> Result<StatusOverview> {
    let query = crate::store::ListNodesQuery {
        page: 1,
        limit: u32::MAX,
        search: None,
        status: None,
        sort_by: crate::store::NodeSortBy::CreatedAt,
        sort_order: crate::store::SortOrder::Ascending,
    };
    let nodes = node_store.list_by_user(user_id, &query).await?.items;
    Ok(overview_from_nodes(&nodes))
}

fn overview_from_nodes(nodes: &[Node]) -> StatusOverview {
    let mut active = 0;
    let mut down = 0;
    let mut warning = 0;
    let mut paused = 0;
    for node in nodes {
        match node.status {
            NodeStatus::Active => active += 1,
            NodeStatus::Down => down += 1,
            NodeStatus::Warning => warning += 1,
            NodeStatus::Paused => paused += 1,
        }
    }

    // Per-status node count gauges (SPEC_FULL.md §E).
    gauge!("nodes_status_active", active as f64);
    gauge!("nodes_status_warning", warning as f64);
    gauge!("nodes_status_down", down as f64);
    gauge!("nodes_status_paused", paused as f64);

    StatusOverview {
        total: nodes.len() as u64,
        active,
        down,
        warning,
        paused,
        system_status: if down > 0 { "degraded" } else { "operational" },
    }
}

/// Last-writer-wins, TTL-evicted cache keyed by `user_id`, per spec.md
/// §4.4's caching clause: not invalidated by writes, eventual consistency
/// is acceptable on the dashboard.
#[derive(Debug)]
pub struct DashboardCache {
    entries: RwLock<HashMap<String, (Instant, DashboardReport)>>,
    ttl: Duration,
}

impl Default for DashboardCache {
    fn default() -> Self {
        Self::new(DASHBOARD_CACHE_TTL)
    }
}

impl DashboardCache {
    pub fn new(ttl: Duration) -> Self {
        DashboardCache {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<DashboardReport> {
        let entries = self.entries.read().ok()?;
        let (inserted_at, report) = entries.get(user_id)?;
        if inserted_at.elapsed() < self.ttl {
            Some(report.clone())
        } else {
            None
        }
    }

    pub fn put(&self, user_id: &str, report: DashboardReport) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(user_id.to_string(), (Instant::now(), report));
        }
    }
}
