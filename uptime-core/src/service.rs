//! `UptimeService`: the facade implementing every operation named in
//! spec.md §6, threaded through a context value constructed once at
//! process start (spec.md §9's "global singletons" redesign flag) rather
//! than reached via a module-level singleton.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::{Result, UptimeError};
use crate::model::{self, Node, NodePatch, NodeSpec, NodeStatus};
use crate::probe::{ProbeExecutor, ProbeOutcome, ProbeTarget};
use crate::scheduler::Scheduler;
use crate::store::{ListNodesQuery, NodeStore, PaginatedNodes, SampleStore};
use crate::telemetry::{self, Bucket, DashboardCache, DashboardReport, NodeMetrics};

/// Lookback window `GetNode` reports response-time history over (spec.md §6).
const NODE_DETAIL_HISTORY_WINDOW_SECONDS: i64 = 24 * 60 * 60;

/// `GetNode`'s joined read shape: node fields plus its metrics, recent
/// samples, recent errors, and response-time history. Built as a single
/// aggregator call rather than fanned-out per-row queries (spec.md §9's
/// "ad-hoc enriched list" redesign flag).
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeDetail {
    pub node: Node,
    pub metrics: NodeMetrics,
    pub recent_samples: Vec<model::Sample>,
    pub recent_errors: Vec<model::Sample>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemStatusReport {
    pub system_status: &'static str,
    pub total_nodes: u64,
    pub active_scheduled_count: u64,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Long-lived handle constructed once at process init and threaded
/// through every request. Cheap to clone — every field is an `Arc`.
#[derive(Clone)]
pub struct UptimeService {
    node_store: Arc<dyn NodeStore>,
    sample_store: Arc<dyn SampleStore>,
    scheduler: Scheduler,
    dashboard_cache: Arc<DashboardCache>,
    dashboard_window_seconds: i64,
    dashboard_bucket_seconds: u64,
    default_expected_status_codes: BTreeSet<u16>,
}

impl UptimeService {
    /// Builds the facade with `config`'s telemetry section driving the
    /// dashboard cache TTL, window, and bucket width (spec.md §4.4).
    pub fn new(node_store: Arc<dyn NodeStore>, sample_store: Arc<dyn SampleStore>, config: &CoreConfig) -> Self {
        let probe_executor = Arc::new(ProbeExecutor::new());
        let scheduler = Scheduler::new(node_store.clone(), sample_store.clone(), probe_executor);
        let ttl = std::time::Duration::from_secs(config.telemetry.dashboard_cache_ttl_seconds);
        UptimeService {
            node_store,
            sample_store,
            scheduler,
            dashboard_cache: Arc::new(DashboardCache::new(ttl)),
            dashboard_window_seconds: config.telemetry.dashboard_window_seconds as i64,
            dashboard_bucket_seconds: config.telemetry.dashboard_bucket_seconds,
            default_expected_status_codes: config.telemetry.default_expected_status_codes.clone(),
        }
    }

    /// The configured fallback for `NodeSpec::expected_status_codes` when a
    /// spec omits it (`TelemetryConfig::default_expected_status_codes`).
    pub fn default_expected_status_codes(&self) -> &BTreeSet<u16> {
        &self.default_expected_status_codes
    }

    /// Reads every currently-`active` node from the store and installs a
    /// timer for each. Run once at process start.
    pub async fn boot(&self) -> Result<()> {
        self.scheduler.boot().await
    }

    /// Cancels every timer, draining in-flight probes within their
    /// deadline. Run once at process shutdown.
    pub async fn shutdown(&self) {
        self.scheduler.stop_all().await;
    }

    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Reads a node and verifies it belongs to `user_id`, masking the
    /// ownership mismatch as `not_found` (spec.md §7).
    async fn read_owned(&self, user_id: &str, node_id: &str) -> Result<Node> {
        let node = self
            .node_store
            .read(node_id)
            .await?
            .ok_or_else(|| UptimeError::NotFound(format!("node {node_id}")))?;
        if node.user_id != user_id {
            return Err(UptimeError::NotFound(format!("node {node_id}")));
        }
        Ok(node)
    }

    #[instrument(skip(self, spec), fields(user_id))]
    pub async fn create_node(&self, user_id: &str, spec: NodeSpec) -> Result<Node> {
        model::validate_spec(&spec)?;
        let node_id = spec
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let node = model::node_from_spec(
            user_id.to_string(),
            node_id,
            spec,
            &self.default_expected_status_codes,
            now,
        );
        let created = self.node_store.create(node).await?;
        self.scheduler().start_node(&created);
        info!(node_id = %created.node_id, user_id, "node created");
        Ok(created)
    }

    pub async fn update_node(
        &self,
        user_id: &str,
        node_id: &str,
        patch: NodePatch,
    ) -> Result<Node> {
        model::validate_patch(&patch)?;
        let mut node = self.read_owned(user_id, node_id).await?;
        let interval_changed = model::apply_patch(&mut node, patch, Utc::now());
        let updated = self.node_store.update(node).await?;

        if interval_changed && updated.status != NodeStatus::Paused {
            self.scheduler().start_node(&updated);
            info!(node_id, "timer reinstalled after interval change");
        }
        Ok(updated)
    }

    pub async fn pause_node(&self, user_id: &str, node_id: &str) -> Result<Node> {
        let node = self.read_owned(user_id, node_id).await?;
        if node.status == NodeStatus::Paused {
            return Err(UptimeError::AlreadyPaused(node_id.to_string()));
        }
        let updated = self
            .node_store
            .update_status(node_id, NodeStatus::Paused, None)
            .await?;
        self.scheduler().stop_node(node_id);
        info!(node_id, "node paused");
        Ok(updated)
    }

    pub async fn resume_node(&self, user_id: &str, node_id: &str) -> Result<Node> {
        let node = self.read_owned(user_id, node_id).await?;
        if node.status == NodeStatus::Active {
            return Err(UptimeError::AlreadyActive(node_id.to_string()));
        }
        let updated = self
            .node_store
            .update_status(node_id, NodeStatus::Active, Some(0))
            .await?;
        self.scheduler().start_node(&updated);
        info!(node_id, "node resumed");
        Ok(updated)
    }

    pub async fn delete_node(&self, user_id: &str, node_id: &str) -> Result<()> {
        self.read_owned(user_id, node_id).await?;
        self.scheduler().stop_node(node_id);
        self.sample_store.delete_by_node(node_id).await?;
        self.node_store.delete(node_id).await?;
        info!(node_id, "node deleted");
        Ok(())
    }

    /// Runs the Probe Executor once against `node_id`'s configuration.
    /// Persists no sample and mutates no node state (spec.md §6).
    pub async fn test_probe(&self, user_id: &str, node_id: &str) -> Result<ProbeOutcome> {
        let node = self
            .node_store
            .read(node_id)
            .await?
            .ok_or_else(|| UptimeError::NotFound(format!("node {node_id}")))?;
        if node.user_id != user_id {
            return Err(UptimeError::Unauthorized(format!(
                "node {node_id} is not owned by the acting user"
            )));
        }
        let executor = ProbeExecutor::new();
        let target = ProbeTarget {
            endpoint_url: node.endpoint_url,
            method: node.method,
            headers: node.headers,
            body: node.body,
            expected_status_codes: node.expected_status_codes,
        };
        Ok(executor.execute(&target).await)
    }

    /// Runs the Probe Executor against an arbitrary, unpersisted
    /// configuration (pre-create validation).
    pub async fn test_connection(&self, target: ProbeTarget) -> ProbeOutcome {
        let executor = ProbeExecutor::new();
        executor.execute(&target).await
    }

    pub async fn get_node(&self, user_id: &str, node_id: &str) -> Result<NodeDetail> {
        let node = self.read_owned(user_id, node_id).await?;
        let since = Utc::now() - chrono::Duration::seconds(NODE_DETAIL_HISTORY_WINDOW_SECONDS);
        let metrics = telemetry::node_metrics(self.sample_store.as_ref(), node_id, Some(since)).await?;
        let recent_samples = telemetry::recent_samples(self.sample_store.as_ref(), node_id, 20).await?;
        let recent_errors = telemetry::recent_errors(self.sample_store.as_ref(), node_id, 20).await?;
        Ok(NodeDetail {
            node,
            metrics,
            recent_samples,
            recent_errors,
        })
    }

    pub async fn list_nodes(&self, user_id: &str, query: ListNodesQuery) -> Result<PaginatedNodes> {
        self.node_store.list_by_user(user_id, &query).await
    }

    /// Builds (or serves from cache) the fleet telemetry report of
    /// spec.md §4.4, over the fixed 5-minute window / 30-second buckets
    /// spec.md §6 mandates for the dashboard. Cached for 30 seconds per
    /// user; not invalidated by writes.
    pub async fn dashboard_overview(&self, user_id: &str) -> Result<DashboardReport> {
        if let Some(cached) = self.dashboard_cache.get(user_id) {
            return Ok(cached);
        }

        let query = ListNodesQuery {
            page: 1,
            limit: u32::MAX,
            ..Default::default()
        };
        let nodes = self.node_store.list_by_user(user_id, &query).await?.items;
        let node_ids: Vec<String> = nodes.iter().map(|n| n.node_id.clone()).collect();

        let since = Utc::now() - chrono::Duration::seconds(self.dashboard_window_seconds);
        let buckets: Vec<Bucket> = if node_ids.is_empty() {
            Vec::new()
        } else {
            telemetry::buckets(self.sample_store.as_ref(), &node_ids, since, self.dashboard_bucket_seconds).await?
        };
        let derived = telemetry::derive_dashboard_fields(&buckets, self.dashboard_bucket_seconds);

        let status_overview = telemetry::status_overview(self.node_store.as_ref(), user_id).await?;
        let report = DashboardReport {
            status_overview,
            buckets,
            derived,
        };

        self.dashboard_cache.put(user_id, report.clone());
        Ok(report)
    }

    /// Unauthenticated system-wide status, per spec.md §6.
    pub async fn system_status(&self) -> Result<SystemStatusReport> {
        let down_count = self.node_store.count_all_by_status(NodeStatus::Down).await?;
        let active = self.node_store.count_all_by_status(NodeStatus::Active).await?;
        let warning = self.node_store.count_all_by_status(NodeStatus::Warning).await?;
        let paused = self.node_store.count_all_by_status(NodeStatus::Paused).await?;
        let total_nodes = down_count + active + warning + paused;

        Ok(SystemStatusReport {
            system_status: if down_count > 0 { "degraded" } else { "operational" },
            total_nodes,
            active_scheduled_count: self.scheduler().active_count() as u64,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        })
    }
}
