use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::model::{Node, NodeStatus, Sample};

pub mod memory;

/// Sort keys exposed by `ListNodes` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSortBy {
    Name,
    Uptime,
    LastCheck,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Filter/sort/paginate parameters for `ListNodes`.
#[derive(Debug, Clone)]
pub struct ListNodesQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub status: Option<NodeStatus>,
    pub sort_by: NodeSortBy,
    pub sort_order: SortOrder,
}

impl Default for ListNodesQuery {
    fn default() -> Self {
        ListNodesQuery {
            page: 1,
            limit: 20,
            search: None,
            status: None,
            sort_by: NodeSortBy::CreatedAt,
            sort_order: SortOrder::Descending,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PaginatedNodes {
    pub items: Vec<Node>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// The contended `(status, consecutive_failures, last_check_at)` triple
/// called out in spec.md §5, named the way the tick path updates it.
#[derive(Debug, Clone)]
pub struct FailureIncrement {
    pub node_id: String,
    pub new_status: NodeStatus,
    pub consecutive_failures: u32,
    pub last_check_at: DateTime<Utc>,
}

/// Abstract persistence for `Node` rows. Storage technology is
/// unconstrained; this crate ships only an in-memory implementation.
/// Method names follow the bit-stable interface named in spec.md §6.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn create(&self, node: Node) -> Result<Node>;
    async fn read(&self, node_id: &str) -> Result<Option<Node>>;
    async fn update(&self, node: Node) -> Result<Node>;
    async fn delete(&self, node_id: &str) -> Result<()>;
    async fn list_by_user(&self, user_id: &str, query: &ListNodesQuery) -> Result<PaginatedNodes>;
    async fn list_active(&self) -> Result<Vec<Node>>;
    async fn count_by_user(&self, user_id: &str) -> Result<u64>;

    /// Applied on a failed probe: bumps `consecutive_failures`, sets
    /// `last_check_at`, and transitions `status` if the increment named
    /// warning/down is reached.
    async fn increment_failures(&self, increment: FailureIncrement) -> Result<Node>;

    /// Applied on a successful probe: zeroes `consecutive_failures`,
    /// sets `status = active`, and sets `last_check_at`.
    async fn reset_failures(&self, node_id: &str, last_check_at: DateTime<Utc>) -> Result<Node>;

    /// Applied by `PauseNode`/`ResumeNode`; `ResumeNode` additionally
    /// resets `consecutive_failures` to 0 via the caller.
    async fn update_status(
        &self,
        node_id: &str,
        status: NodeStatus,
        consecutive_failures: Option<u32>,
    ) -> Result<Node>;

    async fn count_all_by_status(&self, status: NodeStatus) -> Result<u64>;
}

/// Abstract append-only persistence for `Sample` rows, serving the three
/// access patterns named in spec.md §3: newest-first over one node,
/// newest-first over a set of nodes, and bucketed time-range aggregation.
///
/// Substitutes spec.md §6's store-side `AggregateAverage`/`AggregateUptime`/
/// `AggregateBuckets` with `list_by_node_since`/`list_by_nodes_since`, which
/// return raw rows for `telemetry.rs` to aggregate client-side — see
/// DESIGN.md's Open Question decisions.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn append(&self, sample: Sample) -> Result<Sample>;
    async fn list_by_node(&self, node_id: &str, limit: u32) -> Result<Vec<Sample>>;
    async fn list_errors_by_node(&self, node_id: &str, limit: u32) -> Result<Vec<Sample>>;
    async fn list_by_nodes(&self, node_ids: &[String], limit: u32) -> Result<Vec<Sample>>;
    async fn list_by_node_since(
        &self,
        node_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>>;
    async fn list_by_nodes_since(
        &self,
        node_ids: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>>;
    async fn delete_by_node(&self, node_id: &str) -> Result<()>;
    async fn aggregate_counts(&self, node_id: &str) -> Result<(u64, u64)>;
}
