//! Reference in-memory implementations of `NodeStore` and `SampleStore`.
//!
//! Mirrors the `Arc<DashMap<Uuid, NodeInfo>>` registry pattern used for the
//! fleet registry elsewhere in this codebase, generalized to the node/user
//! ownership and sample-history shape this service needs. Storage
//! technology is an external collaborator (spec.md §1); this is the
//! reference collaborator used by tests and local/dev deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{Result, UptimeError};
use crate::model::{Node, NodeStatus};
use crate::store::{
    FailureIncrement, ListNodesQuery, NodeSortBy, NodeStore, PaginatedNodes, SampleStore,
    SortOrder,
};
use crate::model::Sample;

#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    nodes: DashMap<String, Node>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn create(&self, node: Node) -> Result<Node> {
        self.nodes.insert(node.node_id.clone(), node.clone());
        Ok(node)
    }

    async fn read(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(self.nodes.get(node_id).map(|n| n.clone()))
    }

    async fn update(&self, node: Node) -> Result<Node> {
        if !self.nodes.contains_key(&node.node_id) {
            return Err(UptimeError::NotFound(format!("node {}", node.node_id)));
        }
        self.nodes.insert(node.node_id.clone(), node.clone());
        Ok(node)
    }

    async fn delete(&self, node_id: &str) -> Result<()> {
        self.nodes.remove(node_id);
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str, query: &ListNodesQuery) -> Result<PaginatedNodes> {
        let mut items: Vec<Node> = self
            .nodes
            .iter()
            .map(|e| e.value().clone())
            .filter(|n| n.user_id == user_id)
            .filter(|n| {
                query
                    .search
                    .as_ref()
                    .map(|s| n.name.to_lowercase().contains(&s.to_lowercase()))
                    .unwrap_or(true)
            })
            .filter(|n| query.status.map(|s| s == n.status).unwrap_or(true))
            .collect();

        items.sort_by(|a, b| {
            let ord = match query.sort_by {
                NodeSortBy::Name => a.name.cmp(&b.name),
                NodeSortBy::Uptime => a
                    .consecutive_failures
                    .cmp(&b.consecutive_failures)
                    .reverse(),
                NodeSortBy::LastCheck => a.last_check_at.cmp(&b.last_check_at),
                NodeSortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            match query.sort_order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });

        let total = items.len() as u64;
        let limit = query.limit.max(1) as usize;
        let page = query.page.max(1) as usize;
        let start = (page - 1) * limit;
        let page_items = items.into_iter().skip(start).take(limit).collect();

        Ok(PaginatedNodes {
            items: page_items,
            total,
            page: query.page.max(1),
            limit: query.limit,
        })
    }

    async fn list_active(&self) -> Result<Vec<Node>> {
        // Every non-paused node carries a timer (active/warning/down); see
        // spec.md §8's `active_count() <= |{active, warning, down}|` invariant.
        Ok(self
            .nodes
            .iter()
            .map(|e| e.value().clone())
            .filter(|n| n.status != NodeStatus::Paused)
            .collect())
    }

    async fn count_by_user(&self, user_id: &str) -> Result<u64> {
        Ok(self.nodes.iter().filter(|e| e.user_id == user_id).count() as u64)
    }

    async fn increment_failures(&self, increment: FailureIncrement) -> Result<Node> {
        let mut entry = self
            .nodes
            .get_mut(&increment.node_id)
            .ok_or_else(|| UptimeError::NotFound(format!("node {}", increment.node_id)))?;
        entry.consecutive_failures = increment.consecutive_failures;
        entry.status = increment.new_status;
        entry.last_check_at = Some(increment.last_check_at);
        entry.updated_at = increment.last_check_at;
        Ok(entry.clone())
    }

    async fn reset_failures(&self, node_id: &str, last_check_at: DateTime<Utc>) -> Result<Node> {
        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| UptimeError::NotFound(format!("node {node_id}")))?;
        entry.consecutive_failures = 0;
        entry.status = NodeStatus::Active;
        entry.last_check_at = Some(last_check_at);
        entry.updated_at = last_check_at;
        Ok(entry.clone())
    }

    async fn update_status(
        &self,
        node_id: &str,
        status: NodeStatus,
        consecutive_failures: Option<u32>,
    ) -> Result<Node> {
        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| UptimeError::NotFound(format!("node {node_id}")))?;
        entry.status = status;
        if let Some(cf) = consecutive_failures {
            entry.consecutive_failures = cf;
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn count_all_by_status(&self, status: NodeStatus) -> Result<u64> {
        Ok(self
            .nodes
            .iter()
            .filter(|e| e.value().status == status)
            .count() as u64)
    }
}

/// Append-only sample log, kept per-node in insertion (hence time) order.
/// Cross-node queries (`list_by_nodes`, `list_by_nodes_since`) merge the
/// relevant per-node logs rather than scanning a separate global log.
#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    by_node: DashMap<String, Vec<Sample>>,
}

impl InMemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SampleStore for InMemorySampleStore {
    async fn append(&self, sample: Sample) -> Result<Sample> {
        self.by_node
            .entry(sample.node_id.clone())
            .or_default()
            .push(sample.clone());
        Ok(sample)
    }

    async fn list_by_node(&self, node_id: &str, limit: u32) -> Result<Vec<Sample>> {
        let mut samples = self
            .by_node
            .get(node_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        samples.reverse();
        samples.truncate(limit as usize);
        Ok(samples)
    }

    async fn list_errors_by_node(&self, node_id: &str, limit: u32) -> Result<Vec<Sample>> {
        let mut samples: Vec<Sample> = self
            .by_node
            .get(node_id)
            .map(|v| v.iter().filter(|s| !s.success).cloned().collect())
            .unwrap_or_default();
        samples.reverse();
        samples.truncate(limit as usize);
        Ok(samples)
    }

    async fn list_by_nodes(&self, node_ids: &[String], limit: u32) -> Result<Vec<Sample>> {
        let mut merged: Vec<Sample> = node_ids
            .iter()
            .filter_map(|id| self.by_node.get(id))
            .flat_map(|v| v.clone())
            .collect();
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        merged.truncate(limit as usize);
        Ok(merged)
    }

    async fn list_by_node_since(
        &self,
        node_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        Ok(self
            .by_node
            .get(node_id)
            .map(|v| v.iter().filter(|s| s.created_at >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_by_nodes_since(
        &self,
        node_ids: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let mut merged: Vec<Sample> = node_ids
            .iter()
            .filter_map(|id| self.by_node.get(id))
            .flat_map(|v| v.iter().filter(|s| s.created_at >= since).cloned().collect::<Vec<_>>())
            .collect();
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(merged)
    }

    async fn delete_by_node(&self, node_id: &str) -> Result<()> {
        self.by_node.remove(node_id);
        Ok(())
    }

    async fn aggregate_counts(&self, node_id: &str) -> Result<(u64, u64)> {
        let samples = self.by_node.get(node_id);
        let Some(samples) = samples else {
            return Ok((0, 0));
        };
        let success = samples.iter().filter(|s| s.success).count() as u64;
        let failure = samples.len() as u64 - success;
        Ok((success, failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node_from_spec;
    use crate::model::NodeSpec;
    use std::collections::BTreeMap;

    fn spec() -> NodeSpec {
        NodeSpec {
            node_id: None,
            name: "api".into(),
            endpoint_url: "https://example.test/health".into(),
            method: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
            check_interval_ms: 15_000,
            expected_status_codes: None,
            failure_threshold: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let store = InMemoryNodeStore::new();
        let node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        store.create(node.clone()).await.unwrap();
        let read = store.read("n1").await.unwrap().unwrap();
        assert_eq!(read.node_id, "n1");
    }

    #[tokio::test]
    async fn test_delete_removes_node() {
        let store = InMemoryNodeStore::new();
        let node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        store.create(node).await.unwrap();
        store.delete("n1").await.unwrap();
        assert!(store.read("n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_excludes_paused_only() {
        let store = InMemoryNodeStore::new();
        for (id, status) in [
            ("a", NodeStatus::Active),
            ("b", NodeStatus::Warning),
            ("c", NodeStatus::Down),
            ("d", NodeStatus::Paused),
        ] {
            let mut node = node_from_spec(
                "u1".into(),
                id.into(),
                spec(),
                &Node::default_expected_status_codes(),
                Utc::now(),
            );
            node.status = status;
            store.create(node).await.unwrap();
        }
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 3);
        assert!(active.iter().all(|n| n.status != NodeStatus::Paused));
    }

    #[tokio::test]
    async fn test_increment_failures_updates_triple() {
        let store = InMemoryNodeStore::new();
        let node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        store.create(node).await.unwrap();
        let now = Utc::now();
        let updated = store
            .increment_failures(FailureIncrement {
                node_id: "n1".into(),
                new_status: NodeStatus::Warning,
                consecutive_failures: 2,
                last_check_at: now,
            })
            .await
            .unwrap();
        assert_eq!(updated.status, NodeStatus::Warning);
        assert_eq!(updated.consecutive_failures, 2);
        assert_eq!(updated.last_check_at, Some(now));
    }

    #[tokio::test]
    async fn test_sample_store_newest_first() {
        let store = InMemorySampleStore::new();
        for i in 0..3u64 {
            store
                .append(Sample {
                    sample_id: format!("s{i}"),
                    node_id: "n1".into(),
                    status_code: 200,
                    status_text: "OK".into(),
                    response_time_ms: 10,
                    success: true,
                    error_message: String::new(),
                    created_at: Utc::now() + chrono::Duration::milliseconds(i as i64),
                })
                .await
                .unwrap();
        }
        let samples = store.list_by_node("n1", 10).await.unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].sample_id, "s2");
        assert_eq!(samples[2].sample_id, "s0");
    }

    #[tokio::test]
    async fn test_delete_by_node_cascades() {
        let store = InMemorySampleStore::new();
        store
            .append(Sample {
                sample_id: "s1".into(),
                node_id: "n1".into(),
                status_code: 200,
                status_text: "OK".into(),
                response_time_ms: 10,
                success: true,
                error_message: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store.delete_by_node("n1").await.unwrap();
        assert!(store.list_by_node("n1", 10).await.unwrap().is_empty());
    }
}
