//! The Scheduler (spec.md §4.3) — the heart of the system. Owns exactly
//! one recurring timer per active node, guarantees at-most-one
//! concurrent probe per node, and rebuilds the timer set from the store
//! at `boot`.
//!
//! Concurrency model: the timer registry is a `DashMap` — single-writer
//! discipline per key, the same pattern the fleet node registry uses
//! elsewhere in this codebase. Each node's timer loop runs as its own
//! tokio task; the probe-and-persist work for a tick is spawned as a
//! *separate* detached task so that cancelling the timer (`stop_node`)
//! never aborts an in-flight probe (spec.md §5).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::model::{Node, NodeStatus, PROBE_TIMEOUT_MS};
use crate::probe::{ProbeExecutor, ProbeTarget};
use crate::store::{NodeStore, SampleStore};
use crate::transition::{self, StateUpdate};
use crate::model::Sample;

struct TimerEntry {
    join: JoinHandle<()>,
    in_flight: Arc<AtomicBool>,
}

struct SchedulerInner {
    registry: DashMap<String, TimerEntry>,
    node_store: Arc<dyn NodeStore>,
    sample_store: Arc<dyn SampleStore>,
    probe_executor: Arc<ProbeExecutor>,
    probe_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerInner {
    fn cancel(&self, node_id: &str) {
        if let Some((_, entry)) = self.registry.remove(node_id) {
            entry.join.abort();
        }
        self.record_active_gauge();
    }

    fn track_probe_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.probe_tasks.lock().expect("probe task list poisoned");
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Publishes the current timer count on the `scheduler_active_timers`
    /// gauge (SPEC_FULL.md §E). Called after every registry mutation.
    fn record_active_gauge(&self) {
        gauge!("scheduler_active_timers", self.registry.len() as f64);
    }
}

/// Owns the per-node timer registry and fires probes on schedule.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        node_store: Arc<dyn NodeStore>,
        sample_store: Arc<dyn SampleStore>,
        probe_executor: Arc<ProbeExecutor>,
    ) -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                registry: DashMap::new(),
                node_store,
                sample_store,
                probe_executor,
                probe_tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Installs a repeating timer for `node`. Cancels any predecessor
    /// timer for the same node first. The first tick fires no sooner
    /// than `check_interval_ms` from now — there is no immediate probe.
    #[instrument(skip(self, node), fields(node_id = %node.node_id))]
    pub fn start_node(&self, node: &Node) {
        let node_id = node.node_id.clone();
        let interval_ms = node.check_interval_ms.max(1);
        let in_flight = Arc::new(AtomicBool::new(false));

        let inner = self.inner.clone();
        let task_in_flight = in_flight.clone();
        let task_node_id = node_id.clone();
        let join = tokio::spawn(async move {
            run_node_timer(inner, task_node_id, interval_ms, task_in_flight).await;
        });

        let previous = self
            .inner
            .registry
            .insert(node_id.clone(), TimerEntry { join, in_flight });
        if let Some(previous) = previous {
            previous.join.abort();
            debug!(node_id = %node_id, "cancelled predecessor timer before reinstall");
        }
        self.inner.record_active_gauge();
        info!(node_id = %node_id, interval_ms, "timer installed");
    }

    /// Cancels the timer for `node_id`, if present. No-op otherwise. Safe
    /// to call from a tick callback (the callback simply returns after).
    pub fn stop_node(&self, node_id: &str) {
        self.inner.cancel(node_id);
        debug!(node_id, "timer cancelled");
    }

    pub fn is_scheduled(&self, node_id: &str) -> bool {
        self.inner.registry.contains_key(node_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Cancels every timer and clears the registry. Does not abort
    /// in-flight probes; awaits their completion up to the probe
    /// deadline as a bounded grace period.
    pub async fn stop_all(&self) {
        let node_ids: Vec<String> = self
            .inner
            .registry
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for id in &node_ids {
            self.inner.cancel(id);
        }
        info!(count = node_ids.len(), "all timers cancelled");

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.probe_tasks.lock().expect("probe task list poisoned");
            tasks.drain(..).collect()
        };
        let deadline = Duration::from_millis(PROBE_TIMEOUT_MS);
        for handle in handles {
            let _ = time::timeout(deadline, handle).await;
        }
    }

    /// Executed once at process start: installs a timer for every
    /// currently non-paused node.
    pub async fn boot(&self) -> crate::error::Result<()> {
        let nodes = self.inner.node_store.list_active().await?;
        let count = nodes.len();
        for node in &nodes {
            self.start_node(node);
        }
        info!(count, "scheduler booted from store");
        Ok(())
    }
}

async fn run_node_timer(
    inner: Arc<SchedulerInner>,
    node_id: String,
    interval_ms: u64,
    in_flight: Arc<AtomicBool>,
) {
    let period = Duration::from_millis(interval_ms);
    let mut interval = time::interval_at(TokioInstant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let node = match inner.node_store.read(&node_id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                debug!(node_id = %node_id, "node deleted; cancelling timer");
                inner.registry.remove(&node_id);
                inner.record_active_gauge();
                return;
            }
            Err(e) => {
                error!(node_id = %node_id, error = %e, "tick: node read failed; tick swallowed");
                continue;
            }
        };

        if node.status == NodeStatus::Paused {
            debug!(node_id = %node_id, "node paused; cancelling timer");
            inner.registry.remove(&node_id);
            inner.record_active_gauge();
            return;
        }

        if in_flight.swap(true, Ordering::SeqCst) {
            counter!("scheduler_ticks_skipped_total", 1);
            warn!(node_id = %node_id, "previous probe still in flight; tick skipped");
            continue;
        }

        let cycle_inner = inner.clone();
        let cycle_in_flight = in_flight.clone();
        let handle = tokio::spawn(async move {
            run_probe_cycle(cycle_inner, node).await;
            cycle_in_flight.store(false, Ordering::SeqCst);
        });
        inner.track_probe_task(handle);
    }
}

/// Runs one probe to completion, persists the sample, and applies the
/// resulting state transition. Any error here is logged and swallowed
/// (spec.md §7) — the caller's timer loop continues regardless.
async fn run_probe_cycle(inner: Arc<SchedulerInner>, node: Node) {
    let target = ProbeTarget {
        endpoint_url: node.endpoint_url.clone(),
        method: node.method,
        headers: node.headers.clone(),
        body: node.body.clone(),
        expected_status_codes: node.expected_status_codes.clone(),
    };

    let outcome = inner.probe_executor.execute(&target).await;
    let now = Utc::now();

    counter!("probe_executed_total", 1);
    if outcome.success {
        counter!("probe_succeeded_total", 1);
    } else {
        counter!("probe_failed_total", 1);
    }

    let sample = Sample {
        sample_id: Uuid::new_v4().to_string(),
        node_id: node.node_id.clone(),
        status_code: outcome.status_code,
        status_text: outcome.status_text.clone(),
        response_time_ms: outcome.response_time_ms,
        success: outcome.success,
        error_message: outcome.error_message.clone(),
        created_at: now,
    };

    if let Err(e) = inner.sample_store.append(sample).await {
        error!(node_id = %node.node_id, error = %e, "failed to persist sample; tick swallowed");
        return;
    }

    let update = transition::apply(&node, &outcome, now);
    let persisted = match update {
        StateUpdate::Reset { last_check_at } => {
            inner.node_store.reset_failures(&node.node_id, last_check_at).await
        }
        StateUpdate::Increment(increment) => inner.node_store.increment_failures(increment).await,
    };

    match persisted {
        Ok(updated) => {
            if updated.status != node.status {
                info!(
                    node_id = %node.node_id,
                    from = ?node.status,
                    to = ?updated.status,
                    "node status transition"
                );
                counter!("state_transition_total", 1);
            }
        }
        Err(e) => {
            error!(node_id = %node.node_id, error = %e, "failed to persist state update; tick swallowed");
        }
    }
}

/// Convenience used by `TestProbe`/`TestConnection` (spec.md §6): runs
/// the Probe Executor once, outside the scheduler, persisting nothing.
pub async fn test_probe(
    executor: &ProbeExecutor,
    endpoint_url: String,
    method: crate::model::HttpMethod,
    headers: std::collections::BTreeMap<String, String>,
    body: Vec<u8>,
    expected_status_codes: BTreeSet<u16>,
) -> crate::probe::ProbeOutcome {
    let target = ProbeTarget {
        endpoint_url,
        method,
        headers,
        body,
        expected_status_codes,
    };
    executor.execute(&target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node_from_spec;
    use crate::model::NodeSpec;
    use crate::store::memory::{InMemoryNodeStore, InMemorySampleStore};
    use std::collections::BTreeMap;

    fn spec(interval_ms: u64) -> NodeSpec {
        NodeSpec {
            node_id: None,
            name: "api".into(),
            endpoint_url: "http://127.0.0.1:1/unreachable".into(),
            method: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
            check_interval_ms: interval_ms,
            expected_status_codes: None,
            failure_threshold: None,
        }
    }

    fn test_scheduler() -> (Scheduler, Arc<InMemoryNodeStore>, Arc<InMemorySampleStore>) {
        let node_store = Arc::new(InMemoryNodeStore::new());
        let sample_store = Arc::new(InMemorySampleStore::new());
        let executor = Arc::new(ProbeExecutor::new());
        let scheduler = Scheduler::new(
            node_store.clone() as Arc<dyn NodeStore>,
            sample_store.clone() as Arc<dyn SampleStore>,
            executor,
        );
        (scheduler, node_store, sample_store)
    }

    #[tokio::test]
    async fn test_start_then_stop_updates_active_count() {
        let (scheduler, node_store, _samples) = test_scheduler();
        let node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(15_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        node_store.create(node.clone()).await.unwrap();

        scheduler.start_node(&node);
        assert!(scheduler.is_scheduled("n1"));
        assert_eq!(scheduler.active_count(), 1);

        scheduler.stop_node("n1");
        assert!(!scheduler.is_scheduled("n1"));
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_replaces_predecessor_timer() {
        let (scheduler, node_store, _samples) = test_scheduler();
        let node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(15_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        node_store.create(node.clone()).await.unwrap();

        scheduler.start_node(&node);
        scheduler.start_node(&node);
        assert_eq!(scheduler.active_count(), 1);
    }

    #[tokio::test]
    async fn test_boot_installs_timer_for_every_non_paused_node() {
        let (scheduler, node_store, _samples) = test_scheduler();
        let mut active = node_from_spec(
            "u1".into(),
            "a".into(),
            spec(15_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        active.status = NodeStatus::Active;
        let mut warning = node_from_spec(
            "u1".into(),
            "b".into(),
            spec(15_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        warning.status = NodeStatus::Warning;
        let mut paused = node_from_spec(
            "u1".into(),
            "c".into(),
            spec(15_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        paused.status = NodeStatus::Paused;

        node_store.create(active).await.unwrap();
        node_store.create(warning).await.unwrap();
        node_store.create(paused).await.unwrap();

        scheduler.boot().await.unwrap();
        assert_eq!(scheduler.active_count(), 2);
        assert!(scheduler.is_scheduled("a"));
        assert!(scheduler.is_scheduled("b"));
        assert!(!scheduler.is_scheduled("c"));
    }

    #[tokio::test]
    async fn test_stop_all_clears_registry() {
        let (scheduler, node_store, _samples) = test_scheduler();
        let node = node_from_spec(
            "u1".into(),
            "n1".into(),
            spec(15_000),
            &Node::default_expected_status_codes(),
            Utc::now(),
        );
        node_store.create(node.clone()).await.unwrap();
        scheduler.start_node(&node);
        assert_eq!(scheduler.active_count(), 1);
        scheduler.stop_all().await;
        assert_eq!(scheduler.active_count(), 0);
    }
}
