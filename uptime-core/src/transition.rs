//! The State Transition Engine (spec.md §4.2): a pure function from a
//! node's persisted counters and a probe outcome to the next counters and
//! status, plus the mutation the caller must persist.

use chrono::{DateTime, Utc};

use crate::model::{Node, NodeStatus, WARNING_THRESHOLD};
use crate::probe::ProbeOutcome;
use crate::store::FailureIncrement;

/// The persistence mutation `apply` computes. The caller is responsible
/// for writing it through the Node Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// Zero the failure counter, set `status = active`, stamp `last_check_at`.
    Reset { last_check_at: DateTime<Utc> },
    /// Bump the failure counter, stamp `last_check_at`, transition `status`
    /// if the new count crosses the warning/down thresholds.
    Increment(FailureIncrement),
}

/// Computes the next state for `node` given `outcome`, following the
/// truth table in spec.md §4.2. `now` is the probe completion time.
///
/// Pure: does not read or write any store. Idempotent on a repeated
/// success outcome against a node already at `consecutive_failures = 0`
/// (only `last_check_at` changes).
pub fn apply(node: &Node, outcome: &ProbeOutcome, now: DateTime<Utc>) -> StateUpdate {
    if outcome.success {
        return StateUpdate::Reset { last_check_at: now };
    }

    let new_count = node.consecutive_failures.saturating_add(1);

    // `down` is evaluated before `warning` so a `failure_threshold` of 1 or
    // 2 cannot let `warning` overwrite `down` (spec.md's open question;
    // the table, not the source's branch order, is authoritative). The
    // warning branch fires only at exactly `new_count == WARNING_THRESHOLD`
    // — using `>=` here would let a node already past `failure_threshold`
    // flap back to `warning` on every tick the `down` guard (`status !=
    // Down`) happens to be false, since the `warning` guard only checks
    // `status != Warning`.
    let new_status = if new_count >= node.failure_threshold && node.status != NodeStatus::Down {
        NodeStatus::Down
    } else if new_count == WARNING_THRESHOLD && node.status != NodeStatus::Warning {
        NodeStatus::Warning
    } else {
        node.status
    };

    StateUpdate::Increment(FailureIncrement {
        node_id: node.node_id.clone(),
        new_status,
        consecutive_failures: new_count,
        last_check_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn node_with(status: NodeStatus, consecutive_failures: u32, failure_threshold: u32) -> Node {
        let now = Utc::now();
        Node {
            node_id: "n1".into(),
            user_id: "u1".into(),
            name: "api".into(),
            endpoint_url: "https://example.test".into(),
            method: crate::model::HttpMethod::Get,
            headers: BTreeMap::new(),
            body: Vec::new(),
            check_interval_ms: 15_000,
            expected_status_codes: BTreeSet::from([200]),
            failure_threshold,
            status,
            consecutive_failures,
            last_check_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn success() -> ProbeOutcome {
        ProbeOutcome {
            status_code: 200,
            status_text: "OK".into(),
            response_time_ms: 10,
            success: true,
            error_message: String::new(),
            response_headers: BTreeMap::new(),
            response_body_excerpt: Vec::new(),
        }
    }

    fn failure() -> ProbeOutcome {
        ProbeOutcome {
            status_code: 503,
            status_text: "Service Unavailable".into(),
            response_time_ms: 10,
            success: false,
            error_message: String::new(),
            response_headers: BTreeMap::new(),
            response_body_excerpt: Vec::new(),
        }
    }

    #[test]
    fn test_first_success_is_reset() {
        let node = node_with(NodeStatus::Active, 0, 3);
        let now = Utc::now();
        assert_eq!(apply(&node, &success(), now), StateUpdate::Reset { last_check_at: now });
    }

    #[test]
    fn test_recovery_after_failures_resets() {
        let node = node_with(NodeStatus::Down, 5, 3);
        let now = Utc::now();
        assert_eq!(apply(&node, &success(), now), StateUpdate::Reset { last_check_at: now });
    }

    #[test]
    fn test_first_failure_stays_active() {
        let node = node_with(NodeStatus::Active, 0, 3);
        let now = Utc::now();
        let update = apply(&node, &failure(), now);
        match update {
            StateUpdate::Increment(inc) => {
                assert_eq!(inc.consecutive_failures, 1);
                assert_eq!(inc.new_status, NodeStatus::Active);
            }
            _ => panic!("expected increment"),
        }
    }

    #[test]
    fn test_second_failure_enters_warning() {
        let node = node_with(NodeStatus::Active, 1, 3);
        let now = Utc::now();
        let update = apply(&node, &failure(), now);
        match update {
            StateUpdate::Increment(inc) => {
                assert_eq!(inc.consecutive_failures, 2);
                assert_eq!(inc.new_status, NodeStatus::Warning);
            }
            _ => panic!("expected increment"),
        }
    }

    #[test]
    fn test_third_failure_enters_down_at_threshold_three() {
        let node = node_with(NodeStatus::Warning, 2, 3);
        let now = Utc::now();
        let update = apply(&node, &failure(), now);
        match update {
            StateUpdate::Increment(inc) => {
                assert_eq!(inc.consecutive_failures, 3);
                assert_eq!(inc.new_status, NodeStatus::Down);
            }
            _ => panic!("expected increment"),
        }
    }

    #[test]
    fn test_threshold_one_skips_warning_goes_straight_to_down() {
        let node = node_with(NodeStatus::Active, 0, 1);
        let now = Utc::now();
        let update = apply(&node, &failure(), now);
        match update {
            StateUpdate::Increment(inc) => {
                assert_eq!(inc.consecutive_failures, 1);
                assert_eq!(inc.new_status, NodeStatus::Down);
            }
            _ => panic!("expected increment"),
        }
    }

    #[test]
    fn test_already_down_stays_down_without_status_flap() {
        let node = node_with(NodeStatus::Down, 5, 3);
        let now = Utc::now();
        let update = apply(&node, &failure(), now);
        match update {
            StateUpdate::Increment(inc) => {
                assert_eq!(inc.consecutive_failures, 6);
                assert_eq!(inc.new_status, NodeStatus::Down);
            }
            _ => panic!("expected increment"),
        }
    }
}
