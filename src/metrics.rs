//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Replication operations per FSM lifecycle state
//! - Engine running state
//! - Produced/completed/failed/timed-out operations
//! - Per-operation processing duration
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.
//!
//! The `replication_operation_fsm_ops_by_state` gauge vector is maintained
//! by [`crate::fsm::ShardReplicationFsm`] and is updated synchronously
//! under its lock on every state transition, so scrapes always observe a
//! consistent per-state count.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::op::ReplicationOpState;

/// Increment the per-state op count gauge.
pub fn inc_fsm_ops_in_state(state: ReplicationOpState) {
    gauge!("replication_operation_fsm_ops_by_state", "state" => state.to_string()).increment(1.0);
}

/// Decrement the per-state op count gauge.
pub fn dec_fsm_ops_in_state(state: ReplicationOpState) {
    gauge!("replication_operation_fsm_ops_by_state", "state" => state.to_string()).decrement(1.0);
}

/// Gauge for whether the engine's producer/consumer pipeline is running.
pub fn set_engine_running(node_id: &str, running: bool) {
    let value = if running { 1.0 } else { 0.0 };
    gauge!("replication_engine_running", "node" => node_id.to_string()).set(value);
}

/// Record an op handed to the op channel by the producer.
pub fn record_op_produced(node_id: &str) {
    counter!("replication_engine_ops_produced_total", "node" => node_id.to_string()).increment(1);
}

/// Record a successfully completed replication operation.
pub fn record_op_completed(node_id: &str, duration: Duration) {
    counter!("replication_engine_ops_completed_total", "node" => node_id.to_string()).increment(1);
    histogram!("replication_engine_op_duration_seconds", "node" => node_id.to_string())
        .record(duration.as_secs_f64());
}

/// Record a replication operation that exhausted its retries.
pub fn record_op_failed(node_id: &str) {
    counter!("replication_engine_ops_failed_total", "node" => node_id.to_string()).increment(1);
}

/// Record a replication operation that exceeded its deadline.
pub fn record_op_timed_out(node_id: &str) {
    counter!("replication_engine_ops_timed_out_total", "node" => node_id.to_string()).increment(1);
}
