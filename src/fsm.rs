// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory projection of shard replication operations.
//!
//! [`ShardReplicationFsm`] mirrors the authoritative leader FSM for the
//! operations relevant to request routing and to this node's replication
//! engine. It is *not* the source of truth: the leader log replay applies
//! every op creation, state transition, and deletion here, and the serving
//! path queries it to decide which replicas of a shard may serve reads and
//! writes while a replica movement is in flight.
//!
//! # Read/write eligibility
//!
//! Keyed on the state of the op targeting a replica, if any:
//!
//! | Op targeting the replica | Readable | Writable |
//! |--------------------------|----------|----------|
//! | none                     | yes      | yes      |
//! | REGISTERED               | no       | no       |
//! | HYDRATING                | no       | no       |
//! | FINALIZING               | no       | yes      |
//! | READY                    | yes      | yes      |
//! | CANCELLED                | yes      | yes      |
//!
//! FINALIZING accepts writes so that nothing in flight is lost during the
//! final sync, while reads stay on the established replicas until the
//! target is consistent.
//!
//! # Concurrency
//!
//! All indices live behind a single reader/writer lock. Queries take the
//! shared lock, projection updates take the exclusive lock, and nothing
//! ever performs I/O or awaits while holding either. The per-state op
//! gauge is updated inside the write lock so scrapes see consistent
//! counts.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::op::{ReplicationOpState, ShardFqdn, ShardReplicationOp, ShardReplicationOpStatus};

#[derive(Default)]
struct FsmIndices {
    /// Ops whose *target* node equals the key.
    ops_by_node: HashMap<String, Vec<ShardReplicationOp>>,
    /// Ops per target collection.
    ops_by_collection: HashMap<String, Vec<ShardReplicationOp>>,
    /// Ops per target shard.
    ops_by_shard: HashMap<String, Vec<ShardReplicationOp>>,
    /// The registered op (if any) for each destination replica.
    ops_by_target_fqdn: HashMap<ShardFqdn, ShardReplicationOp>,
    /// Op id -> op.
    ops_by_id: HashMap<u64, ShardReplicationOp>,
    /// Op -> status.
    ops_status: HashMap<ShardReplicationOp, ShardReplicationOpStatus>,
}

/// Projection of replication ops indexed for routing and engine queries.
#[derive(Default)]
pub struct ShardReplicationFsm {
    indices: RwLock<FsmIndices>,
}

impl ShardReplicationFsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project a newly created replication op.
    ///
    /// There may be at most one in-flight op per target replica; a second
    /// registration for the same target FQDN is rejected. Re-registering
    /// the exact same op id is tolerated as a no-op so the leader log can
    /// be replayed.
    pub fn register_op(&self, op: ShardReplicationOp) -> Result<()> {
        let mut indices = self.indices.write();

        if let Some(existing) = indices.ops_by_target_fqdn.get(&op.target_shard) {
            if existing.id == op.id {
                return Ok(());
            }
            return Err(ReplicationError::ReplicaBusy {
                target: op.target_shard.to_string(),
            });
        }

        indices
            .ops_by_node
            .entry(op.target_shard.node_id.clone())
            .or_default()
            .push(op.clone());
        indices
            .ops_by_collection
            .entry(op.target_shard.collection_id.clone())
            .or_default()
            .push(op.clone());
        indices
            .ops_by_shard
            .entry(op.target_shard.shard_id.clone())
            .or_default()
            .push(op.clone());
        indices
            .ops_by_target_fqdn
            .insert(op.target_shard.clone(), op.clone());
        indices.ops_by_id.insert(op.id, op.clone());

        let status = ShardReplicationOpStatus::default();
        metrics::inc_fsm_ops_in_state(status.state);
        indices.ops_status.insert(op, status);

        Ok(())
    }

    /// Project a status transition observed from the leader.
    ///
    /// Returns `false` for an unknown op id, which the projection
    /// tolerates (the leader log is delivered at least once and may be
    /// replayed past local removals).
    pub fn update_op_state(&self, op_id: u64, state: ReplicationOpState) -> bool {
        let mut indices = self.indices.write();

        let Some(op) = indices.ops_by_id.get(&op_id).cloned() else {
            debug!(op = op_id, state = %state, "ignoring state update for unknown replication op");
            return false;
        };

        if let Some(status) = indices.ops_status.get_mut(&op) {
            if status.state != state {
                metrics::dec_fsm_ops_in_state(status.state);
                metrics::inc_fsm_ops_in_state(state);
                status.state = state;
            }
        }
        true
    }

    /// Drop an op from every index.
    ///
    /// Returns `false` for an unknown op id.
    pub fn remove_op(&self, op_id: u64) -> bool {
        let mut indices = self.indices.write();
        Self::remove_locked(&mut indices, op_id)
    }

    /// Sweep ops that reached a terminal state (READY or CANCELLED).
    ///
    /// Returns how many ops were collected.
    pub fn gc_terminal_ops(&self) -> usize {
        let mut indices = self.indices.write();

        let terminal: Vec<u64> = indices
            .ops_status
            .iter()
            .filter(|(_, status)| status.state.is_terminal())
            .map(|(op, _)| op.id)
            .collect();

        let collected = terminal.len();
        for op_id in terminal {
            Self::remove_locked(&mut indices, op_id);
        }

        if collected > 0 {
            debug!(collected, "garbage collected terminal replication ops");
        }
        collected
    }

    fn remove_locked(indices: &mut FsmIndices, op_id: u64) -> bool {
        let Some(op) = indices.ops_by_id.remove(&op_id) else {
            return false;
        };

        // Empty entries are dropped so the per-shard short-circuit in
        // filter_one_shard_replicas_read_write stays accurate.
        if let Some(ops) = indices.ops_by_node.get_mut(&op.target_shard.node_id) {
            ops.retain(|o| o.id != op_id);
            if ops.is_empty() {
                indices.ops_by_node.remove(&op.target_shard.node_id);
            }
        }
        if let Some(ops) = indices.ops_by_collection.get_mut(&op.target_shard.collection_id) {
            ops.retain(|o| o.id != op_id);
            if ops.is_empty() {
                indices
                    .ops_by_collection
                    .remove(&op.target_shard.collection_id);
            }
        }
        if let Some(ops) = indices.ops_by_shard.get_mut(&op.target_shard.shard_id) {
            ops.retain(|o| o.id != op_id);
            if ops.is_empty() {
                indices.ops_by_shard.remove(&op.target_shard.shard_id);
            }
        }
        indices.ops_by_target_fqdn.remove(&op.target_shard);

        if let Some(status) = indices.ops_status.remove(&op) {
            metrics::dec_fsm_ops_in_state(status.state);
        }
        true
    }

    /// Snapshot of the ops targeting `node`.
    ///
    /// Callers may not assume stability across calls.
    pub fn get_ops_for_node(&self, node: &str) -> Vec<ShardReplicationOp> {
        let indices = self.indices.read();
        indices.ops_by_node.get(node).cloned().unwrap_or_default()
    }

    /// Current status of `op`; the default (REGISTERED) if unknown.
    pub fn get_op_state(&self, op: &ShardReplicationOp) -> ShardReplicationOpStatus {
        let indices = self.indices.read();
        indices.ops_status.get(op).copied().unwrap_or_default()
    }

    /// Total number of projected ops.
    pub fn op_count(&self) -> usize {
        self.indices.read().ops_by_id.len()
    }

    /// Partition the candidate replica locations of one shard into
    /// read-eligible and write-eligible sets.
    ///
    /// If no op targets the shard at all, every replica serves both and
    /// the input is returned unchanged for both sets.
    pub fn filter_one_shard_replicas_read_write(
        &self,
        collection: &str,
        shard: &str,
        shard_replicas_location: &[String],
    ) -> (Vec<String>, Vec<String>) {
        let indices = self.indices.read();

        if !indices.ops_by_shard.contains_key(shard) {
            return (
                shard_replicas_location.to_vec(),
                shard_replicas_location.to_vec(),
            );
        }

        let mut read_replicas = Vec::with_capacity(shard_replicas_location.len());
        let mut write_replicas = Vec::with_capacity(shard_replicas_location.len());
        for replica in shard_replicas_location {
            let (read_ok, write_ok) =
                Self::filter_one_replica_read_write(&indices, replica, collection, shard);
            if read_ok {
                read_replicas.push(replica.clone());
            }
            if write_ok {
                write_replicas.push(replica.clone());
            }
        }

        (read_replicas, write_replicas)
    }

    fn filter_one_replica_read_write(
        indices: &FsmIndices,
        node: &str,
        collection: &str,
        shard: &str,
    ) -> (bool, bool) {
        let target = ShardFqdn::new(node, collection, shard);
        let Some(op) = indices.ops_by_target_fqdn.get(&target) else {
            // No replication op for this replica; usable for both.
            return (true, true);
        };
        let Some(status) = indices.ops_status.get(op) else {
            return (true, true);
        };

        match status.state {
            ReplicationOpState::Finalizing => (false, true),
            ReplicationOpState::Ready | ReplicationOpState::Cancelled => (true, true),
            ReplicationOpState::Registered | ReplicationOpState::Hydrating => (false, false),
        }
    }
}
