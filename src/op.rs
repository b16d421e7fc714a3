//! Replication operation value types.
//!
//! A replication operation moves one shard's data from a source replica to
//! a target replica on another node. Operations are identified by a
//! cluster-unique id assigned by the leader and carry the fully-qualified
//! names of both replicas involved.
//!
//! # Lifecycle
//!
//! ```text
//! REGISTERED ──→ HYDRATING ──→ FINALIZING ──→ READY
//!                    │              │
//!                    ↓              ↓
//!                CANCELLED      CANCELLED
//! ```
//!
//! - **REGISTERED**: the operation exists but no worker has begun.
//! - **HYDRATING**: bulk data copy in progress; the target replica serves
//!   neither reads nor writes.
//! - **FINALIZING**: copy complete, final sync underway; the target accepts
//!   writes (so in-flight writes are not lost) but not reads.
//! - **READY**: the target is a full member of the shard.
//! - **CANCELLED**: terminal failure.

use std::fmt;

/// Fully-qualified replica identifier: node + collection + shard.
///
/// Equality is structural; the type is used as a map key in the
/// replication FSM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardFqdn {
    /// Node hosting (or destined to host) the replica.
    pub node_id: String,
    /// Collection the shard belongs to.
    pub collection_id: String,
    /// Shard identifier within the collection.
    pub shard_id: String,
}

impl ShardFqdn {
    pub fn new(
        node_id: impl Into<String>,
        collection_id: impl Into<String>,
        shard_id: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            collection_id: collection_id.into(),
            shard_id: shard_id.into(),
        }
    }
}

impl fmt::Display for ShardFqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.node_id, self.collection_id, self.shard_id)
    }
}

/// A single shard replication operation: copy `source_shard` to
/// `target_shard`.
///
/// Source and target always name the same collection and shard; only the
/// node differs. The constructor enforces this by building both FQDNs from
/// one collection/shard pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardReplicationOp {
    /// Cluster-unique operation id, assigned by the leader.
    pub id: u64,
    /// Replica the data is copied from.
    pub source_shard: ShardFqdn,
    /// Replica being created on this node.
    pub target_shard: ShardFqdn,
}

impl ShardReplicationOp {
    pub fn new(
        id: u64,
        source_node: impl Into<String>,
        target_node: impl Into<String>,
        collection_id: impl Into<String>,
        shard_id: impl Into<String>,
    ) -> Self {
        let collection_id = collection_id.into();
        let shard_id = shard_id.into();
        Self {
            id,
            source_shard: ShardFqdn::new(source_node, collection_id.clone(), shard_id.clone()),
            target_shard: ShardFqdn::new(target_node, collection_id, shard_id),
        }
    }
}

/// Lifecycle state of a replication operation.
///
/// The `Display` form is the label exported on the
/// `replication_operation_fsm_ops_by_state` gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationOpState {
    /// Operation registered, no worker has begun.
    Registered,
    /// Bulk data copy in progress.
    Hydrating,
    /// Copy complete, final sync underway.
    Finalizing,
    /// Target replica fully serves reads and writes.
    Ready,
    /// Terminal failure.
    Cancelled,
}

impl ReplicationOpState {
    /// Terminal states are eligible for garbage collection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplicationOpState::Ready | ReplicationOpState::Cancelled)
    }
}

impl fmt::Display for ReplicationOpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicationOpState::Registered => "REGISTERED",
            ReplicationOpState::Hydrating => "HYDRATING",
            ReplicationOpState::Finalizing => "FINALIZING",
            ReplicationOpState::Ready => "READY",
            ReplicationOpState::Cancelled => "CANCELLED",
        };
        write!(f, "{name}")
    }
}

/// Status record kept per operation by the replication FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardReplicationOpStatus {
    /// Current lifecycle state.
    pub state: ReplicationOpState,
}

impl ShardReplicationOpStatus {
    pub fn new(state: ReplicationOpState) -> Self {
        Self { state }
    }

    /// Whether the operation should be picked up again after an engine
    /// restart. Operations that never made it past the copy phase are
    /// restarted; everything later is driven to completion by the leader.
    pub fn should_restart(&self) -> bool {
        matches!(
            self.state,
            ReplicationOpState::Registered | ReplicationOpState::Hydrating
        )
    }
}

impl Default for ShardReplicationOpStatus {
    fn default() -> Self {
        Self {
            state: ReplicationOpState::Registered,
        }
    }
}
