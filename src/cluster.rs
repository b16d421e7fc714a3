// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster integration traits.
//!
//! Defines the contracts the replication engine consumes from the rest of
//! the node: the leader FSM client ([`FsmUpdater`]), the byte-level replica
//! copy primitive ([`ReplicaCopier`]), and a [`TimeProvider`] injected for
//! test determinism. The node daemon provides the implementations; the
//! engine only ever holds them as trait objects, which keeps every
//! collaborator mockable in tests.
//!
//! # Example
//!
//! ```rust
//! use shard_replication_engine::cluster::{BoxFuture, FsmUpdater};
//! use shard_replication_engine::op::ReplicationOpState;
//! use tokio_util::sync::CancellationToken;
//!
//! struct InProcessLeader { /* ... */ }
//!
//! impl FsmUpdater for InProcessLeader {
//!     fn replication_update_replica_op_status(
//!         &self,
//!         _op_id: u64,
//!         _state: ReplicationOpState,
//!     ) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn add_replica_to_shard(
//!         &self,
//!         _ctx: CancellationToken,
//!         _collection_id: &str,
//!         _shard_id: &str,
//!         _node_id: &str,
//!     ) -> BoxFuture<'_, u64> {
//!         Box::pin(async move { Ok(0) })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::op::ReplicationOpState;

/// Result type for cluster calls.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ClusterResult<T>> + Send + 'a>>;

/// Simplified error for cluster calls.
///
/// Failures crossing this seam are treated uniformly as transient by the
/// operation processor; the message is preserved for logging.
#[derive(Debug, Clone)]
pub struct ClusterError(pub String);

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ClusterError {}

/// Client for mutating the cluster-wide authoritative replication FSM.
///
/// The leader FSM is reached through consensus and is assumed
/// linearizable. Both calls are required to be idempotent: setting a state
/// an op already has is a no-op, and adding a replica that is already part
/// of the shard succeeds without effect. The operation processor relies on
/// this when re-issuing the full sequence on retry.
pub trait FsmUpdater: Send + Sync + 'static {
    /// Transition the replication op with id `op_id` to `state`.
    fn replication_update_replica_op_status(
        &self,
        op_id: u64,
        state: ReplicationOpState,
    ) -> BoxFuture<'_, ()>;

    /// Register `node_id` as a serving replica of the shard.
    ///
    /// Returns the resulting sharding state version.
    fn add_replica_to_shard(
        &self,
        ctx: CancellationToken,
        collection_id: &str,
        shard_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, u64>;
}

/// Byte-level replica copy primitive.
///
/// Physically moves shard data from `source_node_id` onto the local node.
/// The call blocks until the copy finishes, fails, or `ctx` fires.
/// Implementations must be restart-safe: a copy aborted mid-way must be
/// resumable or restartable from scratch on the next attempt without
/// manual cleanup (e.g. write to a staging path and rename atomically on
/// success). The engine never inspects partial state.
pub trait ReplicaCopier: Send + Sync + 'static {
    fn copy_replica(
        &self,
        ctx: CancellationToken,
        source_node_id: &str,
        collection_id: &str,
        shard_id: &str,
    ) -> BoxFuture<'_, ()>;
}

/// Clock abstraction so tests can control observed durations.
pub trait TimeProvider: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// [`TimeProvider`] backed by the system monotonic clock.
#[derive(Debug, Clone, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
