// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Op consumers: execute replica copy operations.
//!
//! [`CopyOpConsumer`] drains the engine's op channel and runs each
//! operation on a worker task, holding a slot from a bounded
//! [`Bulkhead`](crate::resilience::Bulkhead) so that at most `max_workers`
//! copies run concurrently. Each worker drives the three-step sequence
//! against the cluster:
//!
//! 1. transition the op to HYDRATING via the leader FSM,
//! 2. copy the replica data from the source node,
//! 3. register the new replica in the sharding state.
//!
//! Transient failures retry the whole sequence under the configured
//! backoff policy - the leader calls are idempotent, so re-issuing the
//! status update costs nothing next to the copy itself. A failed op is
//! logged and left in the FSM for a later cycle; it never fails the
//! consumer. The consumer itself only returns on cancellation or channel
//! close, and always waits for in-flight workers before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::{FsmUpdater, ReplicaCopier, TimeProvider};
use crate::error::{BoxFuture, ReplicationError, Result};
use crate::metrics;
use crate::op::{ReplicationOpState, ShardReplicationOp};
use crate::resilience::{BackoffPolicy, Bulkhead};

/// Sink of replication operations.
///
/// # Contract
///
/// `consume` must process ops from `ops` until one of:
///
/// - `ctx` is cancelled: wait for outstanding work, then return
///   [`ReplicationError::Canceled`];
/// - the channel closes: wait for outstanding work, then return `Ok(())`;
/// - an unrecoverable error in the consumer itself (not in an individual
///   op) occurs: return it (fatal for the engine cycle).
pub trait OpConsumer: Send + Sync + 'static {
    fn consume(
        &self,
        ctx: CancellationToken,
        ops: mpsc::Receiver<ShardReplicationOp>,
    ) -> BoxFuture<'_, ()>;
}

/// Worker-pool consumer that executes replica copy operations.
///
/// One instance runs per node. Cloning is cheap (all collaborators sit
/// behind `Arc`s) and shares the worker slots, which is how each spawned
/// worker task gets access to the cluster clients.
#[derive(Clone)]
pub struct CopyOpConsumer {
    /// Client for the authoritative leader FSM.
    leader_client: Arc<dyn FsmUpdater>,

    /// Performs the actual shard data copy.
    replica_copier: Arc<dyn ReplicaCopier>,

    /// Clock used to measure op durations.
    time_provider: Arc<dyn TimeProvider>,

    /// Identity of the node this consumer runs on.
    node_id: String,

    /// Retry schedule for transient per-op failures.
    backoff_policy: BackoffPolicy,

    /// Deadline for one op, covering all retries.
    op_timeout: Duration,

    /// Upper bound on concurrently running workers.
    max_workers: usize,

    /// Worker slots; one permit per in-flight op.
    slots: Arc<Bulkhead>,
}

impl CopyOpConsumer {
    pub fn new(
        leader_client: Arc<dyn FsmUpdater>,
        replica_copier: Arc<dyn ReplicaCopier>,
        time_provider: Arc<dyn TimeProvider>,
        node_id: impl Into<String>,
        backoff_policy: BackoffPolicy,
        op_timeout: Duration,
        max_workers: usize,
    ) -> Self {
        Self {
            leader_client,
            replica_copier,
            time_provider,
            node_id: node_id.into(),
            backoff_policy,
            op_timeout,
            max_workers,
            slots: Arc::new(Bulkhead::new(max_workers)),
        }
    }

    /// Run one op to completion, releasing the worker slot on exit.
    async fn run_worker(
        self,
        ctx: CancellationToken,
        op: ShardReplicationOp,
        permit: OwnedSemaphorePermit,
    ) {
        // Slot held for the worker's lifetime.
        let _permit = permit;

        info!(
            op = op.id,
            source_node = %op.source_shard.node_id,
            target_node = %op.target_shard.node_id,
            collection = %op.target_shard.collection_id,
            shard = %op.target_shard.shard_id,
            "worker processing replication operation"
        );

        let started = self.time_provider.now();

        match tokio::time::timeout(self.op_timeout, self.process_replication_op(&ctx, &op)).await {
            Err(_) => {
                let err = ReplicationError::OpTimeout { op_id: op.id };
                metrics::record_op_timed_out(&self.node_id);
                error!(
                    op = op.id,
                    timeout_secs = self.op_timeout.as_secs(),
                    error = %err,
                    "replication operation timed out"
                );
            }
            Ok(Err(err)) if err.is_cancellation() => {
                warn!(op = op.id, "replication operation canceled before completion");
            }
            Ok(Err(err)) => {
                metrics::record_op_failed(&self.node_id);
                error!(op = op.id, error = %err, "replication operation failed");
            }
            Ok(Ok(())) => {
                let duration = self.time_provider.now().duration_since(started);
                metrics::record_op_completed(&self.node_id, duration);
                info!(
                    op = op.id,
                    duration_ms = duration.as_millis() as u64,
                    source_node = %op.source_shard.node_id,
                    target_node = %op.target_shard.node_id,
                    collection = %op.target_shard.collection_id,
                    shard = %op.target_shard.shard_id,
                    "replication operation completed successfully"
                );
            }
        }
    }

    /// Retry loop over the three-step replication sequence.
    ///
    /// Cancellation is permanent; every other failure retries the full
    /// sequence under the backoff policy until the attempt budget runs
    /// out.
    async fn process_replication_op(
        &self,
        ctx: &CancellationToken,
        op: &ShardReplicationOp,
    ) -> Result<()> {
        let mut attempt = 0usize;
        let mut delay = self.backoff_policy.initial_delay;

        loop {
            attempt += 1;

            match self.replicate_once(ctx, op).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_cancellation() => {
                    warn!(
                        op = op.id,
                        "canceled while processing replication operation, shutting down"
                    );
                    return Err(err);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.backoff_policy.max_attempts => {
                    warn!(op = op.id, attempt, "replication attempt budget exhausted");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        op = op.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "replication step failed, retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(ReplicationError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = self.backoff_policy.next_delay(delay);
                }
            }
        }
    }

    /// One attempt of the strictly ordered three-step sequence.
    async fn replicate_once(&self, ctx: &CancellationToken, op: &ShardReplicationOp) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(ReplicationError::Canceled);
        }

        self.leader_client
            .replication_update_replica_op_status(op.id, ReplicationOpState::Hydrating)
            .await
            .map_err(|e| ReplicationError::StatusUpdate {
                op_id: op.id,
                message: e.to_string(),
            })?;

        info!(op = op.id, source_node = %op.source_shard.node_id, "starting replica copy");

        self.replica_copier
            .copy_replica(
                ctx.clone(),
                &op.source_shard.node_id,
                &op.source_shard.collection_id,
                &op.target_shard.shard_id,
            )
            .await
            .map_err(|e| ReplicationError::CopyFailed {
                op_id: op.id,
                message: e.to_string(),
            })?;

        self.leader_client
            .add_replica_to_shard(
                ctx.clone(),
                &op.target_shard.collection_id,
                &op.target_shard.shard_id,
                &op.target_shard.node_id,
            )
            .await
            .map_err(|e| ReplicationError::ShardingState {
                op_id: op.id,
                message: e.to_string(),
            })?;

        Ok(())
    }
}

impl OpConsumer for CopyOpConsumer {
    fn consume(
        &self,
        ctx: CancellationToken,
        ops: mpsc::Receiver<ShardReplicationOp>,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(
                node = %self.node_id,
                workers = self.max_workers,
                timeout_secs = self.op_timeout.as_secs(),
                "starting replication operation consumer"
            );

            let mut ops = ops;
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        info!(node = %self.node_id, "consumer canceled, waiting for in-flight operations");
                        self.slots.drain().await;
                        return Err(ReplicationError::Canceled);
                    }
                    received = ops.recv() => {
                        let Some(op) = received else {
                            info!(node = %self.node_id, "op channel closed, waiting for in-flight operations");
                            self.slots.drain().await;
                            return Ok(());
                        };

                        // One slot per worker bounds the concurrency; the
                        // acquire itself stays cancellation-aware.
                        let permit = tokio::select! {
                            _ = ctx.cancelled() => {
                                info!(node = %self.node_id, "consumer canceled while waiting for a worker slot");
                                self.slots.drain().await;
                                return Err(ReplicationError::Canceled);
                            }
                            acquired = self.slots.acquire() => {
                                acquired.map_err(|e| ReplicationError::Internal(e.to_string()))?
                            }
                        };

                        let worker = self.clone();
                        let op_ctx = ctx.child_token();
                        tokio::spawn(async move {
                            worker.run_worker(op_ctx, op, permit).await;
                        });
                    }
                }
            }
        })
    }
}
