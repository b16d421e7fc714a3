// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine lifecycle supervisor.
//!
//! [`ShardReplicationEngine`] owns one producer/consumer cycle: it creates
//! the bounded op channel, launches the producer writing into it and the
//! consumer reading from it, and supervises both until they return.
//!
//! # Protocol
//!
//! 1. A second `start` while running is a no-op returning `Ok(())`.
//! 2. An internal cancellation token is derived from the caller's; `stop`
//!    cancels the internal token only.
//! 3. The producer task owns the channel sender; when the producer returns
//!    (for any reason) the sender drops, the channel closes, and the
//!    consumer drains and exits.
//! 4. If either side fails with a non-cancellation error, the internal
//!    token is cancelled so the sibling exits, and the error surfaces from
//!    `start` once both have returned - the producer's error wins if both
//!    failed.
//! 5. Cancellation from the *caller's* token surfaces as
//!    [`ReplicationError::Canceled`]; a `stop` is a clean `Ok(())`.
//!
//! After `start` returns the engine is restartable: the channel and tokens
//! are recreated on the next cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::consumer::OpConsumer;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::op::ShardReplicationOp;
use crate::producer::OpProducer;

/// Supervises one node's replication pipeline.
pub struct ShardReplicationEngine {
    /// Identity of the node this engine runs on.
    node_id: String,

    /// Discovers pending ops for this node.
    producer: Arc<dyn OpProducer>,

    /// Executes ops from the channel.
    consumer: Arc<dyn OpConsumer>,

    /// Capacity of the bounded op channel.
    op_buffer_size: usize,

    /// Worker-pool width, recorded for diagnostics.
    max_workers: usize,

    /// Per-op deadline, recorded for diagnostics.
    op_timeout: Duration,

    /// Whether a cycle is currently active.
    running: AtomicBool,

    /// Cancellation token of the active cycle, if any.
    stop_token: Mutex<Option<CancellationToken>>,

    /// Weak handle on the active cycle's channel, for depth diagnostics.
    op_sender: Mutex<Option<mpsc::WeakSender<ShardReplicationOp>>>,
}

impl ShardReplicationEngine {
    pub fn new(
        node_id: impl Into<String>,
        producer: Arc<dyn OpProducer>,
        consumer: Arc<dyn OpConsumer>,
        op_buffer_size: usize,
        max_workers: usize,
        op_timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            producer,
            consumer,
            op_buffer_size,
            max_workers,
            op_timeout,
            running: AtomicBool::new(false),
            stop_token: Mutex::new(None),
            op_sender: Mutex::new(None),
        }
    }

    /// Run one producer/consumer cycle until both sides return.
    ///
    /// Returns `Ok(())` on a clean shutdown (including one triggered by
    /// [`stop`](Self::stop)), [`ReplicationError::Canceled`] when `ctx`
    /// itself fired, and the failing side's error otherwise. Calling
    /// `start` while a cycle is active is a no-op returning `Ok(())`.
    pub async fn start(&self, ctx: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(node = %self.node_id, "replication engine already running");
            return Ok(());
        }

        info!(
            node = %self.node_id,
            op_buffer_size = self.op_buffer_size,
            max_workers = self.max_workers,
            op_timeout_secs = self.op_timeout.as_secs(),
            "starting replication engine"
        );
        metrics::set_engine_running(&self.node_id, true);

        let internal = ctx.child_token();
        *self.stop_token.lock() = Some(internal.clone());

        let (op_tx, op_rx) = mpsc::channel::<ShardReplicationOp>(self.op_buffer_size);
        *self.op_sender.lock() = Some(op_tx.downgrade());

        // The producer task owns the only sender; the channel closes the
        // moment the producer returns.
        let producer = Arc::clone(&self.producer);
        let producer_token = internal.clone();
        let mut producer_task =
            tokio::spawn(async move { producer.produce(producer_token, op_tx).await });

        let consumer = Arc::clone(&self.consumer);
        let consumer_token = internal.clone();
        let mut consumer_task =
            tokio::spawn(async move { consumer.consume(consumer_token, op_rx).await });

        let producer_result;
        let consumer_result;
        tokio::select! {
            joined = &mut producer_task => {
                producer_result = flatten_join("producer", joined);
                if is_fatal(&producer_result) {
                    internal.cancel();
                }
                consumer_result = flatten_join("consumer", (&mut consumer_task).await);
            }
            joined = &mut consumer_task => {
                consumer_result = flatten_join("consumer", joined);
                if is_fatal(&consumer_result) {
                    internal.cancel();
                }
                producer_result = flatten_join("producer", (&mut producer_task).await);
            }
        }

        *self.op_sender.lock() = None;
        *self.stop_token.lock() = None;
        self.running.store(false, Ordering::SeqCst);
        metrics::set_engine_running(&self.node_id, false);

        let producer_err = producer_result.err().filter(|e| !e.is_cancellation());
        let consumer_err = consumer_result.err().filter(|e| !e.is_cancellation());

        match (producer_err, consumer_err) {
            (Some(prod), cons) => {
                if let Some(cons) = cons {
                    error!(node = %self.node_id, error = %cons, "replication consumer also failed");
                }
                error!(node = %self.node_id, error = %prod, "replication producer failed");
                Err(ReplicationError::Producer(prod.to_string()))
            }
            (None, Some(cons)) => {
                error!(node = %self.node_id, error = %cons, "replication consumer failed");
                Err(ReplicationError::Consumer(cons.to_string()))
            }
            (None, None) if ctx.is_cancelled() => {
                info!(node = %self.node_id, "replication engine canceled");
                Err(ReplicationError::Canceled)
            }
            (None, None) => {
                info!(node = %self.node_id, "replication engine stopped");
                Ok(())
            }
        }
    }

    /// Signal the active cycle to shut down.
    ///
    /// Idempotent and safe from any task; a no-op before `start` or after
    /// `start` has returned.
    pub fn stop(&self) {
        if let Some(token) = self.stop_token.lock().as_ref() {
            info!(node = %self.node_id, "stopping replication engine");
            token.cancel();
        }
    }

    /// Whether a cycle is currently active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Configured capacity of the op channel.
    pub fn op_channel_cap(&self) -> usize {
        self.op_buffer_size
    }

    /// Number of ops currently buffered in the active cycle's channel;
    /// zero when no cycle is active or the channel has closed.
    pub fn op_channel_len(&self) -> usize {
        self.op_sender
            .lock()
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .map(|sender| sender.max_capacity() - sender.capacity())
            .unwrap_or(0)
    }

    /// Identity of the node this engine runs on.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Configured worker-pool width.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Configured per-op deadline.
    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }
}

/// Treat a panicking task as an internal engine failure.
fn flatten_join(role: &str, joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(ReplicationError::Internal(format!(
            "{role} task failed: {join_err}"
        ))),
    }
}

fn is_fatal(result: &Result<()>) -> bool {
    matches!(result, Err(e) if !e.is_cancellation())
}
