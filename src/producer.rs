//! Op producers: discover pending replication work for this node.
//!
//! The producer side of the engine's pipeline. A producer streams
//! [`ShardReplicationOp`]s onto the bounded op channel until it is
//! cancelled, its upstream is exhausted, or it hits an unrecoverable
//! error. The default implementation, [`FsmOpProducer`], polls the local
//! [`ShardReplicationFsm`](crate::fsm::ShardReplicationFsm) projection on
//! an interval and re-emits every incomplete op, relying on the
//! idempotency of the operation processor for ops seen across cycles.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::{BoxFuture, ReplicationError};
use crate::fsm::ShardReplicationFsm;
use crate::metrics;
use crate::op::ShardReplicationOp;

/// Source of replication operations for this node.
///
/// # Contract
///
/// `produce` must stream ops into `out` until one of:
///
/// - `ctx` is cancelled: return [`ReplicationError::Canceled`];
/// - the upstream source is exhausted or the downstream channel closes:
///   return `Ok(())`;
/// - an unrecoverable error occurs: return it (fatal for the engine
///   cycle).
///
/// Sending on `out` may block under backpressure; implementations must
/// keep servicing `ctx` cancellation while blocked.
pub trait OpProducer: Send + Sync + 'static {
    fn produce(
        &self,
        ctx: CancellationToken,
        out: mpsc::Sender<ShardReplicationOp>,
    ) -> BoxFuture<'_, ()>;
}

/// Default producer: polls the FSM projection for this node's pending ops.
///
/// Each poll cycle fetches the ops targeting this node, keeps those whose
/// status says they should (re)start, dedups by op id within the cycle,
/// and forwards them downstream. An op still incomplete on the next cycle
/// is emitted again; the consumer's processing is idempotent, so repeat
/// deliveries across cycles are harmless.
pub struct FsmOpProducer {
    fsm: Arc<ShardReplicationFsm>,
    node_id: String,
    poll_interval: Duration,
}

impl FsmOpProducer {
    pub fn new(fsm: Arc<ShardReplicationFsm>, node_id: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            fsm,
            node_id: node_id.into(),
            poll_interval,
        }
    }
}

impl OpProducer for FsmOpProducer {
    fn produce(
        &self,
        ctx: CancellationToken,
        out: mpsc::Sender<ShardReplicationOp>,
    ) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(
                node = %self.node_id,
                poll_interval_ms = self.poll_interval.as_millis() as u64,
                "starting replication op producer"
            );

            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        info!(node = %self.node_id, "producer canceled, shutting down");
                        return Err(ReplicationError::Canceled);
                    }
                    _ = ticker.tick() => {
                        let pending = self.fsm.get_ops_for_node(&self.node_id);
                        let mut emitted_this_cycle = HashSet::new();

                        for op in pending {
                            if !self.fsm.get_op_state(&op).should_restart() {
                                continue;
                            }
                            if !emitted_this_cycle.insert(op.id) {
                                continue;
                            }

                            trace!(node = %self.node_id, op = op.id, "emitting replication op");
                            tokio::select! {
                                _ = ctx.cancelled() => {
                                    info!(node = %self.node_id, "producer canceled while sending");
                                    return Err(ReplicationError::Canceled);
                                }
                                sent = out.send(op) => {
                                    if sent.is_err() {
                                        // Consumer side went away; a clean end of stream.
                                        debug!(node = %self.node_id, "op channel closed, stopping producer");
                                        return Ok(());
                                    }
                                    metrics::record_op_produced(&self.node_id);
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}
