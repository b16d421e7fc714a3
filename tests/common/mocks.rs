//! Hand-written test doubles for the engine's collaborators.
//!
//! `FnProducer`/`FnConsumer` adapt closures into the producer/consumer
//! traits so each scenario can script its pipeline sides inline.
//! `MockFsmUpdater` and `MockReplicaCopier` record every cluster call for
//! assertions and support scripted failures, following the recording-mock
//! style used across the test suites.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use shard_replication_engine::cluster::{
    BoxFuture as ClusterFuture, ClusterError, FsmUpdater, ReplicaCopier, TimeProvider,
};
use shard_replication_engine::error::{BoxFuture, Result};
use shard_replication_engine::op::{ReplicationOpState, ShardReplicationOp};
use shard_replication_engine::{OpConsumer, OpProducer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type ProducerFn = dyn Fn(
        CancellationToken,
        mpsc::Sender<ShardReplicationOp>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
    + Send
    + Sync;

/// Producer scripted by a closure; counts invocations.
pub struct FnProducer {
    behavior: Box<ProducerFn>,
    calls: AtomicUsize,
}

impl FnProducer {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(
                CancellationToken,
                mpsc::Sender<ShardReplicationOp>,
            ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `produce` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OpProducer for FnProducer {
    fn produce(
        &self,
        ctx: CancellationToken,
        out: mpsc::Sender<ShardReplicationOp>,
    ) -> BoxFuture<'_, ()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.behavior)(ctx, out)
    }
}

type ConsumerFn = dyn Fn(
        CancellationToken,
        mpsc::Receiver<ShardReplicationOp>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
    + Send
    + Sync;

/// Consumer scripted by a closure; counts invocations.
pub struct FnConsumer {
    behavior: Box<ConsumerFn>,
    calls: AtomicUsize,
}

impl FnConsumer {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(
                CancellationToken,
                mpsc::Receiver<ShardReplicationOp>,
            ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `consume` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OpConsumer for FnConsumer {
    fn consume(
        &self,
        ctx: CancellationToken,
        ops: mpsc::Receiver<ShardReplicationOp>,
    ) -> BoxFuture<'_, ()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.behavior)(ctx, ops)
    }
}

/// Recording mock of the leader FSM client.
///
/// Records every status update and replica registration; `fail_status_n`
/// makes the next N status updates fail with a transient error.
#[derive(Default)]
pub struct MockFsmUpdater {
    status_updates: Mutex<Vec<(u64, ReplicationOpState)>>,
    replicas_added: Mutex<Vec<(String, String, String)>>,
    fail_status: AtomicUsize,
    fail_add: AtomicUsize,
}

impl MockFsmUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` status updates.
    pub fn fail_status_n(&self, n: usize) {
        self.fail_status.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` replica registrations.
    #[allow(dead_code)] // Not every suite scripts add failures
    pub fn fail_add_n(&self, n: usize) {
        self.fail_add.store(n, Ordering::SeqCst);
    }

    pub fn status_updates(&self) -> Vec<(u64, ReplicationOpState)> {
        self.status_updates.lock().unwrap().clone()
    }

    pub fn replicas_added(&self) -> Vec<(String, String, String)> {
        self.replicas_added.lock().unwrap().clone()
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FsmUpdater for MockFsmUpdater {
    fn replication_update_replica_op_status(
        &self,
        op_id: u64,
        state: ReplicationOpState,
    ) -> ClusterFuture<'_, ()> {
        Box::pin(async move {
            if take_failure(&self.fail_status) {
                return Err(ClusterError("scripted status update failure".to_string()));
            }
            self.status_updates.lock().unwrap().push((op_id, state));
            Ok(())
        })
    }

    fn add_replica_to_shard(
        &self,
        _ctx: CancellationToken,
        collection_id: &str,
        shard_id: &str,
        node_id: &str,
    ) -> ClusterFuture<'_, u64> {
        let entry = (
            collection_id.to_string(),
            shard_id.to_string(),
            node_id.to_string(),
        );
        Box::pin(async move {
            if take_failure(&self.fail_add) {
                return Err(ClusterError("scripted sharding update failure".to_string()));
            }
            let mut added = self.replicas_added.lock().unwrap();
            // Idempotent, like the real leader: re-adding is a no-op.
            if !added.contains(&entry) {
                added.push(entry);
            }
            Ok(added.len() as u64)
        })
    }
}

/// Recording mock of the replica copy primitive.
///
/// Tracks a high-water mark of concurrent copies (for worker-cap
/// assertions), supports a fixed per-copy delay, scripted failures, and
/// optionally ignoring cancellation to exercise deadline handling.
pub struct MockReplicaCopier {
    copies: Mutex<Vec<(String, String, String)>>,
    delay: Duration,
    fail_first: AtomicUsize,
    ignore_cancellation: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockReplicaCopier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReplicaCopier {
    pub fn new() -> Self {
        Self {
            copies: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail_first: AtomicUsize::new(0),
            ignore_cancellation: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Fail the next `n` copies with a transient error.
    pub fn fail_first(&self, n: usize) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    /// Keep copying through cancellation, so only the op deadline can
    /// interrupt the copy.
    pub fn set_ignore_cancellation(&self, ignore: bool) {
        self.ignore_cancellation.store(ignore, Ordering::SeqCst);
    }

    /// Completed copies, in completion order.
    pub fn copies(&self) -> Vec<(String, String, String)> {
        self.copies.lock().unwrap().clone()
    }

    /// Highest number of copies ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Copies currently running.
    #[allow(dead_code)]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl ReplicaCopier for MockReplicaCopier {
    fn copy_replica(
        &self,
        ctx: CancellationToken,
        source_node_id: &str,
        collection_id: &str,
        shard_id: &str,
    ) -> ClusterFuture<'_, ()> {
        let entry = (
            source_node_id.to_string(),
            collection_id.to_string(),
            shard_id.to_string(),
        );
        Box::pin(async move {
            // Guard so the count drops even when the worker future is
            // dropped at its deadline mid-copy.
            let _guard = InFlightGuard(&self.in_flight);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            if self.delay > Duration::ZERO {
                if self.ignore_cancellation.load(Ordering::SeqCst) {
                    tokio::time::sleep(self.delay).await;
                } else {
                    tokio::select! {
                        _ = ctx.cancelled() => {
                            return Err(ClusterError("copy canceled".to_string()));
                        }
                        _ = tokio::time::sleep(self.delay) => {}
                    }
                }
            }
            if take_failure(&self.fail_first) {
                return Err(ClusterError("scripted copy failure".to_string()));
            }
            self.copies.lock().unwrap().push(entry);
            Ok(())
        })
    }
}

/// Manually advanced clock.
pub struct ManualTimeProvider {
    now: Mutex<Instant>,
}

impl ManualTimeProvider {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move the observed time forward.
    #[allow(dead_code)]
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}
