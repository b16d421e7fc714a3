//! # Shard Replication Engine
//!
//! The per-node replication engine of a distributed vector database
//! cluster. Each node runs exactly one engine instance, which pulls
//! pending replica copy operations (source shard → target shard on this
//! node) from the cluster-wide state machine, executes the heavy data
//! copy, and drives every operation through its lifecycle until the new
//! replica serves traffic.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        shard-replication-engine                          │
//! │                                                                          │
//! │  ┌───────────────┐  bounded channel  ┌────────────────────────────────┐  │
//! │  │ FsmOpProducer │ ────────────────► │ CopyOpConsumer                 │  │
//! │  │ (polls FSM)   │                   │ (≤ max_workers copy workers)   │  │
//! │  └───────┬───────┘                   └───────────────┬────────────────┘  │
//! │          │                                           │                   │
//! │          ▼                                           ▼                   │
//! │  ┌─────────────────────┐               ┌───────────────────────────┐     │
//! │  │ ShardReplicationFsm │               │ FsmUpdater / ReplicaCopier│     │
//! │  │ (routing queries)   │               │ (leader FSM + data copy)  │     │
//! │  └─────────────────────┘               └───────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`ShardReplicationFsm`] is an in-memory projection of the
//! authoritative leader FSM, answering request-routing queries (which
//! replicas of a shard may serve reads and writes while a replica is being
//! moved) with sub-microsecond latency. The [`ShardReplicationEngine`]
//! supervises the producer/consumer pair, applies backpressure through a
//! bounded channel, and is restartable after failure or shutdown.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use shard_replication_engine::{
//!     CopyOpConsumer, FsmOpProducer, ReplicationConfig, ShardReplicationEngine,
//!     ShardReplicationFsm, SystemTimeProvider,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ReplicationConfig::for_testing("node2");
//! let fsm = Arc::new(ShardReplicationFsm::new());
//!
//! let producer = Arc::new(FsmOpProducer::new(
//!     Arc::clone(&fsm),
//!     &config.node_id,
//!     config.poll_interval(),
//! ));
//! let consumer = Arc::new(CopyOpConsumer::new(
//!     leader_client,   // impl FsmUpdater, provided by the node daemon
//!     replica_copier,  // impl ReplicaCopier, provided by the node daemon
//!     Arc::new(SystemTimeProvider),
//!     &config.node_id,
//!     config.backoff.to_policy(),
//!     config.op_timeout(),
//!     config.max_workers,
//! ));
//!
//! let engine = ShardReplicationEngine::new(
//!     &config.node_id, producer, consumer,
//!     config.op_buffer_size, config.max_workers, config.op_timeout(),
//! );
//!
//! // Runs until cancelled, stopped, or a side fails.
//! engine.start(CancellationToken::new()).await?;
//! ```

pub mod cluster;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod metrics;
pub mod op;
pub mod producer;
pub mod resilience;

// Re-exports for convenience
pub use cluster::{FsmUpdater, ReplicaCopier, SystemTimeProvider, TimeProvider};
pub use config::{BackoffConfig, ReplicationConfig};
pub use consumer::{CopyOpConsumer, OpConsumer};
pub use engine::ShardReplicationEngine;
pub use error::{ReplicationError, Result};
pub use fsm::ShardReplicationFsm;
pub use op::{ReplicationOpState, ShardFqdn, ShardReplicationOp, ShardReplicationOpStatus};
pub use producer::{FsmOpProducer, OpProducer};
pub use resilience::{BackoffPolicy, Bulkhead};
