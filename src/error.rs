// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the shard replication engine.
//!
//! Errors are categorized by where in the pipeline they occur and whether
//! the operation processor should retry them.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `StatusUpdate` | Yes | Leader FSM rejected or failed a status transition |
//! | `CopyFailed` | Yes | Replica copy primitive failed |
//! | `ShardingState` | Yes | Adding the replica to the sharding state failed |
//! | `Canceled` | No | Cooperative cancellation; permanent for the op |
//! | `OpTimeout` | No | Per-operation deadline exceeded |
//! | `ReplicaBusy` | No | Target replica already has an op in flight |
//! | `Config` | No | Configuration invalid |
//! | `Producer` | No | The op producer failed; fatal for the engine cycle |
//! | `Consumer` | No | The op consumer failed; fatal for the engine cycle |
//! | `Internal` | No | Unexpected internal error (task panic, closed semaphore) |
//!
//! # Retry Behavior
//!
//! [`ReplicationError::is_retryable()`] drives the backoff loop in the
//! operation processor: transient leader/copy failures are retried, while
//! cancellation is mapped to a permanent outcome via
//! [`ReplicationError::is_cancellation()`]. Cancellation is not a failure
//! from the engine's point of view: a producer or consumer returning
//! `Canceled` counts as a cooperative, successful shutdown.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Boxed future alias used by the producer/consumer trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Errors that can occur while driving shard replication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// Cooperative cancellation.
    ///
    /// Raised when the caller's or the engine's cancellation token fires.
    /// Permanent inside the operation processor; treated as a clean
    /// shutdown by the engine.
    #[error("operation canceled")]
    Canceled,

    /// Per-operation deadline exceeded.
    ///
    /// The op's work is abandoned; the op stays in the FSM and is
    /// restarted on a later cycle.
    #[error("replication operation {op_id} timed out")]
    OpTimeout { op_id: u64 },

    /// Leader FSM status transition failed.
    ///
    /// Retryable: transitions are idempotent per (op, state), so the full
    /// sequence is simply re-issued.
    #[error("status update failed for op {op_id}: {message}")]
    StatusUpdate { op_id: u64, message: String },

    /// The replica copy primitive failed.
    ///
    /// Retryable: the copier is restart-safe by contract.
    #[error("replica copy failed for op {op_id}: {message}")]
    CopyFailed { op_id: u64, message: String },

    /// Updating the sharding state with the new replica failed.
    ///
    /// Retryable: adding an already-present replica is a no-op upstream.
    #[error("sharding state update failed for op {op_id}: {message}")]
    ShardingState { op_id: u64, message: String },

    /// A second replication op was registered for a target replica that
    /// already has one in flight.
    ///
    /// Not retryable - the existing op must finish or be cancelled first.
    #[error("target replica {target} already has a replication operation in flight")]
    ReplicaBusy { target: String },

    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// The op producer returned a non-cancellation error.
    ///
    /// Fatal for the engine cycle; the engine becomes restartable.
    #[error("op producer failed: {0}")]
    Producer(String),

    /// The op consumer returned a non-cancellation error.
    ///
    /// Fatal for the engine cycle; the engine becomes restartable.
    #[error("op consumer failed: {0}")]
    Consumer(String),

    /// Unexpected internal error.
    ///
    /// Not retryable - indicates a bug that needs investigation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Whether the operation processor should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StatusUpdate { .. } | Self::CopyFailed { .. } | Self::ShardingState { .. }
        )
    }

    /// Whether this error represents cooperative cancellation rather than
    /// a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
