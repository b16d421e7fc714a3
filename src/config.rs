//! Configuration for the shard replication engine.
//!
//! Configuration can be constructed programmatically or deserialized from
//! YAML/JSON by the embedding node daemon.
//!
//! # Quick Start
//!
//! ```rust
//! use shard_replication_engine::config::ReplicationConfig;
//!
//! let config = ReplicationConfig {
//!     node_id: "node-1".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! node_id: "db-node-3"
//!
//! op_buffer_size: 1
//! max_workers: 4
//! op_timeout_secs: 300
//! poll_interval_ms: 1000
//!
//! backoff:
//!   initial_delay_ms: 500
//!   max_delay_ms: 30000
//!   multiplier: 2.0
//!   max_attempts: 10
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReplicationError, Result};
use crate::resilience::BackoffPolicy;

/// Top-level configuration for one node's replication engine.
///
/// # Fields
///
/// - `node_id`: identity of the local node; the producer only picks up
///   operations targeting this node.
/// - `op_buffer_size`: capacity of the bounded op channel. Kept small
///   (default 1) so that the FSM, not the channel, is the source of truth
///   for outstanding work and the producer blocks when workers saturate.
/// - `max_workers`: maximum concurrently executing copy operations.
/// - `op_timeout_secs`: per-operation deadline covering the full
///   status-update / copy / sharding-update sequence including retries.
/// - `poll_interval_ms`: how often the default producer polls the FSM for
///   pending operations.
/// - `backoff`: retry schedule for transient per-op failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// The identity of the local node running this engine.
    pub node_id: String,

    /// Capacity of the bounded producer→consumer op channel.
    #[serde(default = "default_op_buffer_size")]
    pub op_buffer_size: usize,

    /// Maximum number of concurrently processed replication operations.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-operation deadline in seconds.
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,

    /// Producer poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry/backoff parameters for the operation processor.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_op_buffer_size() -> usize {
    1
}

fn default_max_workers() -> usize {
    1
}

fn default_op_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            node_id: "local.dev.node".to_string(),
            op_buffer_size: default_op_buffer_size(),
            max_workers: default_max_workers(),
            op_timeout_secs: default_op_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a config with fast timings for tests.
    pub fn for_testing(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            op_buffer_size: 1,
            max_workers: 1,
            op_timeout_secs: 5,
            poll_interval_ms: 10,
            backoff: BackoffConfig::testing(),
        }
    }

    /// Check structural validity of the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(ReplicationError::Config("node_id must not be empty".to_string()));
        }
        if self.op_buffer_size == 0 {
            return Err(ReplicationError::Config(
                "op_buffer_size must be >= 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ReplicationError::Config("max_workers must be >= 1".to_string()));
        }
        if self.op_timeout_secs == 0 {
            return Err(ReplicationError::Config(
                "op_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ReplicationError::Config(
                "poll_interval_ms must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-operation deadline as a [`Duration`].
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    /// Producer poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Serializable retry schedule, converted into a
/// [`BackoffPolicy`](crate::resilience::BackoffPolicy) at engine build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Ceiling for the exponential backoff, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Total attempts (first try included) before the op is given up for
    /// this cycle.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> usize {
    10
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffConfig {
    /// Millisecond-scale schedule to keep tests fast.
    pub fn testing() -> Self {
        Self {
            initial_delay_ms: 5,
            max_delay_ms: 50,
            multiplier: 2.0,
            max_attempts: 3,
        }
    }

    /// Convert into the policy consumed by the operation processor.
    pub fn to_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            max_attempts: self.max_attempts,
        }
    }
}
