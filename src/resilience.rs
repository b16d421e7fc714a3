//! Resilience utilities: retry backoff and the worker-slot bulkhead.
//!
//! - [`BackoffPolicy`]: exponential backoff schedule for transient
//!   per-operation failures
//! - [`Bulkhead`]: semaphore limiting concurrently running copy workers
//!
//! # Example
//!
//! ```rust
//! # async fn example() -> Result<(), shard_replication_engine::resilience::BulkheadClosed> {
//! use shard_replication_engine::resilience::{BackoffPolicy, Bulkhead};
//!
//! let policy = BackoffPolicy::default();
//! assert!(policy.delay_for_attempt(3) > policy.delay_for_attempt(1));
//!
//! // Bulkhead: at most 4 concurrent copy workers
//! let bulkhead = Bulkhead::new(4);
//! let _permit = bulkhead.acquire().await?;
//! // permit dropped = slot released
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Exponential backoff schedule for retrying a failed replication step.
///
/// The operation processor retries the full three-step sequence with this
/// schedule; each retry multiplies the delay by `multiplier` up to
/// `max_delay`, for at most `max_attempts` total attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub multiplier: f64,

    /// Total attempts, first try included.
    pub max_attempts: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Fast-fail schedule for tests.
    pub fn testing() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }

    /// Delay to sleep after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }

        let multiplier = self.multiplier.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        // The product overflows f64 range quickly for large attempt
        // numbers; anything at or past the ceiling is the ceiling.
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_secs_f64(delay_secs), self.max_delay)
    }

    /// The delay that follows `current` in the schedule.
    pub fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(current.as_secs_f64() * self.multiplier),
            self.max_delay,
        )
    }
}

/// Error when acquiring from a closed bulkhead.
///
/// The engine never closes the worker-slot semaphore, so this is only
/// reachable through API misuse; it exists so callers do not need
/// `unwrap()` on the acquire path.
#[derive(Debug, Clone, thiserror::Error)]
#[error("worker slot bulkhead closed: max {max_concurrent} concurrent operations")]
pub struct BulkheadClosed {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Bulkhead pattern: limits how many replication workers run at once.
///
/// Each worker holds one permit for the duration of its copy operation;
/// dropping the permit releases the slot. This is the sole concurrency
/// limiter in the consumer - there is no fixed worker pool or queue
/// discipline on top of it.
///
/// # Example
///
/// ```rust
/// # async fn example() -> Result<(), shard_replication_engine::resilience::BulkheadClosed> {
/// use shard_replication_engine::resilience::Bulkhead;
/// let bulkhead = Bulkhead::new(8);
///
/// let permit = bulkhead.acquire().await?;
/// // run the copy...
/// drop(permit); // slot released
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if all slots are taken.
    ///
    /// Returns a permit that releases the slot when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadClosed> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadClosed {
                max_concurrent: self.max_concurrent,
            })
    }

    /// Try to acquire a permit without waiting.
    ///
    /// Returns `None` if all slots are taken.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Wait until every outstanding permit has been returned.
    ///
    /// Used during consumer shutdown: re-acquiring the full slot count
    /// only succeeds once all in-flight workers have finished. The permits
    /// are released again on return, so the bulkhead is reusable for the
    /// next engine cycle.
    pub async fn drain(&self) {
        // Worker counts are small; the u32 cast cannot truncate in practice.
        if let Ok(all) = self.semaphore.acquire_many(self.max_concurrent as u32).await {
            drop(all);
        }
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Maximum concurrent operations allowed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Whether every slot is taken.
    pub fn is_full(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}
