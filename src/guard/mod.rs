//! Idempotent Single-Call Guard
//!
//! Runs a side-effecting closure at most once per unchanged counter window,
//! even when identical requests race across service instances.
//!
//! ```text
//! read counter n ─▶ lock(name) ─▶ re-read ── changed ──▶ unlock, skip
//!                                    │
//!                                 unchanged
//!                                    ▼
//!                          increment ─▶ f() ─▶ unlock ─▶ f's result
//! ```

pub mod memory;
pub mod postgres;

pub use memory::MemoryCounterStore;
pub use postgres::PgCounterStore;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::lock::DistributedMutex;

/// Named monotonically increasing counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, zero for an unknown name
    async fn get(&self, name: &str) -> Result<i64>;

    /// Reset `name` to zero
    async fn reset(&self, name: &str) -> Result<()>;

    /// Add one and return the new value
    async fn increment(&self, name: &str) -> Result<i64>;
}

/// Outcome of [`SingleCallGuard::execute_once`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The closure ran and succeeded
    Executed,
    /// Another caller advanced the counter first, the closure was skipped
    Skipped,
}

#[derive(Clone)]
pub struct SingleCallGuard {
    mutex: DistributedMutex,
    counters: Arc<dyn CounterStore>,
}

impl SingleCallGuard {
    pub fn new(mutex: DistributedMutex, counters: Arc<dyn CounterStore>) -> Self {
        Self { mutex, counters }
    }

    /// Reset the counter for `name`
    pub async fn init(&self, name: &str) -> Result<()> {
        self.counters.reset(name).await
    }

    /// Run `f` unless a concurrent caller already ran it for the counter value
    /// observed on entry. The lock is released on every path. A failed release
    /// is logged, `f`'s result is returned unchanged.
    pub async fn execute_once<F, Fut>(&self, name: &str, f: F) -> Result<CallOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let observed = self.counters.get(name).await?;

        let handle = self.mutex.lock(name).await?;
        let result = self.run_locked(name, observed, f).await;
        if let Err(e) = handle.unlock().await {
            // the TTL frees the key
            warn!(name = %name, error = %e, "Single call lock release failed");
        }
        result
    }

    async fn run_locked<F, Fut>(&self, name: &str, observed: i64, f: F) -> Result<CallOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let current = self.counters.get(name).await?;
        if current != observed {
            debug!(name = %name, observed, current, "Single call skipped");
            return Ok(CallOutcome::Skipped);
        }

        self.counters.increment(name).await?;
        f().await.map(|_| CallOutcome::Executed)
    }
}
