//! Distributed Mutex
//!
//! Named, time-bounded locks shared by every service instance. Every ledger
//! mutation happens while holding `account.<AccountID>`; the Single-Call Guard
//! and the batch/withdraw state machines lock their own keys.
//!
//! # Contract
//!
//! ```text
//! lock(key, ttl) ──retry with linear backoff──▶ LockHandle ──unlock()──▶ released
//!                        │                           │
//!                        ▼                           ▼ (dropped without unlock)
//!               LockAcquisition error        release spawned on the runtime,
//!                                            TTL as last resort
//! ```
//!
//! The backend is a [`LockService`]: [`PgLockService`] for deployments (the
//! lock table is shared by all instances) and [`MemoryLockService`] for a
//! single process.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLockService;
pub use postgres::PgLockService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AccountingError, Result};

/// Lower bound for a lock TTL
pub const MIN_TTL: Duration = Duration::from_millis(100);
/// Upper bound for a lock TTL
pub const MAX_TTL: Duration = Duration::from_secs(5 * 60);
/// TTL used when the caller does not pick one
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Backend storing lock ownership
///
/// Implementations must be safe across processes when used in production:
/// `try_acquire` succeeds only if the key is free or its previous holder's TTL
/// has expired, and `release` only removes the entry still owned by `token`.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Get backend name for logging
    fn name(&self) -> &'static str;

    /// Try once to take `key` for `ttl`. Returns false if somebody holds it.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Release `key` if still owned by `token`. Releasing an expired or
    /// foreign lock is a no-op.
    async fn release(&self, key: &str, token: &str) -> Result<()>;
}

/// Retry policy for lock acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub default_ttl_ms: u64,
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `n * backoff_step_ms`
    pub backoff_step_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL.as_millis() as u64,
            max_attempts: 20,
            backoff_step_ms: 50,
        }
    }
}

impl LockConfig {
    pub fn default_ttl(&self) -> Duration {
        clamp_ttl(Duration::from_millis(self.default_ttl_ms))
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(attempt as u64))
    }
}

/// Clamp a TTL into `[MIN_TTL, MAX_TTL]`. A zero TTL means "not set".
pub fn clamp_ttl(ttl: Duration) -> Duration {
    if ttl.is_zero() {
        return DEFAULT_TTL;
    }
    ttl.clamp(MIN_TTL, MAX_TTL)
}

/// Lock front-end shared by all components
#[derive(Clone)]
pub struct DistributedMutex {
    service: Arc<dyn LockService>,
    config: LockConfig,
}

impl DistributedMutex {
    pub fn new(service: Arc<dyn LockService>, config: LockConfig) -> Self {
        Self { service, config }
    }

    /// Process-local mutex, for tests and single-instance tools
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLockService::new()), LockConfig::default())
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire `key` with the configured default TTL
    pub async fn lock(&self, key: &str) -> Result<LockHandle> {
        self.lock_with_ttl(key, self.config.default_ttl()).await
    }

    /// Acquire `key`, retrying with linear backoff up to `max_attempts`.
    pub async fn lock_with_ttl(&self, key: &str, ttl: Duration) -> Result<LockHandle> {
        let ttl = clamp_ttl(ttl);
        let token = uuid::Uuid::new_v4().simple().to_string();
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            if self.service.try_acquire(key, &token, ttl).await? {
                debug!(key = %key, attempt, backend = self.service.name(), "Lock acquired");
                return Ok(LockHandle {
                    key: key.to_string(),
                    token,
                    service: self.service.clone(),
                    released: false,
                });
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
        }

        warn!(key = %key, attempts, "Lock acquisition exhausted");
        Err(AccountingError::LockAcquisition {
            key: key.to_string(),
            attempts,
        })
    }
}

/// Proof of holding a named lock
///
/// Call [`LockHandle::unlock`] on every path. A handle dropped without
/// unlocking (early return, panic) schedules the release on the current tokio
/// runtime; outside a runtime the TTL frees the key.
pub struct LockHandle {
    key: String,
    token: String,
    service: Arc<dyn LockService>,
    released: bool,
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Check that this handle guards `key`
    pub fn ensure_key(&self, key: &str) -> Result<()> {
        if self.key == key && !self.released {
            Ok(())
        } else {
            Err(AccountingError::LockNotHeld(key.to_string()))
        }
    }

    pub async fn unlock(mut self) -> Result<()> {
        self.released = true;
        let result = self.service.release(&self.key, &self.token).await;
        debug!(key = %self.key, "Lock released");
        result
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        let service = self.service.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = service.release(&key, &token).await {
                        warn!(key = %key, error = %e, "Deferred lock release failed, TTL will expire it");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "Lock dropped outside runtime, TTL will expire it");
            }
        }
    }
}

/// Release every handle in `handles`, reporting the first failure.
pub async fn unlock_all(handles: Vec<LockHandle>) -> Result<()> {
    let mut first_error = None;
    // reverse acquisition order
    for handle in handles.into_iter().rev() {
        if let Err(e) = handle.unlock().await {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
