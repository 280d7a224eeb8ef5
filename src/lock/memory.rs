//! Process-local lock backend
//!
//! Only exclusive within one process. Used by tests and single-instance tools;
//! deployments with more than one service instance must use [`super::PgLockService`].

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

use super::LockService;
use crate::error::Result;

#[derive(Debug, Clone)]
struct HeldLock {
    token: String,
    expires_at: Instant,
}

/// Lock table in a `DashMap`, expiry checked lazily on acquisition.
#[derive(Debug, Default)]
pub struct MemoryLockService {
    locks: DashMap<String, HeldLock>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Number of keys currently recorded (held or expired but not reclaimed)
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let lock = HeldLock {
            token: token.to_string(),
            expires_at: now + ttl,
        };

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now {
                    entry.insert(lock);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(lock);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<()> {
        self.locks.remove_if(key, |_, held| held.token == token);
        Ok(())
    }
}
