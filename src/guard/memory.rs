//! Process-local counters

use async_trait::async_trait;
use dashmap::DashMap;

use super::CounterStore;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, i64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, name: &str) -> Result<i64> {
        Ok(self.counters.get(name).map(|v| *v).unwrap_or(0))
    }

    async fn reset(&self, name: &str) -> Result<()> {
        self.counters.insert(name.to_string(), 0);
        Ok(())
    }

    async fn increment(&self, name: &str) -> Result<i64> {
        let mut entry = self.counters.entry(name.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}
