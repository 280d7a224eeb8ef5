//! Service assembly
//!
//! Wires the backends into one set of services sharing a single
//! [`DistributedMutex`].

use std::sync::Arc;

use crate::account::AccountService;
use crate::batch::BatchService;
use crate::config::AccountingConfig;
use crate::guard::{CounterStore, MemoryCounterStore, PgCounterStore, SingleCallGuard};
use crate::ledger::Ledger;
use crate::lock::{DistributedMutex, LockService, MemoryLockService, PgLockService};
use crate::store::{AccountingStore, MemoryStore, PgStore};
use crate::transfer::TransferEngine;
use crate::withdraw::{BankAccounts, WithdrawService};

#[derive(Clone)]
pub struct Accounting {
    store: Arc<dyn AccountingStore>,
    mutex: DistributedMutex,
    pub accounts: AccountService,
    pub ledger: Ledger,
    pub transfers: TransferEngine,
    pub withdraws: WithdrawService,
    pub batches: BatchService,
}

impl Accounting {
    pub fn new(
        store: Arc<dyn AccountingStore>,
        locks: Arc<dyn LockService>,
        counters: Arc<dyn CounterStore>,
        config: &AccountingConfig,
    ) -> Self {
        let mutex = DistributedMutex::new(locks, config.lock.clone());
        let guard = SingleCallGuard::new(mutex.clone(), counters);

        let accounts = AccountService::new(store.clone(), mutex.clone());
        let ledger = Ledger::new(store.clone(), mutex.clone());
        let transfers = TransferEngine::new(ledger.clone());
        let bank = BankAccounts::new(
            store.clone(),
            accounts.clone(),
            guard,
            config.bank_user_id,
            config.bank_account_name.clone(),
        );
        let withdraws =
            WithdrawService::new(store.clone(), transfers.clone(), bank, mutex.clone());
        let batches = BatchService::new(store.clone(), withdraws.clone(), mutex.clone());

        Self {
            store,
            mutex,
            accounts,
            ledger,
            transfers,
            withdraws,
            batches,
        }
    }

    /// Everything backed by PostgreSQL, shared by all service instances
    pub fn postgres(pool: sqlx::PgPool, config: &AccountingConfig) -> Self {
        Self::new(
            Arc::new(PgStore::new(pool.clone())),
            Arc::new(PgLockService::new(pool.clone())),
            Arc::new(PgCounterStore::new(pool)),
            config,
        )
    }

    /// Process-local backends
    pub fn in_memory(config: &AccountingConfig) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLockService::new()),
            Arc::new(MemoryCounterStore::new()),
            config,
        )
    }

    pub fn store(&self) -> &Arc<dyn AccountingStore> {
        &self.store
    }

    pub fn mutex(&self) -> &DistributedMutex {
        &self.mutex
    }
}
