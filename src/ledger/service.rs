use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::balance::{BalanceState, apply_operation, replay};
use super::types::{AccountOperation, AccountOperationDraft, OperationType, SyncType};
use crate::account::Account;
use crate::core_types::{AccountId, ReferenceId, lock_keys};
use crate::error::{AccountingError, Result};
use crate::lock::{DistributedMutex, LockHandle};
use crate::store::AccountingStore;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn AccountingStore>,
    mutex: DistributedMutex,
}

impl Ledger {
    pub fn new(store: Arc<dyn AccountingStore>, mutex: DistributedMutex) -> Self {
        Self { store, mutex }
    }

    pub fn mutex(&self) -> &DistributedMutex {
        &self.mutex
    }

    /// Load an account that may receive operations
    pub async fn writable_account(&self, account_id: AccountId) -> Result<Account> {
        if account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }
        let account = self
            .store
            .get_account_by_id(account_id)
            .await?
            .ok_or_else(|| {
                AccountingError::InvalidAccountOperation(format!("unknown account {}", account_id))
            })?;
        if !account.status.accepts_operations() {
            return Err(AccountingError::InvalidAccountOperation(format!(
                "account {} is {}",
                account_id, account.status
            )));
        }
        Ok(account)
    }

    /// Append one operation. `lock` must be the caller's handle on
    /// `account.<draft.account_id>`.
    pub async fn append_operation(
        &self,
        lock: &LockHandle,
        draft: AccountOperationDraft,
    ) -> Result<AccountOperation> {
        let mut ops = self.append_operations(std::slice::from_ref(lock), vec![draft]).await?;
        ops.pop()
            .ok_or_else(|| AccountingError::Invariant("append produced no operation".to_string()))
    }

    /// Append several operations in one all-or-nothing store call. Every
    /// touched account must be covered by one of `locks`.
    pub async fn append_operations(
        &self,
        locks: &[LockHandle],
        drafts: Vec<AccountOperationDraft>,
    ) -> Result<Vec<AccountOperation>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        // pre-check against the latest stored totals
        let mut expected: Vec<(AccountId, BalanceState)> = Vec::new();
        for draft in &drafts {
            if draft.account_id == 0 {
                return Err(AccountingError::InvalidAccountId);
            }
            let key = lock_keys::account(draft.account_id);
            if !locks.iter().any(|l| l.ensure_key(&key).is_ok()) {
                return Err(AccountingError::LockNotHeld(key));
            }
            self.writable_account(draft.account_id).await?;

            let prev = match expected.iter().rev().find(|(id, _)| *id == draft.account_id) {
                Some((_, state)) => *state,
                None => self.get_current_balance(draft.account_id).await?,
            };
            let next = apply_operation(prev, draft.amount, draft.lock_amount)?;
            expected.push((draft.account_id, next));
        }

        let count = drafts.len();
        let ops = self.store.append_account_operation_batch(drafts).await?;
        if ops.len() != count {
            return Err(AccountingError::Invariant(format!(
                "store appended {} of {} operations",
                ops.len(),
                count
            )));
        }

        for (op, (_, state)) in ops.iter().zip(&expected) {
            if op.balance != state.balance || op.total_locked != state.total_locked {
                // a writer outside the lock raced us, the stored totals still win
                warn!(
                    operation_id = op.operation_id,
                    account_id = op.account_id,
                    expected_balance = %state.balance,
                    stored_balance = %op.balance,
                    "Pre-check totals differ from stored totals"
                );
            }
            info!(
                operation_id = op.operation_id,
                account_id = op.account_id,
                reference_id = op.reference_id,
                operation_type = %op.operation_type,
                sync_type = %op.sync_type,
                amount = %op.amount,
                lock_amount = %op.lock_amount,
                balance = %op.balance,
                total_locked = %op.total_locked,
                "Operation appended"
            );
        }
        Ok(ops)
    }

    /// Take `account.<id>`, append, release.
    pub async fn append_locked(&self, draft: AccountOperationDraft) -> Result<AccountOperation> {
        if draft.account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }
        let handle = self.mutex.lock(&lock_keys::account(draft.account_id)).await?;
        let result = self.append_operation(&handle, draft).await;
        let key = handle.key().to_string();
        if let Err(e) = handle.unlock().await {
            // the append is committed, the TTL frees the key
            warn!(key = %key, error = %e, "Lock release failed after append");
        }
        result
    }

    /// Credit `amount` from an external source
    pub async fn deposit(
        &self,
        account_id: AccountId,
        reference_id: ReferenceId,
        amount: Decimal,
    ) -> Result<AccountOperation> {
        if amount <= Decimal::ZERO {
            return Err(AccountingError::InvalidAmount);
        }
        self.append_locked(AccountOperationDraft::new(
            account_id,
            reference_id,
            OperationType::Deposit,
            SyncType::Sync,
            amount,
        ))
        .await
    }

    /// Operations with `from <= timestamp <= to`. Lock-free, may miss
    /// in-flight appends.
    pub async fn get_history(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccountOperation>> {
        self.ensure_exists(account_id).await?;
        if from > to {
            return Err(AccountingError::InvalidRequest(format!(
                "history range starts after it ends ({} > {})",
                from, to
            )));
        }
        self.store
            .get_account_operation_range(account_id, from, to)
            .await
    }

    /// `(Balance, TotalLocked)` after the latest operation, zero if none
    pub async fn get_current_balance(&self, account_id: AccountId) -> Result<BalanceState> {
        self.ensure_exists(account_id).await?;
        let last = self.store.get_last_account_operation(account_id).await?;
        Ok(BalanceState::after(last.as_ref()))
    }

    /// Replay the whole chain of `account_id` in operation id order and check
    /// it ends on the current totals. Entry timestamps play no part.
    pub async fn verify_account(&self, account_id: AccountId) -> Result<BalanceState> {
        self.ensure_exists(account_id).await?;
        let history = self.store.get_account_operations(account_id).await?;
        let replayed = replay(&history)?;
        let current = self.get_current_balance(account_id).await?;
        if replayed != current {
            return Err(AccountingError::Invariant(format!(
                "account {} replays to {:?}, stored {:?}",
                account_id, replayed, current
            )));
        }
        debug!(account_id, operations = history.len(), "Account chain verified");
        Ok(replayed)
    }

    async fn ensure_exists(&self, account_id: AccountId) -> Result<()> {
        if account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }
        match self.store.get_account_by_id(account_id).await? {
            Some(_) => Ok(()),
            None => Err(AccountingError::InvalidAccountId),
        }
    }
}
