//! In-memory store
//!
//! Every call takes one mutex over the whole state, so a batch append is
//! trivially all-or-nothing. Meant for tests and local tools.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::AccountingStore;
use crate::account::{Account, AccountStatus, Currency};
use crate::batch::{Batch, BatchInfo, BatchStatus};
use crate::core_types::{AccountId, BatchId, OperationId, ReferenceId, UserId, WithdrawId};
use crate::error::{AccountingError, Result};
use crate::ledger::{AccountOperation, AccountOperationDraft, materialize};
use crate::withdraw::{Withdraw, WithdrawInfo, WithdrawStatus, WithdrawTarget};

#[derive(Default)]
struct Inner {
    currencies: HashMap<String, Currency>,
    accounts: BTreeMap<AccountId, Account>,
    /// Per-account operation chain, append order
    operations: HashMap<AccountId, Vec<AccountOperation>>,
    /// (account, prev id) pairs already used, mirrors the SQL unique index
    chain_links: HashSet<(AccountId, OperationId)>,
    last_operation_id: OperationId,
    withdraws: BTreeMap<WithdrawId, Withdraw>,
    withdraw_infos: HashMap<WithdrawId, Vec<WithdrawInfo>>,
    last_withdraw_info_id: u64,
    batches: BTreeMap<BatchId, Batch>,
    batch_members: HashMap<BatchId, Vec<WithdrawId>>,
    batch_infos: HashMap<BatchId, Vec<BatchInfo>>,
    last_batch_info_id: u64,
}

impl Inner {
    fn last_operation(&self, account_id: AccountId) -> Option<&AccountOperation> {
        self.operations.get(&account_id).and_then(|ops| ops.last())
    }

    /// Validate and build one operation without mutating state
    fn prepare(
        &self,
        draft: &AccountOperationDraft,
        prev: Option<&AccountOperation>,
        operation_id: OperationId,
        now: DateTime<Utc>,
    ) -> Result<AccountOperation> {
        if !self.accounts.contains_key(&draft.account_id) {
            return Err(AccountingError::NotFound(format!(
                "account {}",
                draft.account_id
            )));
        }
        materialize(draft, prev, operation_id, now)
    }

    fn commit(&mut self, op: AccountOperation) -> Result<()> {
        if !self
            .chain_links
            .insert((op.account_id, op.operation_prev_id))
        {
            return Err(AccountingError::Invariant(format!(
                "account {} already has an operation after {}",
                op.account_id, op.operation_prev_id
            )));
        }
        self.last_operation_id = self.last_operation_id.max(op.operation_id);
        self.operations.entry(op.account_id).or_default().push(op);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AccountingError::Database("memory store poisoned".to_string()))
    }

    /// Full operation chain of an account, for audits and tests
    pub fn operations(&self, account_id: AccountId) -> Result<Vec<AccountOperation>> {
        Ok(self
            .inner()?
            .operations
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Status history of a withdrawal, oldest first
    pub fn withdraw_history(&self, withdraw_id: WithdrawId) -> Result<Vec<WithdrawInfo>> {
        Ok(self
            .inner()?
            .withdraw_infos
            .get(&withdraw_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Status history of a batch, oldest first
    pub fn batch_history(&self, batch_id: BatchId) -> Result<Vec<BatchInfo>> {
        Ok(self
            .inner()?
            .batch_infos
            .get(&batch_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AccountingStore for MemoryStore {
    async fn add_currency(&self, currency: Currency) -> Result<Currency> {
        self.inner()?
            .currencies
            .insert(currency.name.clone(), currency.clone());
        Ok(currency)
    }

    async fn get_currency_by_name(&self, name: &str) -> Result<Option<Currency>> {
        Ok(self.inner()?.currencies.get(name).cloned())
    }

    async fn create_account(&self, user_id: UserId, currency: &str, name: &str) -> Result<Account> {
        let mut inner = self.inner()?;
        let duplicate = inner
            .accounts
            .values()
            .any(|a| a.user_id == user_id && a.currency == currency && a.name == name);
        if duplicate {
            return Err(AccountingError::Database(format!(
                "account ({}, {}, {}) already exists",
                user_id, currency, name
            )));
        }

        let account_id = inner.accounts.keys().next_back().copied().unwrap_or(0) + 1;
        let account = Account {
            account_id,
            user_id,
            currency: currency.to_string(),
            name: name.to_string(),
            status: AccountStatus::Created,
            created_at: Utc::now(),
        };
        inner.accounts.insert(account_id, account.clone());
        Ok(account)
    }

    async fn get_account_by_id(&self, account_id: AccountId) -> Result<Option<Account>> {
        Ok(self.inner()?.accounts.get(&account_id).cloned())
    }

    async fn query_account_list(
        &self,
        user_id: UserId,
        currency: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<Account>> {
        Ok(self
            .inner()?
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .filter(|a| currency.is_none_or(|c| a.currency == c))
            .filter(|a| name.is_none_or(|n| a.name == n))
            .cloned()
            .collect())
    }

    async fn get_account_status(&self, account_id: AccountId) -> Result<Option<AccountStatus>> {
        Ok(self.inner()?.accounts.get(&account_id).map(|a| a.status))
    }

    async fn set_account_status(&self, account_id: AccountId, status: AccountStatus) -> Result<()> {
        let mut inner = self.inner()?;
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| AccountingError::NotFound(format!("account {}", account_id)))?;
        account.status = status;
        Ok(())
    }

    async fn append_account_operation(
        &self,
        draft: AccountOperationDraft,
    ) -> Result<AccountOperation> {
        let mut ops = self.append_account_operation_batch(vec![draft]).await?;
        ops.pop()
            .ok_or_else(|| AccountingError::Invariant("empty append result".to_string()))
    }

    async fn append_account_operation_batch(
        &self,
        drafts: Vec<AccountOperationDraft>,
    ) -> Result<Vec<AccountOperation>> {
        let mut inner = self.inner()?;
        let now = Utc::now();

        // build everything first, nothing is visible until all entries are valid
        let mut pending: Vec<AccountOperation> = Vec::with_capacity(drafts.len());
        let mut next_id = inner.last_operation_id;
        for draft in &drafts {
            next_id += 1;
            let prev = pending
                .iter()
                .rev()
                .find(|op| op.account_id == draft.account_id)
                .or_else(|| inner.last_operation(draft.account_id));
            let op = inner.prepare(draft, prev, next_id, now)?;
            pending.push(op);
        }

        let mut links = HashSet::new();
        for op in &pending {
            if inner
                .chain_links
                .contains(&(op.account_id, op.operation_prev_id))
                || !links.insert((op.account_id, op.operation_prev_id))
            {
                return Err(AccountingError::Invariant(format!(
                    "account {} already has an operation after {}",
                    op.account_id, op.operation_prev_id
                )));
            }
        }

        for op in pending.iter().cloned() {
            inner.commit(op)?;
        }
        Ok(pending)
    }

    async fn get_last_account_operation(
        &self,
        account_id: AccountId,
    ) -> Result<Option<AccountOperation>> {
        Ok(self.inner()?.last_operation(account_id).cloned())
    }

    async fn get_account_operations(&self, account_id: AccountId) -> Result<Vec<AccountOperation>> {
        self.operations(account_id)
    }

    async fn get_account_operations_by_reference(
        &self,
        account_id: AccountId,
        reference_id: ReferenceId,
    ) -> Result<Vec<AccountOperation>> {
        Ok(self
            .inner()?
            .operations
            .get(&account_id)
            .map(|ops| {
                ops.iter()
                    .filter(|op| op.reference_id == reference_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_account_operation_range(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccountOperation>> {
        Ok(self
            .inner()?
            .operations
            .get(&account_id)
            .map(|ops| {
                ops.iter()
                    .filter(|op| op.timestamp >= from && op.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        target: WithdrawTarget,
    ) -> Result<Withdraw> {
        let mut inner = self.inner()?;
        let withdraw_id = inner.withdraws.keys().next_back().copied().unwrap_or(0) + 1;
        let withdraw = Withdraw {
            withdraw_id,
            account_id,
            amount,
            target,
            timestamp: Utc::now(),
        };
        inner.withdraws.insert(withdraw_id, withdraw.clone());
        Ok(withdraw)
    }

    async fn get_withdraw(&self, withdraw_id: WithdrawId) -> Result<Option<Withdraw>> {
        Ok(self.inner()?.withdraws.get(&withdraw_id).cloned())
    }

    async fn get_last_withdraw_info(
        &self,
        withdraw_id: WithdrawId,
    ) -> Result<Option<WithdrawInfo>> {
        Ok(self
            .inner()?
            .withdraw_infos
            .get(&withdraw_id)
            .and_then(|infos| infos.last())
            .cloned())
    }

    async fn add_withdraw_info(
        &self,
        withdraw_id: WithdrawId,
        status: WithdrawStatus,
        data: &str,
    ) -> Result<WithdrawInfo> {
        let mut inner = self.inner()?;
        if !inner.withdraws.contains_key(&withdraw_id) {
            return Err(AccountingError::NotFound(format!("withdraw {}", withdraw_id)));
        }
        inner.last_withdraw_info_id += 1;
        let info = WithdrawInfo {
            id: inner.last_withdraw_info_id,
            withdraw_id,
            status,
            data: data.to_string(),
            timestamp: Utc::now(),
        };
        inner
            .withdraw_infos
            .entry(withdraw_id)
            .or_default()
            .push(info.clone());
        Ok(info)
    }

    async fn list_withdraws_by_status(
        &self,
        status: WithdrawStatus,
        limit: usize,
    ) -> Result<Vec<WithdrawId>> {
        let inner = self.inner()?;
        Ok(inner
            .withdraws
            .keys()
            .filter(|id| {
                inner
                    .withdraw_infos
                    .get(*id)
                    .and_then(|infos| infos.last())
                    .is_some_and(|info| info.status == status)
            })
            .take(limit)
            .copied()
            .collect())
    }

    async fn add_batch(&self, network: &str, withdraws: &[WithdrawId]) -> Result<Batch> {
        let mut members = HashSet::new();
        if let Some(id) = withdraws.iter().find(|id| !members.insert(**id)) {
            return Err(AccountingError::Database(format!(
                "withdraw {} listed twice in one batch",
                id
            )));
        }

        let mut inner = self.inner()?;
        let batch_id = inner.batches.keys().next_back().copied().unwrap_or(0) + 1;
        let batch = Batch {
            batch_id,
            network: network.to_string(),
            timestamp: Utc::now(),
        };
        inner.batches.insert(batch_id, batch.clone());
        inner.batch_members.insert(batch_id, withdraws.to_vec());
        Ok(batch)
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        Ok(self.inner()?.batches.get(&batch_id).cloned())
    }

    async fn get_last_batch_info(&self, batch_id: BatchId) -> Result<Option<BatchInfo>> {
        Ok(self
            .inner()?
            .batch_infos
            .get(&batch_id)
            .and_then(|infos| infos.last())
            .cloned())
    }

    async fn add_batch_info(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        network: &str,
        tx_id: &str,
        height: Option<u64>,
    ) -> Result<BatchInfo> {
        let mut inner = self.inner()?;
        if !inner.batches.contains_key(&batch_id) {
            return Err(AccountingError::NotFound(format!("batch {}", batch_id)));
        }
        inner.last_batch_info_id += 1;
        let info = BatchInfo {
            id: inner.last_batch_info_id,
            batch_id,
            status,
            network: network.to_string(),
            tx_id: tx_id.to_string(),
            height,
            timestamp: Utc::now(),
        };
        inner
            .batch_infos
            .entry(batch_id)
            .or_default()
            .push(info.clone());
        Ok(info)
    }

    async fn get_batch_withdraws(&self, batch_id: BatchId) -> Result<Vec<WithdrawId>> {
        Ok(self
            .inner()?
            .batch_members
            .get(&batch_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_batch_infos(
        &self,
        status: BatchStatus,
        network: &str,
    ) -> Result<Vec<BatchInfo>> {
        let inner = self.inner()?;
        Ok(inner
            .batches
            .values()
            .filter(|b| b.network == network)
            .filter_map(|b| inner.batch_infos.get(&b.batch_id).and_then(|i| i.last()))
            .filter(|info| info.status == status)
            .cloned()
            .collect())
    }
}
