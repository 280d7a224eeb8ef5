//! Store wrapper failing chosen calls once, for partial-failure tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Mutex;

use super::{AccountingStore, MemoryStore};
use crate::account::{Account, AccountStatus, Currency};
use crate::batch::{Batch, BatchInfo, BatchStatus};
use crate::core_types::{AccountId, BatchId, ReferenceId, UserId, WithdrawId};
use crate::error::{AccountingError, Result};
use crate::ledger::{AccountOperation, AccountOperationDraft};
use crate::withdraw::{Withdraw, WithdrawInfo, WithdrawStatus, WithdrawTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Batch append writes nothing and reports no entries
    DropAppend,
    /// Writing this status for this withdrawal fails
    WithdrawInfo(WithdrawId, WithdrawStatus),
    /// Writing any batch info fails
    BatchInfo,
}

#[derive(Default)]
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Arm `fault` for its next matching call
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().unwrap().push(fault);
    }

    fn trip(&self, fault: Fault) -> Result<()> {
        let mut faults = self.faults.lock().unwrap();
        match faults.iter().position(|f| *f == fault) {
            Some(i) => {
                faults.remove(i);
                Err(AccountingError::Database(format!("injected {:?}", fault)))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AccountingStore for FaultyStore {
    async fn add_currency(&self, currency: Currency) -> Result<Currency> {
        self.inner.add_currency(currency).await
    }

    async fn get_currency_by_name(&self, name: &str) -> Result<Option<Currency>> {
        self.inner.get_currency_by_name(name).await
    }

    async fn create_account(&self, user_id: UserId, currency: &str, name: &str) -> Result<Account> {
        self.inner.create_account(user_id, currency, name).await
    }

    async fn get_account_by_id(&self, account_id: AccountId) -> Result<Option<Account>> {
        self.inner.get_account_by_id(account_id).await
    }

    async fn query_account_list(
        &self,
        user_id: UserId,
        currency: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<Account>> {
        self.inner.query_account_list(user_id, currency, name).await
    }

    async fn get_account_status(&self, account_id: AccountId) -> Result<Option<AccountStatus>> {
        self.inner.get_account_status(account_id).await
    }

    async fn set_account_status(&self, account_id: AccountId, status: AccountStatus) -> Result<()> {
        self.inner.set_account_status(account_id, status).await
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
        if self.trip(Fault::DropAppend).is_err() {
            return Ok(Vec::new());
        }
        self.inner.append_account_operation_batch(drafts).await
    }

    async fn get_last_account_operation(
        &self,
        account_id: AccountId,
    ) -> Result<Option<AccountOperation>> {
        self.inner.get_last_account_operation(account_id).await
    }

    async fn get_account_operations(&self, account_id: AccountId) -> Result<Vec<AccountOperation>> {
        self.inner.get_account_operations(account_id).await
    }

    async fn get_account_operations_by_reference(
        &self,
        account_id: AccountId,
        reference_id: ReferenceId,
    ) -> Result<Vec<AccountOperation>> {
        self.inner
            .get_account_operations_by_reference(account_id, reference_id)
            .await
    }

    async fn get_account_operation_range(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccountOperation>> {
        self.inner
            .get_account_operation_range(account_id, from, to)
            .await
    }

    async fn add_withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        target: WithdrawTarget,
    ) -> Result<Withdraw> {
        self.inner.add_withdraw(account_id, amount, target).await
    }

    async fn get_withdraw(&self, withdraw_id: WithdrawId) -> Result<Option<Withdraw>> {
        self.inner.get_withdraw(withdraw_id).await
    }

    async fn get_last_withdraw_info(
        &self,
        withdraw_id: WithdrawId,
    ) -> Result<Option<WithdrawInfo>> {
        self.inner.get_last_withdraw_info(withdraw_id).await
    }

    async fn add_withdraw_info(
        &self,
        withdraw_id: WithdrawId,
        status: WithdrawStatus,
        data: &str,
    ) -> Result<WithdrawInfo> {
        self.trip(Fault::WithdrawInfo(withdraw_id, status))?;
        self.inner.add_withdraw_info(withdraw_id, status, data).await
    }

    async fn list_withdraws_by_status(
        &self,
        status: WithdrawStatus,
        limit: usize,
    ) -> Result<Vec<WithdrawId>> {
        self.inner.list_withdraws_by_status(status, limit).await
    }

    async fn add_batch(&self, network: &str, withdraws: &[WithdrawId]) -> Result<Batch> {
        self.inner.add_batch(network, withdraws).await
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        self.inner.get_batch(batch_id).await
    }

    async fn get_last_batch_info(&self, batch_id: BatchId) -> Result<Option<BatchInfo>> {
        self.inner.get_last_batch_info(batch_id).await
    }

    async fn add_batch_info(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        network: &str,
        tx_id: &str,
        height: Option<u64>,
    ) -> Result<BatchInfo> {
        self.trip(Fault::BatchInfo)?;
        self.inner
            .add_batch_info(batch_id, status, network, tx_id, height)
            .await
    }

    async fn get_batch_withdraws(&self, batch_id: BatchId) -> Result<Vec<WithdrawId>> {
        self.inner.get_batch_withdraws(batch_id).await
    }

    async fn list_batch_infos(
        &self,
        status: BatchStatus,
        network: &str,
    ) -> Result<Vec<BatchInfo>> {
        self.inner.list_batch_infos(status, network).await
    }
}
