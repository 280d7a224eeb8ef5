use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::bank::BankAccounts;
use super::types::{Withdraw, WithdrawInfo, WithdrawStatus, WithdrawTarget};
use crate::core_types::{AccountId, WithdrawId, lock_keys};
use crate::error::{AccountingError, Result};
use crate::ledger::{AccountOperationDraft, OperationType, SyncType};
use crate::lock::DistributedMutex;
use crate::store::AccountingStore;
use crate::transfer::{TransferEngine, TransferResult};

#[derive(Clone)]
pub struct WithdrawService {
    store: Arc<dyn AccountingStore>,
    engine: TransferEngine,
    bank: BankAccounts,
    mutex: DistributedMutex,
}

impl WithdrawService {
    pub fn new(
        store: Arc<dyn AccountingStore>,
        engine: TransferEngine,
        bank: BankAccounts,
        mutex: DistributedMutex,
    ) -> Self {
        Self {
            store,
            engine,
            bank,
            mutex,
        }
    }

    pub fn bank(&self) -> &BankAccounts {
        &self.bank
    }

    /// Reserve `source.amount` on the source account and book it against
    /// the bank liability account of its currency (async-start pair).
    pub async fn request_transfer_withdraw(
        &self,
        source: AccountOperationDraft,
    ) -> Result<TransferResult> {
        if source.account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }
        if source.amount <= Decimal::ZERO {
            return Err(AccountingError::InvalidAmount);
        }

        let account = self.engine.ledger().writable_account(source.account_id).await?;
        let bank = self.bank.resolve(&account.currency).await?;

        let destination = AccountOperationDraft::new(
            bank.account_id,
            source.reference_id,
            OperationType::Transfer,
            SyncType::AsyncStart,
            source.amount,
        );
        let mut source = source;
        source.sync_type = SyncType::AsyncStart;

        self.engine.transfer(source, destination).await
    }

    /// Record a withdrawal request and reserve its funds. A failed
    /// reservation leaves the withdrawal canceled, never created.
    pub async fn add_withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        target: WithdrawTarget,
    ) -> Result<WithdrawInfo> {
        if account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }
        if amount <= Decimal::ZERO {
            return Err(AccountingError::InvalidAmount);
        }
        if target.chain.is_empty() || target.public_key.is_empty() {
            return Err(AccountingError::InvalidRequest(
                "withdraw target needs a chain and a public key".to_string(),
            ));
        }
        self.engine.ledger().writable_account(account_id).await?;

        let withdraw = self.store.add_withdraw(account_id, amount, target).await?;
        let withdraw_id = withdraw.withdraw_id;

        self.with_withdraw_lock(withdraw_id, || async {
            let info = self
                .store
                .add_withdraw_info(withdraw_id, WithdrawStatus::Created, "")
                .await?;

            let source = AccountOperationDraft::new(
                account_id,
                withdraw_id,
                OperationType::Transfer,
                SyncType::AsyncStart,
                amount,
            );
            if let Err(e) = self.request_transfer_withdraw(source).await {
                warn!(withdraw_id, error = %e, "Withdraw reservation failed, canceling");
                let reason = e.to_string();
                self.store
                    .add_withdraw_info(withdraw_id, WithdrawStatus::Canceling, &reason)
                    .await?;
                self.store
                    .add_withdraw_info(withdraw_id, WithdrawStatus::Canceled, &reason)
                    .await?;
                return Err(e);
            }

            info!(withdraw_id, account_id, amount = %amount, "Withdraw created");
            Ok(info)
        })
        .await
    }

    pub async fn get_withdraw(&self, withdraw_id: WithdrawId) -> Result<(Withdraw, WithdrawInfo)> {
        if withdraw_id == 0 {
            return Err(AccountingError::InvalidWithdrawId);
        }
        let withdraw = self
            .store
            .get_withdraw(withdraw_id)
            .await?
            .ok_or(AccountingError::InvalidWithdrawId)?;
        let info = self
            .store
            .get_last_withdraw_info(withdraw_id)
            .await?
            .ok_or(AccountingError::InvalidWithdrawId)?;
        Ok((withdraw, info))
    }

    /// `created → canceling`. Funds stay reserved until `finalize_cancel`.
    pub async fn cancel_withdraw(&self, withdraw_id: WithdrawId) -> Result<WithdrawInfo> {
        if withdraw_id == 0 {
            return Err(AccountingError::InvalidWithdrawId);
        }
        self.with_withdraw_lock(withdraw_id, || async {
            self.advance(withdraw_id, WithdrawStatus::Created, WithdrawStatus::Canceling, "")
                .await
        })
        .await
    }

    /// `created → processing`, once the withdrawal is picked for a batch
    pub async fn mark_processing(&self, withdraw_id: WithdrawId) -> Result<WithdrawInfo> {
        if withdraw_id == 0 {
            return Err(AccountingError::InvalidWithdrawId);
        }
        self.with_withdraw_lock(withdraw_id, || async {
            self.advance(withdraw_id, WithdrawStatus::Created, WithdrawStatus::Processing, "")
                .await
        })
        .await
    }

    /// `processing → settled`: debit the user, release both reservations.
    /// Retrying after a failed status write records the status only.
    pub async fn settle_withdraw(&self, withdraw_id: WithdrawId) -> Result<WithdrawInfo> {
        if withdraw_id == 0 {
            return Err(AccountingError::InvalidWithdrawId);
        }
        self.with_withdraw_lock(withdraw_id, || async {
            let (withdraw, info) = self.get_withdraw(withdraw_id).await?;
            ensure_transition(
                withdraw_id,
                info.status,
                WithdrawStatus::Processing,
                WithdrawStatus::Settled,
            )?;

            if !self.is_closed(&withdraw).await? {
                let (source, destination) = self.pair(&withdraw, SyncType::AsyncEnd).await?;
                self.engine.transfer(source, destination).await?;
            }

            self.advance(withdraw_id, WithdrawStatus::Processing, WithdrawStatus::Settled, "")
                .await
        })
        .await
    }

    /// `canceling → canceled`: revert the reservation made at creation.
    /// Retrying after a failed status write records the status only.
    pub async fn finalize_cancel(&self, withdraw_id: WithdrawId) -> Result<WithdrawInfo> {
        if withdraw_id == 0 {
            return Err(AccountingError::InvalidWithdrawId);
        }
        self.with_withdraw_lock(withdraw_id, || async {
            let (withdraw, info) = self.get_withdraw(withdraw_id).await?;
            ensure_transition(
                withdraw_id,
                info.status,
                WithdrawStatus::Canceling,
                WithdrawStatus::Canceled,
            )?;

            if !self.is_closed(&withdraw).await? {
                let (source, destination) = self.pair(&withdraw, SyncType::AsyncEnd).await?;
                self.engine.revert(source, destination).await?;
            }

            self.advance(withdraw_id, WithdrawStatus::Canceling, WithdrawStatus::Canceled, "")
                .await
        })
        .await
    }

    /// `processing → created`, undoing `mark_processing` for a batch that was
    /// never recorded. Refused once funds moved for the withdrawal.
    pub async fn release_processing(
        &self,
        withdraw_id: WithdrawId,
        reason: &str,
    ) -> Result<WithdrawInfo> {
        if withdraw_id == 0 {
            return Err(AccountingError::InvalidWithdrawId);
        }
        self.with_withdraw_lock(withdraw_id, || async {
            let (withdraw, current) = self.get_withdraw(withdraw_id).await?;
            if current.status != WithdrawStatus::Processing || self.is_closed(&withdraw).await? {
                return Err(AccountingError::InvalidTransition(format!(
                    "withdraw {}: {} -> {}",
                    withdraw_id,
                    current.status,
                    WithdrawStatus::Created
                )));
            }

            let info = self
                .store
                .add_withdraw_info(withdraw_id, WithdrawStatus::Created, reason)
                .await?;
            warn!(withdraw_id, reason = %reason, "Withdraw returned to created");
            Ok(info)
        })
        .await
    }

    /// Withdrawals currently in `status`, oldest first
    pub async fn pending(&self, status: WithdrawStatus, limit: usize) -> Result<Vec<WithdrawId>> {
        self.store.list_withdraws_by_status(status, limit).await
    }

    /// Whether the async-end of this withdrawal is already on the user chain
    async fn is_closed(&self, withdraw: &Withdraw) -> Result<bool> {
        let ops = self
            .store
            .get_account_operations_by_reference(withdraw.account_id, withdraw.withdraw_id)
            .await?;
        match ops.iter().find(|op| op.sync_type == SyncType::AsyncEnd) {
            Some(op) => {
                info!(
                    withdraw_id = withdraw.withdraw_id,
                    operation_id = op.operation_id,
                    "Withdraw funds already released, recording status only"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pair(
        &self,
        withdraw: &Withdraw,
        sync_type: SyncType,
    ) -> Result<(AccountOperationDraft, AccountOperationDraft)> {
        let account = self.engine.ledger().writable_account(withdraw.account_id).await?;
        let bank = self.bank.resolve(&account.currency).await?;

        let source = AccountOperationDraft::new(
            withdraw.account_id,
            withdraw.withdraw_id,
            OperationType::Transfer,
            sync_type,
            Decimal::ZERO,
        );
        let destination = AccountOperationDraft::new(
            bank.account_id,
            withdraw.withdraw_id,
            OperationType::Transfer,
            sync_type,
            withdraw.amount,
        );
        Ok((source, destination))
    }

    /// Check the latest status and append the next one. Caller holds the
    /// withdraw lock.
    async fn advance(
        &self,
        withdraw_id: WithdrawId,
        expected: WithdrawStatus,
        next: WithdrawStatus,
        data: &str,
    ) -> Result<WithdrawInfo> {
        let current = self
            .store
            .get_last_withdraw_info(withdraw_id)
            .await?
            .ok_or(AccountingError::InvalidWithdrawId)?;
        ensure_transition(withdraw_id, current.status, expected, next)?;

        let info = self.store.add_withdraw_info(withdraw_id, next, data).await?;
        info!(withdraw_id, from = %current.status, to = %next, "Withdraw status changed");
        Ok(info)
    }

    async fn with_withdraw_lock<F, Fut, T>(&self, withdraw_id: WithdrawId, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.mutex.lock(&lock_keys::withdraw(withdraw_id)).await?;
        let result = f().await;
        if let Err(e) = handle.unlock().await {
            warn!(withdraw_id, error = %e, "Withdraw lock release failed");
        }
        result
    }
}

fn ensure_transition(
    withdraw_id: WithdrawId,
    current: WithdrawStatus,
    expected: WithdrawStatus,
    next: WithdrawStatus,
) -> Result<()> {
    if current != expected || !current.can_transition_to(next) {
        return Err(AccountingError::InvalidTransition(format!(
            "withdraw {}: {} -> {}",
            withdraw_id, current, next
        )));
    }
    Ok(())
}
