use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::types::{Batch, BatchInfo, BatchStatus, BatchWithdraw, BatchWithdraws, WithdrawEntry};
use crate::core_types::{BatchId, WithdrawId, lock_keys};
use crate::error::{AccountingError, Result};
use crate::lock::DistributedMutex;
use crate::store::AccountingStore;
use crate::withdraw::{WithdrawService, WithdrawStatus};

/// The only accepted batch status edges:
///
/// - `ready → processing` with an empty `tx_id` (not broadcast yet)
/// - `processing → complete` with the broadcast `tx_id`
pub fn check_update(current: BatchStatus, next: BatchStatus, tx_id: &str) -> Result<()> {
    match (current, next) {
        (BatchStatus::Ready, BatchStatus::Processing) if !tx_id.is_empty() => Err(
            AccountingError::InvalidTransactionId(format!("{} before broadcast", tx_id)),
        ),
        (BatchStatus::Processing, BatchStatus::Complete) if tx_id.is_empty() => Err(
            AccountingError::InvalidTransactionId("missing on completion".to_string()),
        ),
        (BatchStatus::Ready, BatchStatus::Processing)
        | (BatchStatus::Processing, BatchStatus::Complete) => Ok(()),
        _ => Err(AccountingError::InvalidTransition(format!(
            "batch {} -> {}",
            current, next
        ))),
    }
}

#[derive(Clone)]
pub struct BatchService {
    store: Arc<dyn AccountingStore>,
    withdraws: WithdrawService,
    mutex: DistributedMutex,
}

impl BatchService {
    pub fn new(
        store: Arc<dyn AccountingStore>,
        withdraws: WithdrawService,
        mutex: DistributedMutex,
    ) -> Self {
        Self {
            store,
            withdraws,
            mutex,
        }
    }

    /// Group `withdraw_ids` into a new `ready` batch on `network` and move
    /// them to `processing`. Members must be distinct, currently `created`,
    /// and share one currency and one target chain. Members are marked before
    /// the batch is written; a failed write returns them to `created`.
    pub async fn add_batch(&self, network: &str, withdraw_ids: &[WithdrawId]) -> Result<BatchInfo> {
        if network.is_empty() {
            return Err(AccountingError::InvalidRequest("network is empty".to_string()));
        }
        if withdraw_ids.is_empty() {
            return Err(AccountingError::InvalidRequest("batch has no withdraws".to_string()));
        }
        let mut seen = HashSet::with_capacity(withdraw_ids.len());
        if let Some(id) = withdraw_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(AccountingError::InvalidRequest(format!(
                "withdraw {} listed twice",
                id
            )));
        }

        self.with_network_lock(network, || async {
            self.check_members(withdraw_ids).await?;

            let mut marked = Vec::with_capacity(withdraw_ids.len());
            let result = self.record(network, withdraw_ids, &mut marked).await;
            if let Err(e) = &result {
                self.release_members(&marked, &e.to_string()).await;
            }
            result
        })
        .await
    }

    async fn check_members(&self, withdraw_ids: &[WithdrawId]) -> Result<()> {
        // (currency, chain) of the first member
        let mut shared: Option<(String, String)> = None;
        for id in withdraw_ids {
            let (withdraw, info) = self.withdraws.get_withdraw(*id).await?;
            if info.status != WithdrawStatus::Created {
                return Err(AccountingError::InvalidTransition(format!(
                    "withdraw {} is {}, cannot join a batch",
                    id, info.status
                )));
            }
            let account = self
                .store
                .get_account_by_id(withdraw.account_id)
                .await?
                .ok_or_else(|| {
                    AccountingError::NotFound(format!("account {}", withdraw.account_id))
                })?;

            let member = (account.currency, withdraw.target.chain);
            match &shared {
                None => shared = Some(member),
                Some(first) if *first != member => {
                    return Err(AccountingError::InvalidRequest(format!(
                        "withdraw {} is {} on {}, batch holds {} on {}",
                        id, member.0, member.1, first.0, first.1
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        network: &str,
        withdraw_ids: &[WithdrawId],
        marked: &mut Vec<WithdrawId>,
    ) -> Result<BatchInfo> {
        for id in withdraw_ids {
            self.withdraws.mark_processing(*id).await?;
            marked.push(*id);
        }

        let batch = self.store.add_batch(network, withdraw_ids).await?;
        let info = self
            .store
            .add_batch_info(batch.batch_id, BatchStatus::Ready, network, "", None)
            .await?;

        info!(
            batch_id = batch.batch_id,
            network = %network,
            withdraws = withdraw_ids.len(),
            "Batch created"
        );
        Ok(info)
    }

    async fn release_members(&self, marked: &[WithdrawId], reason: &str) {
        for id in marked {
            if let Err(e) = self.withdraws.release_processing(*id, reason).await {
                error!(withdraw_id = *id, error = %e, "Batch member stuck in processing");
            }
        }
    }

    /// Batches of `network` whose current status is `status`, with members
    /// resolved. A batch that does not fully resolve is left out.
    pub async fn list_batches(&self, status: BatchStatus, network: &str) -> Result<BatchWithdraws> {
        let infos = self.store.list_batch_infos(status, network).await?;

        let mut result = BatchWithdraws::default();
        for info in infos {
            match self.resolve(&info).await {
                Ok(batch) => result.batches.push(batch),
                Err(e) => {
                    warn!(
                        batch_id = info.batch_id,
                        network = %network,
                        error = %e,
                        "Dropping unresolved batch"
                    );
                }
            }
        }
        Ok(result)
    }

    async fn resolve(&self, info: &BatchInfo) -> Result<BatchWithdraw> {
        let ids = self.store.get_batch_withdraws(info.batch_id).await?;

        let mut withdraws = Vec::with_capacity(ids.len());
        let mut currency: Option<String> = None;
        for id in ids {
            let withdraw = self
                .store
                .get_withdraw(id)
                .await?
                .ok_or_else(|| AccountingError::NotFound(format!("withdraw {}", id)))?;
            let account = self
                .store
                .get_account_by_id(withdraw.account_id)
                .await?
                .ok_or_else(|| {
                    AccountingError::NotFound(format!("account {}", withdraw.account_id))
                })?;

            match &currency {
                None => currency = Some(account.currency.clone()),
                Some(c) if *c != account.currency => {
                    return Err(AccountingError::Invariant(format!(
                        "batch {} mixes {} and {}",
                        info.batch_id, c, account.currency
                    )));
                }
                Some(_) => {}
            }

            withdraws.push(WithdrawEntry {
                withdraw_id: withdraw.withdraw_id,
                account_id: withdraw.account_id,
                amount: withdraw.amount,
                chain: withdraw.target.chain,
                public_key: withdraw.target.public_key,
            });
        }

        let currency = currency.ok_or_else(|| {
            AccountingError::NotFound(format!("members of batch {}", info.batch_id))
        })?;
        let bank = self
            .withdraws
            .bank()
            .find(&currency)
            .await?
            .ok_or_else(|| AccountingError::NotFound(format!("bank account for {}", currency)))?;

        Ok(BatchWithdraw {
            batch_id: info.batch_id,
            network: info.network.clone(),
            status: info.status,
            tx_id: info.tx_id.clone(),
            height: info.height,
            bank_account_id: bank.account_id,
            withdraws,
        })
    }

    /// Advance a batch. Completion settles every member withdrawal before
    /// the new status is written, so a retried completion picks up where a
    /// failed one stopped.
    pub async fn update_batch(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        tx_id: &str,
        height: Option<u64>,
    ) -> Result<BatchStatus> {
        let batch = self.get_batch(batch_id).await?;

        self.with_network_lock(&batch.network, || async {
            let current = self
                .store
                .get_last_batch_info(batch_id)
                .await?
                .ok_or(AccountingError::InvalidBatchId)?;
            check_update(current.status, status, tx_id)?;

            let height = match status {
                BatchStatus::Complete => {
                    self.settle_members(batch_id).await?;
                    height
                }
                _ => None,
            };

            let info = self
                .store
                .add_batch_info(batch_id, status, &batch.network, tx_id, height)
                .await?;
            info!(
                batch_id,
                network = %batch.network,
                from = %current.status,
                to = %info.status,
                tx_id = %tx_id,
                "Batch status changed"
            );
            Ok(info.status)
        })
        .await
    }

    pub async fn get_batch(&self, batch_id: BatchId) -> Result<Batch> {
        if batch_id == 0 {
            return Err(AccountingError::InvalidBatchId);
        }
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or(AccountingError::InvalidBatchId)
    }

    async fn settle_members(&self, batch_id: BatchId) -> Result<()> {
        for id in self.store.get_batch_withdraws(batch_id).await? {
            let (_, info) = self.withdraws.get_withdraw(id).await?;
            if info.status == WithdrawStatus::Settled {
                continue;
            }
            self.withdraws.settle_withdraw(id).await?;
        }
        Ok(())
    }

    async fn with_network_lock<F, Fut, T>(&self, network: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.mutex.lock(&lock_keys::batch_network(network)).await?;
        let result = f().await;
        if let Err(e) = handle.unlock().await {
            warn!(network = %network, error = %e, "Batch lock release failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountService, Currency};
    use crate::core_types::AccountId;
    use crate::guard::{MemoryCounterStore, SingleCallGuard};
    use crate::ledger::{BalanceState, Ledger};
    use crate::store::faulty::{Fault, FaultyStore};
    use crate::transfer::TransferEngine;
    use crate::withdraw::{BankAccounts, WithdrawTarget};
    use rust_decimal_macros::dec;

    struct Fixture {
        service: BatchService,
        ledger: Ledger,
        store: Arc<FaultyStore>,
        btc: AccountId,
        eth: AccountId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(FaultyStore::new());
        store.add_currency(Currency::new("BTC")).await.unwrap();
        store.add_currency(Currency::new("ETH")).await.unwrap();
        let mutex = DistributedMutex::in_memory();
        let accounts = AccountService::new(store.clone(), mutex.clone());
        let guard = SingleCallGuard::new(mutex.clone(), Arc::new(MemoryCounterStore::new()));
        let bank = BankAccounts::new(store.clone(), accounts.clone(), guard, 1, "withdraw");
        let ledger = Ledger::new(store.clone(), mutex.clone());
        let engine = TransferEngine::new(ledger.clone());
        let withdraws = WithdrawService::new(store.clone(), engine, bank, mutex.clone());
        let service = BatchService::new(store.clone(), withdraws, mutex);

        let btc = accounts.create_account(42, "BTC", "main").await.unwrap();
        let eth = accounts.create_account(42, "ETH", "main").await.unwrap();
        ledger.deposit(btc.account_id, 0, dec!(5)).await.unwrap();
        ledger.deposit(eth.account_id, 0, dec!(5)).await.unwrap();
        Fixture {
            service,
            ledger,
            store,
            btc: btc.account_id,
            eth: eth.account_id,
        }
    }

    fn target(chain: &str) -> WithdrawTarget {
        WithdrawTarget {
            chain: chain.to_string(),
            public_key: "pk-1".to_string(),
        }
    }

    async fn withdraw(f: &Fixture, account_id: AccountId, chain: &str) -> WithdrawId {
        f.service
            .withdraws
            .add_withdraw(account_id, dec!(1), target(chain))
            .await
            .unwrap()
            .withdraw_id
    }

    async fn status(f: &Fixture, id: WithdrawId) -> WithdrawStatus {
        f.service.withdraws.get_withdraw(id).await.unwrap().1.status
    }

    async fn ready_batches(f: &Fixture) -> usize {
        f.store
            .list_batch_infos(BatchStatus::Ready, "btc")
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_mixed_currency_batch_is_refused() {
        let f = fixture().await;
        let btc = withdraw(&f, f.btc, "bitcoin").await;
        let eth = withdraw(&f, f.eth, "ethereum").await;

        let err = f.service.add_batch("btc", &[btc, eth]).await.unwrap_err();
        assert!(matches!(err, AccountingError::InvalidRequest(_)));
        assert_eq!(ready_batches(&f).await, 0);

        // members stay cancelable
        for id in [btc, eth] {
            assert_eq!(status(&f, id).await, WithdrawStatus::Created);
            f.service.withdraws.cancel_withdraw(id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_mixed_chain_batch_is_refused() {
        let f = fixture().await;
        let a = withdraw(&f, f.btc, "bitcoin").await;
        let b = withdraw(&f, f.btc, "bitcoin-testnet").await;

        let err = f.service.add_batch("btc", &[a, b]).await.unwrap_err();
        assert!(matches!(err, AccountingError::InvalidRequest(_)));
        assert_eq!(status(&f, a).await, WithdrawStatus::Created);
        assert_eq!(status(&f, b).await, WithdrawStatus::Created);
    }

    #[tokio::test]
    async fn test_duplicate_members_are_refused() {
        let f = fixture().await;
        let w = withdraw(&f, f.btc, "bitcoin").await;

        let err = f.service.add_batch("btc", &[w, w]).await.unwrap_err();
        assert!(matches!(err, AccountingError::InvalidRequest(_)));
        assert_eq!(ready_batches(&f).await, 0);
        assert_eq!(status(&f, w).await, WithdrawStatus::Created);
        assert_eq!(f.store.memory().withdraw_history(w).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_write_returns_members() {
        let f = fixture().await;
        let a = withdraw(&f, f.btc, "bitcoin").await;
        let b = withdraw(&f, f.btc, "bitcoin").await;

        f.store.inject(Fault::BatchInfo);
        let err = f.service.add_batch("btc", &[a, b]).await.unwrap_err();
        assert!(matches!(err, AccountingError::Database(_)));
        assert_eq!(ready_batches(&f).await, 0);
        for id in [a, b] {
            assert_eq!(status(&f, id).await, WithdrawStatus::Created);
        }
        assert_eq!(
            f.ledger.get_current_balance(f.btc).await.unwrap(),
            BalanceState::new(dec!(5), dec!(2))
        );

        let info = f.service.add_batch("btc", &[a, b]).await.unwrap();
        assert_eq!(info.status, BatchStatus::Ready);
        assert_eq!(ready_batches(&f).await, 1);
        assert_eq!(status(&f, a).await, WithdrawStatus::Processing);
    }

    #[tokio::test]
    async fn test_failed_member_mark_rolls_back_earlier_members() {
        let f = fixture().await;
        let a = withdraw(&f, f.btc, "bitcoin").await;
        let b = withdraw(&f, f.btc, "bitcoin").await;

        f.store.inject(Fault::WithdrawInfo(b, WithdrawStatus::Processing));
        let err = f.service.add_batch("btc", &[a, b]).await.unwrap_err();
        assert!(matches!(err, AccountingError::Database(_)));
        assert_eq!(status(&f, a).await, WithdrawStatus::Created);
        assert_eq!(status(&f, b).await, WithdrawStatus::Created);
        assert_eq!(ready_batches(&f).await, 0);
    }

    #[test]
    fn test_transition_guard() {
        use BatchStatus::*;
        assert!(check_update(Ready, Processing, "").is_ok());
        assert!(check_update(Processing, Complete, "0xabc").is_ok());

        assert!(matches!(
            check_update(Ready, Processing, "0xabc"),
            Err(AccountingError::InvalidTransactionId(_))
        ));
        assert!(matches!(
            check_update(Processing, Complete, ""),
            Err(AccountingError::InvalidTransactionId(_))
        ));

        for (from, to) in [
            (Ready, Ready),
            (Ready, Complete),
            (Processing, Processing),
            (Processing, Ready),
            (Complete, Processing),
            (Complete, Complete),
        ] {
            assert!(matches!(
                check_update(from, to, ""),
                Err(AccountingError::InvalidTransition(_))
            ));
        }
    }
}
