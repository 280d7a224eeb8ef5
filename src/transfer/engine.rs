use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core_types::{AccountId, lock_keys};
use crate::error::{AccountingError, Result};
use crate::ledger::{AccountOperation, AccountOperationDraft, Ledger, SyncType};
use crate::lock::{LockHandle, unlock_all};

/// The two operations written by one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub source: AccountOperation,
    pub destination: AccountOperation,
}

/// Funds a transfer needs from the accounts before it may be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    /// Source available balance covers X
    SourceAvailable(Decimal),
    /// Both accounts still hold a reservation of at least X
    Reserved(Decimal),
}

fn check_drafts(
    source: &AccountOperationDraft,
    destination: &AccountOperationDraft,
) -> Result<Decimal> {
    if source.account_id == 0 || destination.account_id == 0 {
        return Err(AccountingError::InvalidAccountId);
    }
    if !destination.operation_type.is_transfer() {
        return Err(AccountingError::InvalidAccountOperation(format!(
            "transfer destination cannot be of type {}",
            destination.operation_type
        )));
    }
    if source.account_id == destination.account_id {
        return Err(AccountingError::InvalidAccountOperation(format!(
            "transfer from account {} to itself",
            source.account_id
        )));
    }
    if destination.amount <= Decimal::ZERO {
        return Err(AccountingError::InvalidAmount);
    }
    Ok(destination.amount)
}

fn shared_fields(
    mut source: AccountOperationDraft,
    destination: &AccountOperationDraft,
) -> AccountOperationDraft {
    source.operation_type = destination.operation_type;
    source.sync_type = destination.sync_type;
    if source.reference_id == 0 {
        source.reference_id = destination.reference_id;
    }
    source
}

/// Fill in both entries' deltas from the destination amount and sync type.
/// Whatever amounts the caller put on the source are replaced.
pub fn derive_entries(
    source: AccountOperationDraft,
    destination: AccountOperationDraft,
) -> Result<(AccountOperationDraft, AccountOperationDraft)> {
    let x = check_drafts(&source, &destination)?;
    let mut source = shared_fields(source, &destination);
    let mut destination = destination;

    let (src_amount, src_lock, dst_amount, dst_lock) = match destination.sync_type {
        SyncType::Sync => (-x, Decimal::ZERO, x, Decimal::ZERO),
        SyncType::AsyncStart => (Decimal::ZERO, x, x, x),
        SyncType::AsyncEnd => (-x, -x, Decimal::ZERO, -x),
    };
    source.amount = src_amount;
    source.lock_amount = src_lock;
    destination.amount = dst_amount;
    destination.lock_amount = dst_lock;

    Ok((source, destination))
}

/// Entries that undo an `async-start` of X without completing it: both
/// reservations are released and the provisional credit leaves the
/// destination.
pub fn derive_reversal(
    source: AccountOperationDraft,
    destination: AccountOperationDraft,
) -> Result<(AccountOperationDraft, AccountOperationDraft)> {
    let x = check_drafts(&source, &destination)?;
    let mut destination = destination;
    destination.sync_type = SyncType::AsyncEnd;
    let mut source = shared_fields(source, &destination);

    source.amount = Decimal::ZERO;
    source.lock_amount = -x;
    destination.amount = -x;
    destination.lock_amount = -x;

    Ok((source, destination))
}

#[derive(Clone)]
pub struct TransferEngine {
    ledger: Ledger,
}

impl TransferEngine {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Write a sync, async-start or async-end transfer pair.
    pub async fn transfer(
        &self,
        source: AccountOperationDraft,
        destination: AccountOperationDraft,
    ) -> Result<TransferResult> {
        let (source, destination) = derive_entries(source, destination)?;
        let requirement = match destination.sync_type {
            SyncType::Sync | SyncType::AsyncStart => {
                Requirement::SourceAvailable(destination.amount)
            }
            SyncType::AsyncEnd => Requirement::Reserved(-destination.lock_amount),
        };
        self.execute(source, destination, requirement).await
    }

    /// Compensate an `async-start` that will never complete.
    pub async fn revert(
        &self,
        source: AccountOperationDraft,
        destination: AccountOperationDraft,
    ) -> Result<TransferResult> {
        let (source, destination) = derive_reversal(source, destination)?;
        let requirement = Requirement::Reserved(-destination.lock_amount);
        self.execute(source, destination, requirement).await
    }

    async fn execute(
        &self,
        source: AccountOperationDraft,
        destination: AccountOperationDraft,
        requirement: Requirement,
    ) -> Result<TransferResult> {
        let src_account = self.ledger.writable_account(source.account_id).await?;
        let dst_account = self.ledger.writable_account(destination.account_id).await?;
        if src_account.currency != dst_account.currency {
            return Err(AccountingError::InvalidAccountOperation(format!(
                "currency mismatch: account {} is {}, account {} is {}",
                src_account.account_id,
                src_account.currency,
                dst_account.account_id,
                dst_account.currency
            )));
        }

        let handles = self
            .lock_accounts(source.account_id, destination.account_id)
            .await?;
        let result = self
            .write_pair(&handles, source, destination, requirement)
            .await;
        if let Err(e) = unlock_all(handles).await {
            warn!(error = %e, "Lock release failed after transfer");
        }
        let result = result?;

        info!(
            source_account = result.source.account_id,
            destination_account = result.destination.account_id,
            reference_id = result.destination.reference_id,
            sync_type = %result.destination.sync_type,
            source_amount = %result.source.amount,
            source_lock = %result.source.lock_amount,
            destination_amount = %result.destination.amount,
            destination_lock = %result.destination.lock_amount,
            "Transfer committed"
        );
        Ok(result)
    }

    /// Lock both accounts in ascending id order
    async fn lock_accounts(&self, a: AccountId, b: AccountId) -> Result<Vec<LockHandle>> {
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let mutex = self.ledger.mutex();

        let first = mutex.lock(&lock_keys::account(first)).await?;
        match mutex.lock(&lock_keys::account(second)).await {
            Ok(second) => Ok(vec![first, second]),
            Err(e) => {
                if let Err(unlock_err) = first.unlock().await {
                    warn!(error = %unlock_err, "Lock release failed after partial acquisition");
                }
                Err(e)
            }
        }
    }

    async fn write_pair(
        &self,
        handles: &[LockHandle],
        source: AccountOperationDraft,
        destination: AccountOperationDraft,
        requirement: Requirement,
    ) -> Result<TransferResult> {
        let src_state = self.ledger.get_current_balance(source.account_id).await?;
        match requirement {
            Requirement::SourceAvailable(x) => {
                if src_state.available() < x {
                    return Err(AccountingError::InsufficientFunds);
                }
            }
            Requirement::Reserved(x) => {
                let dst_state = self
                    .ledger
                    .get_current_balance(destination.account_id)
                    .await?;
                if src_state.total_locked < x || dst_state.total_locked < x {
                    return Err(AccountingError::InvalidAccountOperation(format!(
                        "no reservation of {} between accounts {} and {}",
                        x, source.account_id, destination.account_id
                    )));
                }
            }
        }

        let mut ops = self
            .ledger
            .append_operations(handles, vec![source, destination])
            .await?;
        if ops.len() != 2 {
            return Err(AccountingError::Invariant(format!(
                "transfer produced {} operations",
                ops.len()
            )));
        }
        let destination = ops.remove(1);
        let source = ops.remove(0);
        Ok(TransferResult {
            source,
            destination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Currency;
    use crate::ledger::{BalanceState, OperationType};
    use crate::lock::DistributedMutex;
    use crate::store::{AccountingStore, MemoryStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        engine: TransferEngine,
        store: Arc<MemoryStore>,
        a: AccountId,
        b: AccountId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.add_currency(Currency::new("BTC")).await.unwrap();
        store.add_currency(Currency::new("ETH")).await.unwrap();
        let a = store.create_account(1, "BTC", "main").await.unwrap();
        let b = store.create_account(2, "BTC", "main").await.unwrap();
        let ledger = Ledger::new(store.clone(), DistributedMutex::in_memory());
        Fixture {
            engine: TransferEngine::new(ledger),
            store,
            a: a.account_id,
            b: b.account_id,
        }
    }

    fn source(account_id: AccountId) -> AccountOperationDraft {
        AccountOperationDraft::new(
            account_id,
            0,
            OperationType::Transfer,
            SyncType::Sync,
            Decimal::ZERO,
        )
    }

    fn destination(account_id: AccountId, sync: SyncType, x: Decimal) -> AccountOperationDraft {
        AccountOperationDraft::new(account_id, 5, OperationType::Transfer, sync, x)
    }

    async fn balance(f: &Fixture, id: AccountId) -> BalanceState {
        f.engine.ledger().get_current_balance(id).await.unwrap()
    }

    #[test]
    fn test_derivation_table() {
        let rows = [
            (SyncType::Sync, (dec!(-3), dec!(0), dec!(3), dec!(0))),
            (SyncType::AsyncStart, (dec!(0), dec!(3), dec!(3), dec!(3))),
            (SyncType::AsyncEnd, (dec!(-3), dec!(-3), dec!(0), dec!(-3))),
        ];
        for (sync, (sa, sl, da, dl)) in rows {
            let (s, d) = derive_entries(source(1), destination(2, sync, dec!(3))).unwrap();
            assert_eq!((s.amount, s.lock_amount, d.amount, d.lock_amount), (sa, sl, da, dl));
            assert_eq!(s.sync_type, sync);
            assert_eq!(s.reference_id, 5);
        }
    }

    #[test]
    fn test_derivation_rejects_bad_drafts() {
        let mut deposit = destination(2, SyncType::Sync, dec!(1));
        deposit.operation_type = OperationType::Deposit;
        assert!(matches!(
            derive_entries(source(1), deposit),
            Err(AccountingError::InvalidAccountOperation(_))
        ));
        assert!(matches!(
            derive_entries(source(2), destination(2, SyncType::Sync, dec!(1))),
            Err(AccountingError::InvalidAccountOperation(_))
        ));
        assert!(matches!(
            derive_entries(source(1), destination(2, SyncType::Sync, dec!(0))),
            Err(AccountingError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn test_sync_transfer() {
        let f = fixture().await;
        f.engine.ledger().deposit(f.a, 0, dec!(10.0)).await.unwrap();

        let result = f
            .engine
            .transfer(source(f.a), destination(f.b, SyncType::Sync, dec!(3.0)))
            .await
            .unwrap();
        assert_eq!(result.source.amount, dec!(-3.0));
        assert_eq!(result.source.balance, dec!(7.0));
        assert_eq!(result.destination.amount, dec!(3.0));
        assert_eq!(result.destination.balance, dec!(3.0));
    }

    #[tokio::test]
    async fn test_two_phase_transfer_conserves_value() {
        let f = fixture().await;
        f.engine.ledger().deposit(f.a, 0, dec!(7.0)).await.unwrap();

        f.engine
            .transfer(source(f.a), destination(f.b, SyncType::AsyncStart, dec!(1.0)))
            .await
            .unwrap();
        assert_eq!(balance(&f, f.a).await, BalanceState::new(dec!(7.0), dec!(1.0)));
        let b = balance(&f, f.b).await;
        assert_eq!(b, BalanceState::new(dec!(1.0), dec!(1.0)));
        assert_eq!(b.available(), dec!(0));

        f.engine
            .transfer(source(f.a), destination(f.b, SyncType::AsyncEnd, dec!(1.0)))
            .await
            .unwrap();
        assert_eq!(balance(&f, f.a).await, BalanceState::new(dec!(6.0), dec!(0)));
        assert_eq!(balance(&f, f.b).await, BalanceState::new(dec!(1.0), dec!(0)));

        let locks: Decimal = f
            .store
            .operations(f.a)
            .unwrap()
            .iter()
            .filter(|op| op.sync_type != SyncType::Sync)
            .map(|op| op.lock_amount)
            .sum();
        assert_eq!(locks, dec!(0));
    }

    #[tokio::test]
    async fn test_revert_releases_reservation() {
        let f = fixture().await;
        f.engine.ledger().deposit(f.a, 0, dec!(5)).await.unwrap();
        f.engine
            .transfer(source(f.a), destination(f.b, SyncType::AsyncStart, dec!(2)))
            .await
            .unwrap();

        f.engine
            .revert(source(f.a), destination(f.b, SyncType::AsyncEnd, dec!(2)))
            .await
            .unwrap();
        assert_eq!(balance(&f, f.a).await, BalanceState::new(dec!(5), dec!(0)));
        assert_eq!(balance(&f, f.b).await, BalanceState::new(dec!(0), dec!(0)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_writes_nothing() {
        let f = fixture().await;
        f.engine.ledger().deposit(f.a, 0, dec!(1)).await.unwrap();

        let err = f
            .engine
            .transfer(source(f.a), destination(f.b, SyncType::Sync, dec!(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountingError::InsufficientFunds));
        assert_eq!(f.store.operations(f.a).unwrap().len(), 1);
        assert!(f.store.operations(f.b).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_store_append_is_an_invariant_error() {
        use crate::store::faulty::{Fault, FaultyStore};

        let store = Arc::new(FaultyStore::new());
        store.add_currency(Currency::new("BTC")).await.unwrap();
        let a = store.create_account(1, "BTC", "main").await.unwrap().account_id;
        let b = store.create_account(2, "BTC", "main").await.unwrap().account_id;
        let engine = TransferEngine::new(Ledger::new(store.clone(), DistributedMutex::in_memory()));
        engine.ledger().deposit(a, 0, dec!(3)).await.unwrap();

        store.inject(Fault::DropAppend);
        let err = engine
            .transfer(source(a), destination(b, SyncType::Sync, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountingError::Invariant(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Invariant);

        assert_eq!(store.memory().operations(a).unwrap().len(), 1);
        assert!(store.memory().operations(b).unwrap().is_empty());
        assert_eq!(
            engine.ledger().get_current_balance(a).await.unwrap(),
            BalanceState::new(dec!(3), dec!(0))
        );

        // locks were released on the failure path
        engine
            .transfer(source(a), destination(b, SyncType::Sync, dec!(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_async_end_without_reservation_fails() {
        let f = fixture().await;
        f.engine.ledger().deposit(f.a, 0, dec!(5)).await.unwrap();
        let err = f
            .engine
            .transfer(source(f.a), destination(f.b, SyncType::AsyncEnd, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountingError::InvalidAccountOperation(_)));
    }

    #[tokio::test]
    async fn test_currency_mismatch() {
        let f = fixture().await;
        let eth = f.store.create_account(2, "ETH", "main").await.unwrap();
        f.engine.ledger().deposit(f.a, 0, dec!(5)).await.unwrap();

        let err = f
            .engine
            .transfer(
                source(f.a),
                destination(eth.account_id, SyncType::Sync, dec!(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccountingError::InvalidAccountOperation(_)));
    }

    #[tokio::test]
    async fn test_opposite_transfers_do_not_deadlock() {
        let f = fixture().await;
        f.engine.ledger().deposit(f.a, 0, dec!(100)).await.unwrap();
        f.engine.ledger().deposit(f.b, 0, dec!(100)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let engine = f.engine.clone();
            let (from, to) = if i % 2 == 0 { (f.a, f.b) } else { (f.b, f.a) };
            tasks.push(tokio::spawn(async move {
                engine
                    .transfer(source(from), destination(to, SyncType::Sync, dec!(1)))
                    .await
            }));
        }
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(balance(&f, f.a).await.balance, dec!(100));
        assert_eq!(balance(&f, f.b).await.balance, dec!(100));
        crate::ledger::replay(&f.store.operations(f.a).unwrap()).unwrap();
        crate::ledger::replay(&f.store.operations(f.b).unwrap()).unwrap();
    }
}
