//! Running balance computation
//!
//! The single place where `Balance` and `TotalLocked` are derived. The ledger
//! uses it for its pre-check and every store uses it when committing, so the
//! two can never drift apart.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{AccountOperation, AccountOperationDraft};
use crate::core_types::OperationId;
use crate::error::{AccountingError, Result};

/// Running totals of one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceState {
    pub balance: Decimal,
    pub total_locked: Decimal,
}

impl BalanceState {
    pub fn new(balance: Decimal, total_locked: Decimal) -> Self {
        Self {
            balance,
            total_locked,
        }
    }

    /// Totals after `last`, zero when the account has no operation yet
    pub fn after(last: Option<&AccountOperation>) -> Self {
        last.map(|op| Self::new(op.balance, op.total_locked))
            .unwrap_or_default()
    }

    /// Funds not reserved by an in-flight operation
    #[inline]
    pub fn available(&self) -> Decimal {
        self.balance - self.total_locked
    }
}

/// `Balance[n] = Balance[n-1] + Amount[n]`, `TotalLocked[n] = TotalLocked[n-1] + LockAmount[n]`
pub fn apply_operation(
    prev: BalanceState,
    amount: Decimal,
    lock_amount: Decimal,
) -> Result<BalanceState> {
    let balance = prev
        .balance
        .checked_add(amount)
        .ok_or_else(|| AccountingError::Invariant("balance overflow".to_string()))?;
    let total_locked = prev
        .total_locked
        .checked_add(lock_amount)
        .ok_or_else(|| AccountingError::Invariant("locked amount overflow".to_string()))?;

    Ok(BalanceState::new(balance, total_locked))
}

/// Turn a draft into the record a store will persist, chaining it after `prev`.
pub fn materialize(
    draft: &AccountOperationDraft,
    prev: Option<&AccountOperation>,
    operation_id: OperationId,
    now: DateTime<Utc>,
) -> Result<AccountOperation> {
    if let Some(prev) = prev
        && prev.account_id != draft.account_id
    {
        return Err(AccountingError::Invariant(format!(
            "previous operation {} belongs to account {}, not {}",
            prev.operation_id, prev.account_id, draft.account_id
        )));
    }

    let state = apply_operation(BalanceState::after(prev), draft.amount, draft.lock_amount)?;

    Ok(AccountOperation {
        operation_id,
        operation_prev_id: prev.map(|p| p.operation_id).unwrap_or(0),
        account_id: draft.account_id,
        reference_id: draft.reference_id,
        operation_type: draft.operation_type,
        sync_type: draft.sync_type,
        amount: draft.amount,
        balance: state.balance,
        lock_amount: draft.lock_amount,
        total_locked: state.total_locked,
        timestamp: draft.timestamp.unwrap_or(now),
    })
}

/// Replay one account's operations (append order) from zero and verify the
/// stored chain: previous ids link up and every stored running total matches.
/// Returns the final totals.
pub fn replay(operations: &[AccountOperation]) -> Result<BalanceState> {
    let mut state = BalanceState::default();
    let mut prev_id: OperationId = 0;

    for op in operations {
        if op.operation_prev_id != prev_id {
            return Err(AccountingError::Invariant(format!(
                "operation {} links to {}, expected {}",
                op.operation_id, op.operation_prev_id, prev_id
            )));
        }

        state = apply_operation(state, op.amount, op.lock_amount)?;
        if state.balance != op.balance || state.total_locked != op.total_locked {
            return Err(AccountingError::Invariant(format!(
                "operation {} stores balance={} locked={}, replay gives balance={} locked={}",
                op.operation_id, op.balance, op.total_locked, state.balance, state.total_locked
            )));
        }

        prev_id = op.operation_id;
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{OperationType, SyncType};
    use rust_decimal_macros::dec;

    fn draft(amount: Decimal, lock: Decimal) -> AccountOperationDraft {
        AccountOperationDraft::new(1, 0, OperationType::Transfer, SyncType::Sync, amount)
            .with_lock_amount(lock)
    }

    fn chain(deltas: &[(Decimal, Decimal)]) -> Vec<AccountOperation> {
        let mut ops: Vec<AccountOperation> = Vec::new();
        for (i, (amount, lock)) in deltas.iter().enumerate() {
            let op = materialize(&draft(*amount, *lock), ops.last(), i as u64 + 1, Utc::now())
                .unwrap();
            ops.push(op);
        }
        ops
    }

    #[test]
    fn test_first_operation_starts_from_zero() {
        let op = materialize(&draft(dec!(10.0), dec!(0)), None, 1, Utc::now()).unwrap();
        assert_eq!(op.operation_prev_id, 0);
        assert_eq!(op.balance, dec!(10.0));
        assert_eq!(op.total_locked, dec!(0));
    }

    #[test]
    fn test_zero_deltas_are_recorded() {
        let ops = chain(&[(dec!(5), dec!(0)), (dec!(0), dec!(0))]);
        assert_eq!(ops[1].operation_prev_id, ops[0].operation_id);
        assert_eq!(ops[1].balance, dec!(5));
    }

    #[test]
    fn test_locked_may_exceed_balance() {
        // enforcement belongs to the caller
        let ops = chain(&[(dec!(1), dec!(3))]);
        assert_eq!(BalanceState::after(ops.last()).available(), dec!(-2));
    }

    #[test]
    fn test_replay_matches_chain() {
        let ops = chain(&[
            (dec!(10.0), dec!(0)),
            (dec!(-3.0), dec!(0)),
            (dec!(0), dec!(1.0)),
            (dec!(-1.0), dec!(-1.0)),
        ]);
        let state = replay(&ops).unwrap();
        assert_eq!(state, BalanceState::new(dec!(6.0), dec!(0)));
    }

    #[test]
    fn test_replay_detects_tampering() {
        let mut ops = chain(&[(dec!(10.0), dec!(0)), (dec!(-3.0), dec!(0))]);
        ops[1].balance = dec!(8.0);
        assert!(matches!(replay(&ops), Err(AccountingError::Invariant(_))));
    }

    #[test]
    fn test_replay_detects_fork() {
        let mut ops = chain(&[(dec!(1), dec!(0)), (dec!(1), dec!(0)), (dec!(1), dec!(0))]);
        ops[2].operation_prev_id = ops[0].operation_id;
        assert!(matches!(replay(&ops), Err(AccountingError::Invariant(_))));
    }

    #[test]
    fn test_materialize_rejects_foreign_prev() {
        let prev = materialize(&draft(dec!(1), dec!(0)), None, 1, Utc::now()).unwrap();
        let mut other = draft(dec!(1), dec!(0));
        other.account_id = 2;
        assert!(materialize(&other, Some(&prev), 2, Utc::now()).is_err());
    }
}
