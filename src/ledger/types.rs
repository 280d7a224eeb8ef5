//! Ledger Types
//!
//! Operation records are immutable once appended. A draft carries what the
//! caller decides (account, reference, type, deltas); ids and running totals
//! are assigned at append time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core_types::{AccountId, OperationId, ReferenceId};

/// What caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    Deposit,
    Withdraw,
    Transfer,
    TransferFee,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Deposit => "deposit",
            OperationType::Withdraw => "withdraw",
            OperationType::Transfer => "transfer",
            OperationType::TransferFee => "transfer-fee",
        }
    }

    /// Only transfer types may be used for the destination of a transfer
    #[inline]
    pub fn is_transfer(&self) -> bool {
        matches!(self, OperationType::Transfer | OperationType::TransferFee)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(OperationType::Deposit),
            "withdraw" => Ok(OperationType::Withdraw),
            "transfer" => Ok(OperationType::Transfer),
            "transfer-fee" => Ok(OperationType::TransferFee),
            _ => Err(format!("Invalid operation type: {}", s)),
        }
    }
}

/// Phase of the transfer protocol an entry belongs to
///
/// ```text
/// sync         one step, funds move immediately
/// async-start  reserve: TotalLocked grows, nothing is movable yet
/// async-end    finalize: reservation released (and source debited)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncType {
    Sync,
    AsyncStart,
    AsyncEnd,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Sync => "sync",
            SyncType::AsyncStart => "async-start",
            SyncType::AsyncEnd => "async-end",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(SyncType::Sync),
            "async-start" => Ok(SyncType::AsyncStart),
            "async-end" => Ok(SyncType::AsyncEnd),
            _ => Err(format!("Invalid synchroneous type: {}", s)),
        }
    }
}

/// Operation before it is appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOperationDraft {
    pub account_id: AccountId,
    pub reference_id: ReferenceId,
    pub operation_type: OperationType,
    pub sync_type: SyncType,
    /// Signed delta applied to the balance
    pub amount: Decimal,
    /// Signed delta applied to the locked amount
    #[serde(default)]
    pub lock_amount: Decimal,
    /// Defaults to the append time
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AccountOperationDraft {
    pub fn new(
        account_id: AccountId,
        reference_id: ReferenceId,
        operation_type: OperationType,
        sync_type: SyncType,
        amount: Decimal,
    ) -> Self {
        Self {
            account_id,
            reference_id,
            operation_type,
            sync_type,
            amount,
            lock_amount: Decimal::ZERO,
            timestamp: None,
        }
    }

    pub fn with_lock_amount(mut self, lock_amount: Decimal) -> Self {
        self.lock_amount = lock_amount;
        self
    }
}

/// Appended, immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOperation {
    pub operation_id: OperationId,
    /// Previous operation on the same account, zero for the first one
    pub operation_prev_id: OperationId,
    pub account_id: AccountId,
    pub reference_id: ReferenceId,
    pub operation_type: OperationType,
    pub sync_type: SyncType,
    pub amount: Decimal,
    /// Running balance after this operation
    pub balance: Decimal,
    pub lock_amount: Decimal,
    /// Running locked amount after this operation
    pub total_locked: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for AccountOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Operation[{}<-{}] account={} ref={} {}/{} amount={} balance={} lock={} locked={}",
            self.operation_id,
            self.operation_prev_id,
            self.account_id,
            self.reference_id,
            self.operation_type,
            self.sync_type,
            self.amount,
            self.balance,
            self.lock_amount,
            self.total_locked
        )
    }
}
