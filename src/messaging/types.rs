//! Request and response bodies of the messaging boundary

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::batch::BatchStatus;
use crate::core_types::{AccountId, BatchId, UserId, WithdrawId};
use crate::ledger::{AccountOperation, AccountOperationDraft, BalanceState};
use crate::withdraw::WithdrawTarget;

/// Envelope of every reply. `code` is `"OK"` or an error code, `data` is
/// only present on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Reply<T> {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Reply<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "OK".to_string(),
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == "OK"
    }
}

impl Reply<()> {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: UserId,
    pub currency: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub operation: AccountOperationDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub account_id: AccountId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub account_id: AccountId,
    pub operations: Vec<AccountOperation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub account_id: AccountId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account_id: AccountId,
    pub balance: Decimal,
    pub total_locked: Decimal,
    pub available: Decimal,
}

impl BalanceResponse {
    pub fn new(account_id: AccountId, state: BalanceState) -> Self {
        Self {
            account_id,
            balance: state.balance,
            total_locked: state.total_locked,
            available: state.available(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source: AccountOperationDraft,
    pub destination: AccountOperationDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferWithdrawRequest {
    pub source: AccountOperationDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddWithdrawRequest {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub target: WithdrawTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelWithdrawRequest {
    pub withdraw_id: WithdrawId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBatchesRequest {
    pub status: BatchStatus,
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatchRequest {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    #[serde(default)]
    pub tx_id: String,
    #[serde(default)]
    pub height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatchResponse {
    pub batch_id: BatchId,
    pub status: BatchStatus,
}
