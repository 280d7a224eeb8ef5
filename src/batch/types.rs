//! Batch Withdraw Types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core_types::{AccountId, BatchId, WithdrawId};

/// Batch status
///
/// ```text
/// READY ──(tx_id = "")──▶ PROCESSING ──(tx_id != "", height?)──▶ COMPLETE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Ready,
    Processing,
    Complete,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Ready => "ready",
            BatchStatus::Processing => "processing",
            BatchStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(BatchStatus::Ready),
            "processing" => Ok(BatchStatus::Processing),
            "complete" => Ok(BatchStatus::Complete),
            _ => Err(format!("Invalid batch status: {}", s)),
        }
    }
}

/// Batch row, immutable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub network: String,
    pub timestamp: DateTime<Utc>,
}

/// One status record of a batch. The latest one is the current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub id: u64,
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub network: String,
    /// Empty until the transaction is known
    pub tx_id: String,
    pub height: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Member of a batch, resolved from its withdraw record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawEntry {
    pub withdraw_id: WithdrawId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub chain: String,
    pub public_key: String,
}

/// Fully resolved batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWithdraw {
    pub batch_id: BatchId,
    pub network: String,
    pub status: BatchStatus,
    pub tx_id: String,
    pub height: Option<u64>,
    pub bank_account_id: AccountId,
    pub withdraws: Vec<WithdrawEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWithdraws {
    pub batches: Vec<BatchWithdraw>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_names() {
        assert_eq!(BatchStatus::Processing.to_string(), "processing");
        assert_eq!("complete".parse::<BatchStatus>(), Ok(BatchStatus::Complete));
        assert!("confirmed".parse::<BatchStatus>().is_err());
    }
}
