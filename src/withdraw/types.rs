//! Withdrawal Types
//!
//! A `Withdraw` row never changes. Its status lives in an append-only list of
//! `WithdrawInfo` records; the latest one is the current status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core_types::{AccountId, WithdrawId};

/// Withdrawal status
///
/// ```text
/// CREATED ──▶ PROCESSING ──▶ SETTLED
///    │
///    └──────▶ CANCELING ───▶ CANCELED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawStatus {
    Created,
    Canceling,
    Canceled,
    Processing,
    Settled,
}

impl WithdrawStatus {
    /// Forward edges only, no state is skipped
    pub fn can_transition_to(&self, next: WithdrawStatus) -> bool {
        use WithdrawStatus::*;
        matches!(
            (self, next),
            (Created, Canceling)
                | (Canceling, Canceled)
                | (Created, Processing)
                | (Processing, Settled)
        )
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawStatus::Canceled | WithdrawStatus::Settled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawStatus::Created => "created",
            WithdrawStatus::Canceling => "canceling",
            WithdrawStatus::Canceled => "canceled",
            WithdrawStatus::Processing => "processing",
            WithdrawStatus::Settled => "settled",
        }
    }
}

impl fmt::Display for WithdrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(WithdrawStatus::Created),
            "canceling" => Ok(WithdrawStatus::Canceling),
            "canceled" => Ok(WithdrawStatus::Canceled),
            "processing" => Ok(WithdrawStatus::Processing),
            "settled" => Ok(WithdrawStatus::Settled),
            _ => Err(format!("Invalid withdraw status: {}", s)),
        }
    }
}

/// Where the funds go on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawTarget {
    pub chain: String,
    pub public_key: String,
}

/// Withdrawal request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub withdraw_id: WithdrawId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub target: WithdrawTarget,
    pub timestamp: DateTime<Utc>,
}

/// One status record of a withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawInfo {
    pub id: u64,
    pub withdraw_id: WithdrawId,
    pub status: WithdrawStatus,
    /// Free-form payload (cancel reason, batch id, ...)
    pub data: String,
    pub timestamp: DateTime<Utc>,
}
