//! Batch Settlement
//!
//! Withdrawals bound for one network are grouped into a batch whose status
//! history is append-only, like the ledger. All writes for a network are
//! serialized under `batch-network.<network>`.

pub mod service;
pub mod types;

pub use service::{BatchService, check_update};
pub use types::{Batch, BatchInfo, BatchStatus, BatchWithdraw, BatchWithdraws, WithdrawEntry};
