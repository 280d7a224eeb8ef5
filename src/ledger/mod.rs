//! Account Ledger
//!
//! Per-account append-only operation log. Balances are never stored apart
//! from the running totals on each operation.
//!
//! ```text
//! op#1 (prev 0) ─▶ op#4 (prev 1) ─▶ op#9 (prev 4) ─▶ ...
//!   Balance[n]     = Balance[n-1]     + Amount[n]
//!   TotalLocked[n] = TotalLocked[n-1] + LockAmount[n]
//! ```
//!
//! Appends require the caller to hold `account.<id>`; reads do not.

pub mod balance;
pub mod service;
pub mod types;

pub use balance::{BalanceState, apply_operation, materialize, replay};
pub use service::Ledger;
pub use types::{AccountOperation, AccountOperationDraft, OperationType, SyncType};
