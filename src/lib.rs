//! Accounting Core
//!
//! Append-only account ledger with distributed locking, two-phase transfers,
//! withdrawals and batch settlement.
//!
//! # Modules
//!
//! - [`lock`] - Distributed mutex (named, TTL-bounded locks)
//! - [`guard`] - Idempotent single-call guard (lock + counter)
//! - [`ledger`] - Per-account operation chain and running balances
//! - [`transfer`] - Sync and two-phase transfers between accounts
//! - [`withdraw`] - Withdrawal lifecycle on top of the transfer engine
//! - [`batch`] - Network batches and their status machine
//! - [`store`] - Persistence interface with PostgreSQL and in-memory backends
//! - [`messaging`] - Subject-based request/response dispatch

// Core types - must be first!
pub mod core_types;
pub mod error;

pub mod account;
pub mod accounting;
pub mod batch;
pub mod config;
pub mod db;
pub mod guard;
pub mod ledger;
pub mod lock;
pub mod logging;
pub mod messaging;
pub mod store;
pub mod transfer;
pub mod withdraw;

// Convenient re-exports at crate root
pub use accounting::Accounting;
pub use core_types::{AccountId, BatchId, OperationId, ReferenceId, UserId, WithdrawId};
pub use error::{AccountingError, ErrorKind, Result};
pub use ledger::{AccountOperation, AccountOperationDraft, BalanceState, OperationType, SyncType};
pub use lock::{DistributedMutex, LockHandle};
pub use messaging::Dispatcher;
