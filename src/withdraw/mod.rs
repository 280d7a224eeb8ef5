//! Withdrawal Lifecycle
//!
//! Moves funds from a user account to the bank liability account of the same
//! currency with the two-phase transfer protocol.
//!
//! ```text
//! add_withdraw ──▶ CREATED  (async-start: user funds reserved, bank credited+locked)
//!                    │
//!     mark_processing│             cancel_withdraw
//!                    ▼                   ▼
//!               PROCESSING           CANCELING
//!                    │                   │ finalize_cancel (worker)
//!     settle_withdraw│                   ▼
//!                    ▼               CANCELED (reservation reverted)
//!                 SETTLED  (async-end: user debited, bank lock released)
//! ```
//!
//! Every async-start written here is closed by exactly one async-end, by
//! `settle_withdraw` or by `finalize_cancel`. Status changes are serialized
//! per withdrawal under `withdraw.<id>`.

pub mod bank;
pub mod service;
pub mod types;
pub mod worker;

pub use bank::BankAccounts;
pub use service::WithdrawService;
pub use types::{Withdraw, WithdrawInfo, WithdrawStatus, WithdrawTarget};
pub use worker::{SettlementWorker, WorkerConfig};
