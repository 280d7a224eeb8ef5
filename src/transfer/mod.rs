//! Transfer Engine
//!
//! Moves funds between two accounts of the same currency by writing one
//! correlated pair of ledger entries under both account locks.
//!
//! # Two-phase protocol
//!
//! ```text
//!                 source               destination
//!              Amount  Lock          Amount  Lock
//! sync           -X      0             +X      0
//! async-start     0     +X             +X     +X
//! async-end      -X     -X              0     -X
//! ```
//!
//! `X` is the destination amount supplied by the caller. A start/end pair
//! nets to `-X` on the source and `+X` on the destination with both locked
//! totals back where they were. A canceled start is undone by
//! [`TransferEngine::revert`], which releases both reservations and takes the
//! provisional credit back from the destination.
//!
//! # Safety Invariants
//!
//! 1. **Canonical lock order**: both account locks are taken in ascending
//!    account id order, whatever the call-site order
//! 2. **Pair or nothing**: both entries go through one store batch; anything
//!    other than exactly two operations fails the transfer
//! 3. **Validate before locking**: type, amount, account and currency checks
//!    never hold a lock

pub mod engine;

pub use engine::{TransferEngine, TransferResult, derive_entries, derive_reversal};
