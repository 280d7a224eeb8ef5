//! Accounts
//!
//! One account per (user, currency, name). Creation is idempotent and
//! serialized per user; status changes follow [`AccountStatus::can_transition_to`].

pub mod models;
pub mod service;

pub use models::{Account, AccountStatus, Currency};
pub use service::AccountService;
