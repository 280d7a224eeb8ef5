//! Core types used throughout the accounting core
//!
//! Identifiers are opaque integer handles assigned by the persistence layer.
//! Zero is never a valid identifier and is rejected before any lock is taken.

/// Account ID - assigned once per (user, currency, name) triple.
///
/// Used to build the lock key `account.<AccountID>`; transfers sort two
/// account ids ascending before locking them.
pub type AccountId = u64;

/// User ID - owner of accounts.
pub type UserId = u64;

/// Operation ID - monotonic, assigned when an operation is appended.
pub type OperationId = u64;

/// Reference to an external business event (withdraw id, deposit tx, ...)
pub type ReferenceId = u64;

/// Withdraw ID
pub type WithdrawId = u64;

/// Batch ID
pub type BatchId = u64;

/// Lock key prefixes shared by every component that mutates money state.
pub mod lock_keys {
    use super::{AccountId, UserId};

    pub fn account(account_id: AccountId) -> String {
        format!("account.{}", account_id)
    }

    pub fn user(user_id: UserId) -> String {
        format!("user.{}", user_id)
    }

    pub fn batch_network(network: &str) -> String {
        format!("batch-network.{}", network)
    }

    pub fn withdraw(withdraw_id: super::WithdrawId) -> String {
        format!("withdraw.{}", withdraw_id)
    }

    pub fn bank_account(currency: &str) -> String {
        format!("bank-account.{}", currency)
    }
}

#[cfg(test)]
mod tests {
    use super::lock_keys;

    #[test]
    fn test_lock_key_format() {
        assert_eq!(lock_keys::account(42), "account.42");
        assert_eq!(lock_keys::user(7), "user.7");
        assert_eq!(
            lock_keys::batch_network("bitcoin-mainnet"),
            "batch-network.bitcoin-mainnet"
        );
        assert_eq!(lock_keys::bank_account("BTC"), "bank-account.BTC");
    }
}
