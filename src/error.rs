//! Accounting Error Types
//!
//! One error enum for the whole core. Every variant belongs to exactly one
//! [`ErrorKind`] so callers can tell validation failures from lock contention,
//! state-machine violations, persistence failures and broken invariants.

use thiserror::Error;

/// Error category, used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, detected before any lock is taken. Never retried.
    Validation,
    /// Failed to acquire a distributed lock. Safe to retry with backoff.
    Contention,
    /// Invalid withdraw/batch status transition. Logic error, not retried.
    StateMachine,
    /// Storage failure, propagated unchanged.
    Persistence,
    /// A produced result violates a core invariant. Nothing was committed.
    Invariant,
}

/// Accounting error types
#[derive(Error, Debug, Clone)]
pub enum AccountingError {
    // === Validation Errors ===
    #[error("Invalid account id")]
    InvalidAccountId,

    #[error("Invalid account operation: {0}")]
    InvalidAccountOperation(String),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Insufficient available balance")]
    InsufficientFunds,

    #[error("Invalid withdraw id")]
    InvalidWithdrawId,

    #[error("Invalid batch id")]
    InvalidBatchId,

    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed message: {0}")]
    Codec(String),

    // === Lock Errors ===
    #[error("Failed to acquire lock {key} after {attempts} attempts")]
    LockAcquisition { key: String, attempts: u32 },

    #[error("Lock {0} is not held by this handle")]
    LockNotHeld(String),

    // === State Machine Errors ===
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    // === Persistence Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    // === Invariant Errors ===
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl AccountingError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountingError::InvalidAccountId
            | AccountingError::InvalidAccountOperation(_)
            | AccountingError::InvalidCurrency(_)
            | AccountingError::InvalidAmount
            | AccountingError::InsufficientFunds
            | AccountingError::InvalidWithdrawId
            | AccountingError::InvalidBatchId
            | AccountingError::InvalidTransactionId(_)
            | AccountingError::InvalidRequest(_)
            | AccountingError::Codec(_) => ErrorKind::Validation,
            AccountingError::LockAcquisition { .. } => ErrorKind::Contention,
            AccountingError::InvalidTransition(_) => ErrorKind::StateMachine,
            AccountingError::Database(_) | AccountingError::NotFound(_) => ErrorKind::Persistence,
            AccountingError::LockNotHeld(_) | AccountingError::Invariant(_) => {
                ErrorKind::Invariant
            }
        }
    }

    /// Only lock contention is worth retrying automatically.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccountingError::LockAcquisition { .. })
    }

    /// Get the error code for responses
    pub fn code(&self) -> &'static str {
        match self {
            AccountingError::InvalidAccountId => "INVALID_ACCOUNT_ID",
            AccountingError::InvalidAccountOperation(_) => "INVALID_ACCOUNT_OPERATION",
            AccountingError::InvalidCurrency(_) => "INVALID_CURRENCY",
            AccountingError::InvalidAmount => "INVALID_AMOUNT",
            AccountingError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            AccountingError::InvalidWithdrawId => "INVALID_WITHDRAW_ID",
            AccountingError::InvalidBatchId => "INVALID_BATCH_ID",
            AccountingError::InvalidTransactionId(_) => "INVALID_TRANSACTION_ID",
            AccountingError::InvalidRequest(_) => "INVALID_REQUEST",
            AccountingError::Codec(_) => "MALFORMED_MESSAGE",
            AccountingError::LockAcquisition { .. } => "LOCK_FAILED",
            AccountingError::LockNotHeld(_) => "LOCK_NOT_HELD",
            AccountingError::InvalidTransition(_) => "INTERNAL_ERROR",
            AccountingError::Database(_) => "DATABASE_ERROR",
            AccountingError::NotFound(_) => "NOT_FOUND",
            AccountingError::Invariant(_) => "INVARIANT_VIOLATION",
        }
    }
}

impl From<sqlx::Error> for AccountingError {
    fn from(e: sqlx::Error) -> Self {
        AccountingError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AccountingError {
    fn from(e: serde_json::Error) -> Self {
        AccountingError::Codec(e.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, AccountingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AccountingError::InvalidAccountId.code(), "INVALID_ACCOUNT_ID");
        assert_eq!(
            AccountingError::InvalidTransition("created -> settled".into()).code(),
            "INTERNAL_ERROR"
        );
        assert_eq!(
            AccountingError::LockAcquisition {
                key: "account.1".into(),
                attempts: 3
            }
            .code(),
            "LOCK_FAILED"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AccountingError::InvalidAmount.kind(), ErrorKind::Validation);
        assert_eq!(
            AccountingError::InvalidTransition("x".into()).kind(),
            ErrorKind::StateMachine
        );
        assert_eq!(
            AccountingError::Database("down".into()).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(
            AccountingError::Invariant("one entry".into()).kind(),
            ErrorKind::Invariant
        );
    }

    #[test]
    fn test_only_contention_is_retryable() {
        let lock = AccountingError::LockAcquisition {
            key: "account.1".into(),
            attempts: 10,
        };
        assert!(lock.is_retryable());
        assert!(!AccountingError::InvalidAmount.is_retryable());
        assert!(!AccountingError::Database("x".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = AccountingError::LockAcquisition {
            key: "account.7".into(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "Failed to acquire lock account.7 after 5 attempts"
        );
    }
}
