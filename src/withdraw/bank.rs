//! Bank liability accounts, one per currency, created on first use

use std::sync::Arc;
use tracing::info;

use crate::account::{Account, AccountService};
use crate::core_types::{UserId, lock_keys};
use crate::error::{AccountingError, Result};
use crate::guard::SingleCallGuard;
use crate::store::AccountingStore;

#[derive(Clone)]
pub struct BankAccounts {
    store: Arc<dyn AccountingStore>,
    accounts: AccountService,
    guard: SingleCallGuard,
    bank_user_id: UserId,
    account_name: String,
}

impl BankAccounts {
    pub fn new(
        store: Arc<dyn AccountingStore>,
        accounts: AccountService,
        guard: SingleCallGuard,
        bank_user_id: UserId,
        account_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            accounts,
            guard,
            bank_user_id,
            account_name: account_name.into(),
        }
    }

    pub fn bank_user_id(&self) -> UserId {
        self.bank_user_id
    }

    /// Existing bank account for `currency`, if any
    pub async fn find(&self, currency: &str) -> Result<Option<Account>> {
        let accounts = self
            .store
            .query_account_list(self.bank_user_id, Some(currency), Some(&self.account_name))
            .await?;
        Ok(accounts.into_iter().next())
    }

    /// Bank account for `currency`, created once even when first uses race
    pub async fn resolve(&self, currency: &str) -> Result<Account> {
        if let Some(account) = self.find(currency).await? {
            return Ok(account);
        }

        let outcome = self
            .guard
            .execute_once(&lock_keys::bank_account(currency), || async {
                let account = self
                    .accounts
                    .create_account(self.bank_user_id, currency, &self.account_name)
                    .await?;
                info!(
                    account_id = account.account_id,
                    currency = %currency,
                    "Bank liability account created"
                );
                Ok(())
            })
            .await?;

        // a skipped call means a concurrent caller created it under the guard
        self.find(currency).await?.ok_or_else(|| {
            AccountingError::InvalidAccountOperation(format!(
                "bank account for {} unavailable ({:?})",
                currency, outcome
            ))
        })
    }
}
