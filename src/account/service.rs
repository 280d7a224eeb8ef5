use std::sync::Arc;
use tracing::{info, warn};

use super::models::{Account, AccountStatus};
use crate::core_types::{AccountId, UserId, lock_keys};
use crate::error::{AccountingError, Result};
use crate::lock::DistributedMutex;
use crate::store::AccountingStore;

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountingStore>,
    mutex: DistributedMutex,
}

impl AccountService {
    pub fn new(store: Arc<dyn AccountingStore>, mutex: DistributedMutex) -> Self {
        Self { store, mutex }
    }

    /// Create the `(user, currency, name)` account, or return it if it exists.
    pub async fn create_account(
        &self,
        user_id: UserId,
        currency: &str,
        name: &str,
    ) -> Result<Account> {
        if user_id == 0 {
            return Err(AccountingError::InvalidRequest(
                "user id must be non-zero".to_string(),
            ));
        }
        if name.is_empty() {
            return Err(AccountingError::InvalidRequest(
                "account name is empty".to_string(),
            ));
        }
        match self.store.get_currency_by_name(currency).await? {
            Some(c) if c.available => {}
            _ => return Err(AccountingError::InvalidCurrency(currency.to_string())),
        }

        let handle = self.mutex.lock(&lock_keys::user(user_id)).await?;
        let result = self.find_or_create(user_id, currency, name).await;
        if let Err(e) = handle.unlock().await {
            warn!(user_id, error = %e, "User lock release failed");
        }
        result
    }

    async fn find_or_create(&self, user_id: UserId, currency: &str, name: &str) -> Result<Account> {
        let existing = self
            .store
            .query_account_list(user_id, Some(currency), Some(name))
            .await?;
        if let Some(account) = existing.into_iter().next() {
            return Ok(account);
        }

        let account = self.store.create_account(user_id, currency, name).await?;
        info!(
            account_id = account.account_id,
            user_id,
            currency = %currency,
            name = %name,
            "Account created"
        );
        Ok(account)
    }

    /// Fetch an existing account, `InvalidAccountId` otherwise
    pub async fn get_account(&self, account_id: AccountId) -> Result<Account> {
        if account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }
        self.store
            .get_account_by_id(account_id)
            .await?
            .ok_or(AccountingError::InvalidAccountId)
    }

    pub async fn get_status(&self, account_id: AccountId) -> Result<AccountStatus> {
        if account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }
        self.store
            .get_account_status(account_id)
            .await?
            .ok_or(AccountingError::InvalidAccountId)
    }

    /// Move the account to `status`. Setting the current status again succeeds
    /// without writing. The status is read under `account.<id>`, the same key
    /// ledger appends take.
    pub async fn set_status(&self, account_id: AccountId, status: AccountStatus) -> Result<()> {
        if account_id == 0 {
            return Err(AccountingError::InvalidAccountId);
        }

        let handle = self.mutex.lock(&lock_keys::account(account_id)).await?;
        let result = self.transition(account_id, status).await;
        if let Err(e) = handle.unlock().await {
            warn!(account_id, error = %e, "Account lock release failed");
        }

        if let Some(current) = result? {
            info!(account_id, from = %current, to = %status, "Account status changed");
        }
        Ok(())
    }

    /// Check and write the transition, `None` when nothing changed. Caller
    /// holds `account.<id>`.
    async fn transition(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> Result<Option<AccountStatus>> {
        let current = self.get_status(account_id).await?;
        if current == status {
            return Ok(None);
        }
        if !current.can_transition_to(status) {
            return Err(AccountingError::InvalidTransition(format!(
                "account {}: {} -> {}",
                account_id, current, status
            )));
        }
        self.store.set_account_status(account_id, status).await?;
        Ok(Some(current))
    }
}
