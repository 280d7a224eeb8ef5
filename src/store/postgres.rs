//! PostgreSQL store
//!
//! Runtime-checked queries only. Ledger appends run inside one transaction
//! that row-locks the touched accounts, so the stored running totals are
//! always computed against the true latest operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

use super::AccountingStore;
use crate::account::{Account, AccountStatus, Currency};
use crate::batch::{Batch, BatchInfo, BatchStatus};
use crate::core_types::{AccountId, BatchId, ReferenceId, UserId, WithdrawId};
use crate::error::{AccountingError, Result};
use crate::ledger::{AccountOperation, AccountOperationDraft, materialize};
use crate::withdraw::{Withdraw, WithdrawInfo, WithdrawStatus, WithdrawTarget};

const OPERATION_COLUMNS: &str = "operation_id, operation_prev_id, account_id, reference_id, \
     operation_type, sync_type, amount, balance, lock_amount, total_locked, timestamp";

const BATCH_INFO_COLUMNS: &str = "id, batch_id, status, network, tx_id, height, timestamp";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn last_operation_in(
        tx: &mut Transaction<'_, Postgres>,
        account_id: AccountId,
    ) -> Result<Option<AccountOperation>> {
        let sql = format!(
            "SELECT {} FROM account_operations WHERE account_id = $1 \
             ORDER BY operation_id DESC LIMIT 1",
            OPERATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(db_id(account_id)?)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(row_to_operation).transpose()
    }
}

/// Ids are `BIGINT` columns
fn db_id(id: u64) -> Result<i64> {
    i64::try_from(id)
        .map_err(|_| AccountingError::InvalidRequest(format!("id {} out of range", id)))
}

fn from_db(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| AccountingError::Database(format!("negative id {}", value)))
}

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(AccountingError::Database)
}

fn row_to_account(row: &PgRow) -> Result<Account> {
    let status: String = row.try_get("status")?;
    Ok(Account {
        account_id: from_db(row.try_get("account_id")?)?,
        user_id: from_db(row.try_get("user_id")?)?,
        currency: row.try_get("currency")?,
        name: row.try_get("name")?,
        status: parse(&status)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_operation(row: &PgRow) -> Result<AccountOperation> {
    let operation_type: String = row.try_get("operation_type")?;
    let sync_type: String = row.try_get("sync_type")?;
    Ok(AccountOperation {
        operation_id: from_db(row.try_get("operation_id")?)?,
        operation_prev_id: from_db(row.try_get("operation_prev_id")?)?,
        account_id: from_db(row.try_get("account_id")?)?,
        reference_id: from_db(row.try_get("reference_id")?)?,
        operation_type: parse(&operation_type)?,
        sync_type: parse(&sync_type)?,
        amount: row.try_get("amount")?,
        balance: row.try_get("balance")?,
        lock_amount: row.try_get("lock_amount")?,
        total_locked: row.try_get("total_locked")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn row_to_withdraw(row: &PgRow) -> Result<Withdraw> {
    Ok(Withdraw {
        withdraw_id: from_db(row.try_get("withdraw_id")?)?,
        account_id: from_db(row.try_get("account_id")?)?,
        amount: row.try_get("amount")?,
        target: WithdrawTarget {
            chain: row.try_get("chain")?,
            public_key: row.try_get("public_key")?,
        },
        timestamp: row.try_get("timestamp")?,
    })
}

fn row_to_withdraw_info(row: &PgRow) -> Result<WithdrawInfo> {
    let status: String = row.try_get("status")?;
    Ok(WithdrawInfo {
        id: from_db(row.try_get("id")?)?,
        withdraw_id: from_db(row.try_get("withdraw_id")?)?,
        status: parse(&status)?,
        data: row.try_get("data")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn row_to_batch_info(row: &PgRow) -> Result<BatchInfo> {
    let status: String = row.try_get("status")?;
    Ok(BatchInfo {
        id: from_db(row.try_get("id")?)?,
        batch_id: from_db(row.try_get("batch_id")?)?,
        status: parse(&status)?,
        network: row.try_get("network")?,
        tx_id: row.try_get("tx_id")?,
        height: row
            .try_get::<Option<i64>, _>("height")?
            .map(from_db)
            .transpose()?,
        timestamp: row.try_get("timestamp")?,
    })
}

#[async_trait]
impl AccountingStore for PgStore {
    // === Currencies ===

    async fn add_currency(&self, currency: Currency) -> Result<Currency> {
        sqlx::query(
            r#"
            INSERT INTO currencies (name, available) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET available = EXCLUDED.available
            "#,
        )
        .bind(&currency.name)
        .bind(currency.available)
        .execute(&self.pool)
        .await?;
        Ok(currency)
    }

    async fn get_currency_by_name(&self, name: &str) -> Result<Option<Currency>> {
        let row = sqlx::query("SELECT name, available FROM currencies WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Currency {
                name: row.try_get("name")?,
                available: row.try_get("available")?,
            })),
            None => Ok(None),
        }
    }

    // === Accounts ===

    async fn create_account(&self, user_id: UserId, currency: &str, name: &str) -> Result<Account> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, currency, name, status, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING account_id, user_id, currency, name, status, created_at
            "#,
        )
        .bind(db_id(user_id)?)
        .bind(currency)
        .bind(name)
        .bind(AccountStatus::Created.as_str())
        .fetch_one(&self.pool)
        .await?;

        row_to_account(&row)
    }

    async fn get_account_by_id(&self, account_id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, user_id, currency, name, status, created_at
            FROM accounts WHERE account_id = $1
            "#,
        )
        .bind(db_id(account_id)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn query_account_list(
        &self,
        user_id: UserId,
        currency: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, user_id, currency, name, status, created_at
            FROM accounts
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR currency = $2)
              AND ($3::TEXT IS NULL OR name = $3)
            ORDER BY account_id
            "#,
        )
        .bind(db_id(user_id)?)
        .bind(currency)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn get_account_status(&self, account_id: AccountId) -> Result<Option<AccountStatus>> {
        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM accounts WHERE account_id = $1",
        )
        .bind(db_id(account_id)?)
        .fetch_optional(&self.pool)
        .await?;

        status.as_deref().map(parse::<AccountStatus>).transpose()
    }

    async fn set_account_status(&self, account_id: AccountId, status: AccountStatus) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET status = $1 WHERE account_id = $2")
            .bind(status.as_str())
            .bind(db_id(account_id)?)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AccountingError::NotFound(format!("account {}", account_id)));
        }
        Ok(())
    }

    // === Ledger ===

    async fn append_account_operation(
        &self,
        draft: AccountOperationDraft,
    ) -> Result<AccountOperation> {
        let mut ops = self.append_account_operation_batch(vec![draft]).await?;
        ops.pop()
            .ok_or_else(|| AccountingError::Invariant("empty append result".to_string()))
    }

    async fn append_account_operation_batch(
        &self,
        drafts: Vec<AccountOperationDraft>,
    ) -> Result<Vec<AccountOperation>> {
        let mut tx = self.pool.begin().await?;

        // row-lock the accounts in ascending order, same order as the mutex
        let mut ids = drafts
            .iter()
            .map(|d| db_id(d.account_id))
            .collect::<Result<Vec<_>>>()?;
        ids.sort_unstable();
        ids.dedup();
        let locked = sqlx::query_scalar::<_, i64>(
            "SELECT account_id FROM accounts WHERE account_id = ANY($1) ORDER BY account_id FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;
        if locked.len() != ids.len() {
            return Err(AccountingError::NotFound(format!(
                "accounts {:?} (found {:?})",
                ids, locked
            )));
        }

        let now = Utc::now();
        let mut appended = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let prev = Self::last_operation_in(&mut tx, draft.account_id).await?;
            let mut op = materialize(draft, prev.as_ref(), 0, now)?;

            let row = sqlx::query(
                r#"
                INSERT INTO account_operations
                    (operation_prev_id, account_id, reference_id, operation_type, sync_type,
                     amount, balance, lock_amount, total_locked, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING operation_id, timestamp
                "#,
            )
            .bind(db_id(op.operation_prev_id)?)
            .bind(db_id(op.account_id)?)
            .bind(db_id(op.reference_id)?)
            .bind(op.operation_type.as_str())
            .bind(op.sync_type.as_str())
            .bind(op.amount)
            .bind(op.balance)
            .bind(op.lock_amount)
            .bind(op.total_locked)
            .bind(op.timestamp)
            .fetch_one(&mut *tx)
            .await?;

            op.operation_id = from_db(row.try_get("operation_id")?)?;
            op.timestamp = row.try_get("timestamp")?;
            appended.push(op);
        }

        tx.commit().await?;
        Ok(appended)
    }

    async fn get_last_account_operation(
        &self,
        account_id: AccountId,
    ) -> Result<Option<AccountOperation>> {
        let sql = format!(
            "SELECT {} FROM account_operations WHERE account_id = $1 \
             ORDER BY operation_id DESC LIMIT 1",
            OPERATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(db_id(account_id)?)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_operation).transpose()
    }

    async fn get_account_operation_range(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AccountOperation>> {
        let sql = format!(
            "SELECT {} FROM account_operations \
             WHERE account_id = $1 AND timestamp >= $2 AND timestamp <= $3 \
             ORDER BY operation_id",
            OPERATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(db_id(account_id)?)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_operation).collect()
    }

    async fn get_account_operations(&self, account_id: AccountId) -> Result<Vec<AccountOperation>> {
        let sql = format!(
            "SELECT {} FROM account_operations WHERE account_id = $1 ORDER BY operation_id",
            OPERATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(db_id(account_id)?)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_operation).collect()
    }

    async fn get_account_operations_by_reference(
        &self,
        account_id: AccountId,
        reference_id: ReferenceId,
    ) -> Result<Vec<AccountOperation>> {
        let sql = format!(
            "SELECT {} FROM account_operations \
             WHERE account_id = $1 AND reference_id = $2 \
             ORDER BY operation_id",
            OPERATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(db_id(account_id)?)
            .bind(db_id(reference_id)?)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_operation).collect()
    }

    // === Withdrawals ===

    async fn add_withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        target: WithdrawTarget,
    ) -> Result<Withdraw> {
        let row = sqlx::query(
            r#"
            INSERT INTO withdraws (account_id, amount, chain, public_key, timestamp)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING withdraw_id, account_id, amount, chain, public_key, timestamp
            "#,
        )
        .bind(db_id(account_id)?)
        .bind(amount)
        .bind(&target.chain)
        .bind(&target.public_key)
        .fetch_one(&self.pool)
        .await?;

        row_to_withdraw(&row)
    }

    async fn get_withdraw(&self, withdraw_id: WithdrawId) -> Result<Option<Withdraw>> {
        let row = sqlx::query(
            r#"
            SELECT withdraw_id, account_id, amount, chain, public_key, timestamp
            FROM withdraws WHERE withdraw_id = $1
            "#,
        )
        .bind(db_id(withdraw_id)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_withdraw).transpose()
    }

    async fn get_last_withdraw_info(
        &self,
        withdraw_id: WithdrawId,
    ) -> Result<Option<WithdrawInfo>> {
        let row = sqlx::query(
            r#"
            SELECT id, withdraw_id, status, data, timestamp
            FROM withdraw_infos WHERE withdraw_id = $1
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(db_id(withdraw_id)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_withdraw_info).transpose()
    }

    async fn add_withdraw_info(
        &self,
        withdraw_id: WithdrawId,
        status: WithdrawStatus,
        data: &str,
    ) -> Result<WithdrawInfo> {
        let row = sqlx::query(
            r#"
            INSERT INTO withdraw_infos (withdraw_id, status, data, timestamp)
            VALUES ($1, $2, $3, NOW())
            RETURNING id, withdraw_id, status, data, timestamp
            "#,
        )
        .bind(db_id(withdraw_id)?)
        .bind(status.as_str())
        .bind(data)
        .fetch_one(&self.pool)
        .await?;

        row_to_withdraw_info(&row)
    }

    async fn list_withdraws_by_status(
        &self,
        status: WithdrawStatus,
        limit: usize,
    ) -> Result<Vec<WithdrawId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT w.withdraw_id
            FROM withdraws w
            JOIN LATERAL (
                SELECT status FROM withdraw_infos i
                WHERE i.withdraw_id = w.withdraw_id
                ORDER BY i.id DESC LIMIT 1
            ) last ON TRUE
            WHERE last.status = $1
            ORDER BY w.withdraw_id
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        ids.into_iter().map(from_db).collect()
    }

    // === Batches ===

    async fn add_batch(&self, network: &str, withdraws: &[WithdrawId]) -> Result<Batch> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO batches (network, timestamp) VALUES ($1, NOW()) RETURNING batch_id, network, timestamp",
        )
        .bind(network)
        .fetch_one(&mut *tx)
        .await?;
        let batch = Batch {
            batch_id: from_db(row.try_get("batch_id")?)?,
            network: row.try_get("network")?,
            timestamp: row.try_get("timestamp")?,
        };

        let members = withdraws
            .iter()
            .map(|id| db_id(*id))
            .collect::<Result<Vec<_>>>()?;
        sqlx::query(
            r#"
            INSERT INTO batch_withdraws (batch_id, withdraw_id)
            SELECT $1, UNNEST($2::BIGINT[])
            "#,
        )
        .bind(db_id(batch.batch_id)?)
        .bind(&members)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(batch)
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        let row = sqlx::query("SELECT batch_id, network, timestamp FROM batches WHERE batch_id = $1")
            .bind(db_id(batch_id)?)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Batch {
                batch_id: from_db(row.try_get("batch_id")?)?,
                network: row.try_get("network")?,
                timestamp: row.try_get("timestamp")?,
            })),
            None => Ok(None),
        }
    }

    async fn get_last_batch_info(&self, batch_id: BatchId) -> Result<Option<BatchInfo>> {
        let sql = format!(
            "SELECT {} FROM batch_infos WHERE batch_id = $1 ORDER BY id DESC LIMIT 1",
            BATCH_INFO_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(db_id(batch_id)?)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_batch_info).transpose()
    }

    async fn add_batch_info(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        network: &str,
        tx_id: &str,
        height: Option<u64>,
    ) -> Result<BatchInfo> {
        let sql = format!(
            "INSERT INTO batch_infos (batch_id, status, network, tx_id, height, timestamp) \
             VALUES ($1, $2, $3, $4, $5, NOW()) RETURNING {}",
            BATCH_INFO_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(db_id(batch_id)?)
            .bind(status.as_str())
            .bind(network)
            .bind(tx_id)
            .bind(height.map(db_id).transpose()?)
            .fetch_one(&self.pool)
            .await?;

        row_to_batch_info(&row)
    }

    async fn get_batch_withdraws(&self, batch_id: BatchId) -> Result<Vec<WithdrawId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT withdraw_id FROM batch_withdraws WHERE batch_id = $1 ORDER BY withdraw_id",
        )
        .bind(db_id(batch_id)?)
        .fetch_all(&self.pool)
        .await?;

        ids.into_iter().map(from_db).collect()
    }

    async fn list_batch_infos(
        &self,
        status: BatchStatus,
        network: &str,
    ) -> Result<Vec<BatchInfo>> {
        let sql = format!(
            r#"
            SELECT {cols} FROM (
                SELECT DISTINCT ON (i.batch_id) i.*
                FROM batch_infos i
                JOIN batches b ON b.batch_id = i.batch_id
                WHERE b.network = $2
                ORDER BY i.batch_id, i.id DESC
            ) last
            WHERE last.status = $1
            ORDER BY last.batch_id
            "#,
            cols = BATCH_INFO_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(network)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_batch_info).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{OperationType, SyncType, replay};
    use crate::store::schema::init_schema;
    use crate::store::test_pool;
    use rust_decimal_macros::dec;

    async fn setup() -> PgStore {
        let pool = test_pool().await;
        init_schema(&pool).await.unwrap();
        let store = PgStore::new(pool);
        store.add_currency(Currency::new("TST")).await.unwrap();
        store
    }

    fn unique_user() -> UserId {
        (uuid::Uuid::new_v4().as_u128() >> 80) as u64
    }

    #[test]
    fn test_id_conversion_rejects_out_of_range() {
        assert_eq!(db_id(42).unwrap(), 42);
        assert!(matches!(
            db_id(u64::MAX),
            Err(AccountingError::InvalidRequest(_))
        ));
        assert_eq!(from_db(7).unwrap(), 7);
        assert!(matches!(from_db(-1), Err(AccountingError::Database(_))));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_append_chain() {
        let store = setup().await;
        let account = store
            .create_account(unique_user(), "TST", "main")
            .await
            .unwrap();

        let draft = |amount| {
            AccountOperationDraft::new(
                account.account_id,
                0,
                OperationType::Deposit,
                SyncType::Sync,
                amount,
            )
        };
        store.append_account_operation(draft(dec!(10))).await.unwrap();
        let ops = store
            .append_account_operation_batch(vec![draft(dec!(-2)), draft(dec!(-3))])
            .await
            .unwrap();
        assert_eq!(ops[1].operation_prev_id, ops[0].operation_id);
        assert_eq!(ops[1].balance, dec!(5));

        let history = store
            .get_account_operation_range(
                account.account_id,
                Utc::now() - chrono::Duration::hours(1),
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(replay(&history).unwrap().balance, dec!(5));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_batch_rolls_back_on_unknown_account() {
        let store = setup().await;
        let account = store
            .create_account(unique_user(), "TST", "main")
            .await
            .unwrap();

        let ok = AccountOperationDraft::new(
            account.account_id,
            0,
            OperationType::Deposit,
            SyncType::Sync,
            dec!(1),
        );
        let mut bad = ok.clone();
        bad.account_id = i64::MAX as u64;

        assert!(store.append_account_operation_batch(vec![ok, bad]).await.is_err());
        assert!(
            store
                .get_last_account_operation(account.account_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_latest_batch_info() {
        let store = setup().await;
        let network = format!("net-{}", uuid::Uuid::new_v4());
        let batch = store.add_batch(&network, &[]).await.unwrap();
        store
            .add_batch_info(batch.batch_id, BatchStatus::Ready, &network, "", None)
            .await
            .unwrap();
        store
            .add_batch_info(batch.batch_id, BatchStatus::Processing, &network, "", None)
            .await
            .unwrap();

        let ready = store.list_batch_infos(BatchStatus::Ready, &network).await.unwrap();
        assert!(ready.is_empty());
        let processing = store
            .list_batch_infos(BatchStatus::Processing, &network)
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
    }
}
