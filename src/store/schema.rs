//! PostgreSQL schema
//!
//! Idempotent DDL, run once at startup before any backend is used.

use sqlx::PgPool;

use crate::error::Result;

const CREATE_LOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounting_locks (
    lock_key   TEXT PRIMARY KEY,
    token      TEXT NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
)"#;

const CREATE_COUNTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounting_counters (
    name  TEXT PRIMARY KEY,
    value BIGINT NOT NULL DEFAULT 0
)"#;

const CREATE_CURRENCIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS currencies (
    name      TEXT PRIMARY KEY,
    available BOOLEAN NOT NULL DEFAULT TRUE
)"#;

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id BIGSERIAL PRIMARY KEY,
    user_id    BIGINT NOT NULL,
    currency   TEXT NOT NULL REFERENCES currencies (name),
    name       TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'created',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, currency, name)
)"#;

// (account_id, operation_prev_id) unique: a chain can never fork
const CREATE_OPERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS account_operations (
    operation_id      BIGSERIAL PRIMARY KEY,
    operation_prev_id BIGINT NOT NULL,
    account_id        BIGINT NOT NULL REFERENCES accounts (account_id),
    reference_id      BIGINT NOT NULL DEFAULT 0,
    operation_type    TEXT NOT NULL,
    sync_type         TEXT NOT NULL,
    amount            NUMERIC NOT NULL,
    balance           NUMERIC NOT NULL,
    lock_amount       NUMERIC NOT NULL,
    total_locked      NUMERIC NOT NULL,
    timestamp         TIMESTAMPTZ NOT NULL,
    UNIQUE (account_id, operation_prev_id)
)"#;

const CREATE_OPERATIONS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_account_operations_ts
    ON account_operations (account_id, timestamp)"#;

const CREATE_OPERATIONS_REFERENCE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_account_operations_ref
    ON account_operations (account_id, reference_id)"#;

const CREATE_WITHDRAWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS withdraws (
    withdraw_id BIGSERIAL PRIMARY KEY,
    account_id  BIGINT NOT NULL REFERENCES accounts (account_id),
    amount      NUMERIC NOT NULL,
    chain       TEXT NOT NULL,
    public_key  TEXT NOT NULL,
    timestamp   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_WITHDRAW_INFOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS withdraw_infos (
    id          BIGSERIAL PRIMARY KEY,
    withdraw_id BIGINT NOT NULL REFERENCES withdraws (withdraw_id),
    status      TEXT NOT NULL,
    data        TEXT NOT NULL DEFAULT '',
    timestamp   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_WITHDRAW_INFOS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_withdraw_infos_withdraw
    ON withdraw_infos (withdraw_id, id DESC)"#;

const CREATE_BATCHES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    batch_id  BIGSERIAL PRIMARY KEY,
    network   TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_BATCH_WITHDRAWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS batch_withdraws (
    batch_id    BIGINT NOT NULL REFERENCES batches (batch_id),
    withdraw_id BIGINT NOT NULL REFERENCES withdraws (withdraw_id),
    PRIMARY KEY (batch_id, withdraw_id)
)"#;

const CREATE_BATCH_INFOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS batch_infos (
    id        BIGSERIAL PRIMARY KEY,
    batch_id  BIGINT NOT NULL REFERENCES batches (batch_id),
    status    TEXT NOT NULL,
    network   TEXT NOT NULL,
    tx_id     TEXT NOT NULL DEFAULT '',
    height    BIGINT,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_BATCH_INFOS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_batch_infos_batch
    ON batch_infos (batch_id, id DESC)"#;

const STATEMENTS: &[(&str, &str)] = &[
    ("accounting_locks", CREATE_LOCKS_TABLE),
    ("accounting_counters", CREATE_COUNTERS_TABLE),
    ("currencies", CREATE_CURRENCIES_TABLE),
    ("accounts", CREATE_ACCOUNTS_TABLE),
    ("account_operations", CREATE_OPERATIONS_TABLE),
    ("idx_account_operations_ts", CREATE_OPERATIONS_INDEX),
    ("idx_account_operations_ref", CREATE_OPERATIONS_REFERENCE_INDEX),
    ("withdraws", CREATE_WITHDRAWS_TABLE),
    ("withdraw_infos", CREATE_WITHDRAW_INFOS_TABLE),
    ("idx_withdraw_infos_withdraw", CREATE_WITHDRAW_INFOS_INDEX),
    ("batches", CREATE_BATCHES_TABLE),
    ("batch_withdraws", CREATE_BATCH_WITHDRAWS_TABLE),
    ("batch_infos", CREATE_BATCH_INFOS_TABLE),
    ("idx_batch_infos_batch", CREATE_BATCH_INFOS_INDEX),
];

/// Create every table the accounting core needs
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing accounting schema...");

    for (name, sql) in STATEMENTS {
        sqlx::query(*sql).execute(pool).await.map_err(|e| {
            tracing::error!(object = %name, error = %e, "Failed to create schema object");
            e
        })?;
    }

    tracing::info!("Accounting schema ready ({} objects)", STATEMENTS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_init_schema_is_idempotent() {
        let pool = test_pool().await;
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
