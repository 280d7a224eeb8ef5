//! PostgreSQL counters, shared by every service instance

use async_trait::async_trait;
use sqlx::PgPool;

use super::CounterStore;
use crate::error::Result;

pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn get(&self, name: &str) -> Result<i64> {
        let value = sqlx::query_scalar::<_, i64>(
            "SELECT value FROM accounting_counters WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.unwrap_or(0))
    }

    async fn reset(&self, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounting_counters (name, value) VALUES ($1, 0)
            ON CONFLICT (name) DO UPDATE SET value = 0
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment(&self, name: &str) -> Result<i64> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO accounting_counters (name, value) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = accounting_counters.value + 1
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }
}
