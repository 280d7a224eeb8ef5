//! PostgreSQL lock backend
//!
//! One row per held key in `accounting_locks`. Acquisition is an atomic
//! insert-or-steal-if-expired; release deletes only the caller's own row.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::LockService;
use crate::error::{AccountingError, Result};

pub struct PgLockService {
    pool: PgPool,
}

impl PgLockService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete rows whose TTL has passed. Acquisition does not depend on this,
    /// it only keeps the table small.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM accounting_locks WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LockService for PgLockService {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| AccountingError::InvalidRequest(format!("lock ttl {:?}", ttl)))?;
        let result = sqlx::query(
            r#"
            INSERT INTO accounting_locks (lock_key, token, expires_at)
            VALUES ($1, $2, NOW() + ($3::BIGINT * INTERVAL '1 millisecond'))
            ON CONFLICT (lock_key) DO UPDATE
                SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
                WHERE accounting_locks.expires_at < NOW()
            "#,
        )
        .bind(key)
        .bind(token)
        .bind(ttl_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, key: &str, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM accounting_locks WHERE lock_key = $1 AND token = $2")
            .bind(key)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::init_schema;
    use crate::store::test_pool;

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_lock_exclusive() {
        let pool = test_pool().await;
        init_schema(&pool).await.unwrap();
        let service = PgLockService::new(pool);
        let ttl = Duration::from_secs(5);
        let key = format!("test.{}", uuid::Uuid::new_v4());

        assert!(service.try_acquire(&key, "a", ttl).await.unwrap());
        assert!(!service.try_acquire(&key, "b", ttl).await.unwrap());
        service.release(&key, "b").await.unwrap();
        assert!(!service.try_acquire(&key, "b", ttl).await.unwrap());
        service.release(&key, "a").await.unwrap();
        assert!(service.try_acquire(&key, "b", ttl).await.unwrap());
        service.release(&key, "b").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_lock_expiry() {
        let pool = test_pool().await;
        init_schema(&pool).await.unwrap();
        let service = PgLockService::new(pool);
        let key = format!("test.{}", uuid::Uuid::new_v4());

        assert!(
            service
                .try_acquire(&key, "a", Duration::from_millis(100))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(service.try_acquire(&key, "b", Duration::from_secs(5)).await.unwrap());
        service.release(&key, "b").await.unwrap();
        service.purge_expired().await.unwrap();
    }
}
