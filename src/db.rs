use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{entry_size, KvStore, Partition};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed store. Each `(partition, key)` pair is one row holding
/// the serialized JSON value.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for PgStore {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query(
            "SELECT value FROM sidecar.kv_entries WHERE partition = $1 AND key = $2",
        )
        .bind(partition.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row.get("value");
        let value = serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(value))
    }

    async fn set(&self, partition: Partition, key: &str, value: Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(&value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;

        let mut tx = self.pool.begin().await?;
        let others: i64 = sqlx::query(
            r#"
            SELECT COALESCE(SUM(octet_length(key) + octet_length(value)), 0)::BIGINT AS used
            FROM sidecar.kv_entries
            WHERE partition = $1 AND key <> $2
            "#,
        )
        .bind(partition.as_str())
        .bind(key)
        .fetch_one(&mut *tx)
        .await?
        .get("used");

        let required = others.max(0) as u64 + entry_size(key, &text);
        let quota = self.quota(partition);
        if required > quota {
            return Err(StoreError::QuotaExceeded {
                partition,
                required,
                quota,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO sidecar.kv_entries (partition, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (partition, key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(partition.as_str())
        .bind(key)
        .bind(&text)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(%partition, key, bytes = text.len(), "postgres store set");
        Ok(())
    }

    async fn clear(&self, partition: Partition) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sidecar.kv_entries WHERE partition = $1")
            .bind(partition.as_str())
            .execute(&self.pool)
            .await?;
        debug!(%partition, removed = result.rows_affected(), "postgres store cleared");
        Ok(())
    }

    async fn bytes_in_use(&self, partition: Partition) -> Result<u64, StoreError> {
        let used: i64 = sqlx::query(
            r#"
            SELECT COALESCE(SUM(octet_length(key) + octet_length(value)), 0)::BIGINT AS used
            FROM sidecar.kv_entries
            WHERE partition = $1
            "#,
        )
        .bind(partition.as_str())
        .fetch_one(&self.pool)
        .await?
        .get("used");
        Ok(used.max(0) as u64)
    }

    fn quota(&self, partition: Partition) -> u64 {
        partition.default_quota()
    }
}
