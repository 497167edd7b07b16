use async_trait::async_trait;
use chrono::Utc;
use nekoproxy_common::BlocklistEntry;
use sqlx::{Row, SqlitePool};

use crate::error::{classify, StoreResult};

#[async_trait]
pub trait BlocklistRepository: Send + Sync {
    async fn add(&self, ip: &str) -> StoreResult<BlocklistEntry>;
    async fn remove(&self, ip: &str) -> StoreResult<bool>;
    async fn list(&self) -> StoreResult<Vec<BlocklistEntry>>;
    async fn list_ips(&self) -> StoreResult<Vec<String>>;
    async fn count(&self) -> StoreResult<i64>;
    async fn max_updated_at(&self) -> StoreResult<Option<chrono::DateTime<Utc>>>;
}

pub struct SqliteBlocklistRepository {
    pool: SqlitePool,
}

impl SqliteBlocklistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlocklistRepository for SqliteBlocklistRepository {
    async fn add(&self, ip: &str) -> StoreResult<BlocklistEntry> {
        let now = Utc::now();
        let result = sqlx::query("INSERT INTO blocklist (ip, updated_at) VALUES (?1, ?2)")
            .bind(ip)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "that ip is already blocklisted"))?;
        Ok(BlocklistEntry {
            id: result.last_insert_rowid(),
            ip: ip.to_string(),
            updated_at: now,
        })
    }

    async fn remove(&self, ip: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM blocklist WHERE ip = ?1")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> StoreResult<Vec<BlocklistEntry>> {
        let rows = sqlx::query("SELECT * FROM blocklist ORDER BY id").fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(BlocklistEntry {
                    id: row.try_get("id")?,
                    ip: row.try_get("ip")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect::<sqlx::Result<_>>()
            .map_err(Into::into)
    }

    async fn list_ips(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT ip FROM blocklist ORDER BY id").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.get("ip")).collect())
    }

    async fn count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM blocklist").fetch_one(&self.pool).await?;
        Ok(row.try_get("c")?)
    }

    async fn max_updated_at(&self) -> StoreResult<Option<chrono::DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(updated_at) as m FROM blocklist").fetch_one(&self.pool).await?;
        Ok(row.try_get("m")?)
    }
}
