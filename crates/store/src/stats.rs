use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nekoproxy_common::{ConnectionStat, ConnectionStatus};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::StoreResult;

/// One row ready to insert: the store has already applied the agent's
/// "coerce ISO-string, default to now on parse failure" rule, so this is a
/// plain append with no further validation.
#[derive(Debug, Clone)]
pub struct NewConnectionStat {
    pub agent_id: i64,
    pub service_id: Option<i64>,
    pub client_ip: String,
    pub status: ConnectionStatus,
    pub duration: Option<f64>,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSummary {
    pub total_connections: i64,
    pub blocked_connections: i64,
    pub total_bytes_sent: i64,
    pub total_bytes_received: i64,
}

#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Inserts the whole batch in one transaction.
    async fn add_batch(&self, stats: &[NewConnectionStat]) -> StoreResult<()>;

    /// Aggregates stats recorded in the last `hours` hours.
    async fn summary(&self, hours: i64) -> StoreResult<StatsSummary>;

    /// Deletes stats older than `retention_days`; returns the row count removed.
    async fn cleanup_old(&self, retention_days: i64) -> StoreResult<u64>;
}

pub struct SqliteStatsRepository {
    pool: SqlitePool,
}

impl SqliteStatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn status_str(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Completed => "completed",
        ConnectionStatus::Timeout => "timeout",
        ConnectionStatus::Refused => "refused",
        ConnectionStatus::Error => "error",
        ConnectionStatus::Blocked => "blocked",
        ConnectionStatus::Deferred => "deferred",
        ConnectionStatus::Bounced => "bounced",
    }
}

#[async_trait]
impl StatsRepository for SqliteStatsRepository {
    async fn add_batch(&self, stats: &[NewConnectionStat]) -> StoreResult<()> {
        if stats.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for stat in stats {
            sqlx::query(
                "INSERT INTO connection_stats
                    (agent_id, service_id, client_ip, status, duration, bytes_sent, bytes_received, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(stat.agent_id)
            .bind(stat.service_id)
            .bind(&stat.client_ip)
            .bind(status_str(stat.status))
            .bind(stat.duration)
            .bind(stat.bytes_sent)
            .bind(stat.bytes_received)
            .bind(stat.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn summary(&self, hours: i64) -> StoreResult<StatsSummary> {
        let since = Utc::now() - Duration::hours(hours);
        let row = sqlx::query(
            "SELECT
                COUNT(*) as total_connections,
                COALESCE(SUM(CASE WHEN status = 'blocked' THEN 1 ELSE 0 END), 0) as blocked_connections,
                COALESCE(SUM(bytes_sent), 0) as total_bytes_sent,
                COALESCE(SUM(bytes_received), 0) as total_bytes_received
             FROM connection_stats
             WHERE timestamp >= ?1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(StatsSummary {
            total_connections: row.try_get("total_connections")?,
            blocked_connections: row.try_get("blocked_connections")?,
            total_bytes_sent: row.try_get("total_bytes_sent")?,
            total_bytes_received: row.try_get("total_bytes_received")?,
        })
    }

    async fn cleanup_old(&self, retention_days: i64) -> StoreResult<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = sqlx::query("DELETE FROM connection_stats WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Parses a status string from the wire, falling back to `error` for an
/// unrecognized value rather than rejecting the whole batch.
pub fn parse_status(raw: &str) -> ConnectionStatus {
    ConnectionStatus::from_str_lenient(raw)
}

trait ConnectionStatusExt {
    fn from_str_lenient(raw: &str) -> ConnectionStatus;
}

impl ConnectionStatusExt for ConnectionStatus {
    fn from_str_lenient(raw: &str) -> ConnectionStatus {
        match raw.to_ascii_lowercase().as_str() {
            "completed" => ConnectionStatus::Completed,
            "timeout" => ConnectionStatus::Timeout,
            "refused" => ConnectionStatus::Refused,
            "blocked" => ConnectionStatus::Blocked,
            "deferred" => ConnectionStatus::Deferred,
            "bounced" => ConnectionStatus::Bounced,
            _ => ConnectionStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MIGRATION_SQL;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(MIGRATION_SQL).execute(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn batch_insert_and_summary_roundtrip() {
        let pool = memory_pool().await;
        let repo = SqliteStatsRepository::new(pool);

        let stats = vec![
            NewConnectionStat {
                agent_id: 1,
                service_id: Some(1),
                client_ip: "1.1.1.1".into(),
                status: ConnectionStatus::Completed,
                duration: Some(0.5),
                bytes_sent: 100,
                bytes_received: 200,
                timestamp: Utc::now(),
            },
            NewConnectionStat {
                agent_id: 1,
                service_id: Some(1),
                client_ip: "2.2.2.2".into(),
                status: ConnectionStatus::Blocked,
                duration: None,
                bytes_sent: 0,
                bytes_received: 0,
                timestamp: Utc::now(),
            },
        ];
        repo.add_batch(&stats).await.unwrap();

        let summary = repo.summary(24).await.unwrap();
        assert_eq!(summary.total_connections, 2);
        assert_eq!(summary.blocked_connections, 1);
        assert_eq!(summary.total_bytes_sent, 100);
        assert_eq!(summary.total_bytes_received, 200);
    }

    #[tokio::test]
    async fn cleanup_old_removes_rows_past_retention() {
        let pool = memory_pool().await;
        let repo = SqliteStatsRepository::new(pool);

        let stale = NewConnectionStat {
            agent_id: 1,
            service_id: None,
            client_ip: "3.3.3.3".into(),
            status: ConnectionStatus::Completed,
            duration: None,
            bytes_sent: 0,
            bytes_received: 0,
            timestamp: Utc::now() - Duration::days(40),
        };
        repo.add_batch(&[stale]).await.unwrap();

        let removed = repo.cleanup_old(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.summary(24 * 24 * 365).await.unwrap().total_connections, 0);
    }

    #[test]
    fn parse_status_falls_back_to_error_on_unknown_value() {
        assert_eq!(parse_status("completed"), ConnectionStatus::Completed);
        assert_eq!(parse_status("bogus"), ConnectionStatus::Error);
    }
}
