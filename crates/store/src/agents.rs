use async_trait::async_trait;
use chrono::Utc;
use nekoproxy_common::{Agent, AgentStatus};
use sqlx::{Row, SqlitePool};

use crate::error::{classify, StoreError, StoreResult};

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Upsert by `wireguard_ip`: updates hostname/public_ip/version in place
    /// if an agent with that overlay IP already exists, else creates one
    /// with `status = healthy`.
    async fn register(
        &self,
        hostname: &str,
        wireguard_ip: &str,
        public_ip: Option<&str>,
        version: &str,
    ) -> StoreResult<Agent>;

    async fn get(&self, id: i64) -> StoreResult<Option<Agent>>;
    async fn list(&self) -> StoreResult<Vec<Agent>>;
    async fn list_healthy(&self) -> StoreResult<Vec<Agent>>;

    async fn record_heartbeat(
        &self,
        id: i64,
        active_connections: i64,
        cpu_percent: f64,
        memory_percent: f64,
    ) -> StoreResult<Option<Agent>>;

    async fn mark_unhealthy(&self, id: i64) -> StoreResult<()>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Agent> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "healthy" => AgentStatus::Healthy,
        "unhealthy" => AgentStatus::Unhealthy,
        _ => AgentStatus::Unknown,
    };
    Ok(Agent {
        id: row.try_get("id")?,
        hostname: row.try_get("hostname")?,
        wireguard_ip: row.try_get("wireguard_ip")?,
        public_ip: row.try_get("public_ip")?,
        version: row.try_get("version")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        status,
        active_connections: row.try_get("active_connections")?,
        cpu_percent: row.try_get("cpu_percent")?,
        memory_percent: row.try_get("memory_percent")?,
    })
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn register(
        &self,
        hostname: &str,
        wireguard_ip: &str,
        public_ip: Option<&str>,
        version: &str,
    ) -> StoreResult<Agent> {
        let existing = sqlx::query("SELECT * FROM agents WHERE wireguard_ip = ?1")
            .bind(wireguard_ip)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = existing {
            let id: i64 = row.try_get("id")?;
            sqlx::query(
                "UPDATE agents SET hostname = ?1, public_ip = ?2, version = ?3 WHERE id = ?4",
            )
            .bind(hostname)
            .bind(public_ip)
            .bind(version)
            .bind(id)
            .execute(&self.pool)
            .await?;
            return self.get(id).await?.ok_or(StoreError::NotFound);
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO agents (hostname, wireguard_ip, public_ip, version, last_heartbeat, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'healthy')",
        )
        .bind(hostname)
        .bind(wireguard_ip)
        .bind(public_ip)
        .bind(version)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "agent with that wireguard_ip already exists"))?;

        self.get(result.last_insert_rowid())
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_agent(&r)).transpose()?)
    }

    async fn list(&self) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_agent).collect::<sqlx::Result<_>>()?)
    }

    async fn list_healthy(&self) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE status = 'healthy' ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_agent).collect::<sqlx::Result<_>>()?)
    }

    async fn record_heartbeat(
        &self,
        id: i64,
        active_connections: i64,
        cpu_percent: f64,
        memory_percent: f64,
    ) -> StoreResult<Option<Agent>> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE agents SET last_heartbeat = ?1, status = 'healthy',
                active_connections = ?2, cpu_percent = ?3, memory_percent = ?4
             WHERE id = ?5",
        )
        .bind(now)
        .bind(active_connections)
        .bind(cpu_percent)
        .bind(memory_percent)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn mark_unhealthy(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE agents SET status = 'unhealthy' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM connection_stats WHERE agent_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM service_assignments WHERE agent_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
