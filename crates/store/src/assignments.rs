use async_trait::async_trait;
use chrono::Utc;
use nekoproxy_common::ServiceAssignment;
use sqlx::{Row, SqlitePool};

use crate::error::{classify, StoreError, StoreResult};

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn create(&self, service_id: i64, agent_id: Option<i64>, enabled: bool) -> StoreResult<ServiceAssignment>;
    async fn get(&self, id: i64) -> StoreResult<Option<ServiceAssignment>>;
    async fn list(&self) -> StoreResult<Vec<ServiceAssignment>>;

    /// Enabled assignments visible to `agent_id`: bound to it directly, or
    /// bound to no agent at all (the "all agents" wildcard).
    async fn list_enabled_for_agent(&self, agent_id: i64) -> StoreResult<Vec<ServiceAssignment>>;

    async fn update(&self, id: i64, enabled: Option<bool>) -> StoreResult<Option<ServiceAssignment>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;

    async fn count_visible_to_agent(&self, agent_id: i64) -> StoreResult<i64>;
    async fn max_updated_at_visible_to_agent(&self, agent_id: i64) -> StoreResult<Option<chrono::DateTime<Utc>>>;
}

pub struct SqliteAssignmentRepository {
    pool: SqlitePool,
}

impl SqliteAssignmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_assignment(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<ServiceAssignment> {
    let enabled: i64 = row.try_get("enabled")?;
    Ok(ServiceAssignment {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        agent_id: row.try_get("agent_id")?,
        enabled: enabled != 0,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl AssignmentRepository for SqliteAssignmentRepository {
    async fn create(&self, service_id: i64, agent_id: Option<i64>, enabled: bool) -> StoreResult<ServiceAssignment> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO service_assignments (service_id, agent_id, enabled, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(service_id)
        .bind(agent_id)
        .bind(enabled as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "an assignment for that (service_id, agent_id) pair already exists"))?;

        self.get(result.last_insert_rowid()).await?.ok_or(StoreError::NotFound)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<ServiceAssignment>> {
        let row = sqlx::query("SELECT * FROM service_assignments WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_assignment(&r)).transpose()?)
    }

    async fn list(&self) -> StoreResult<Vec<ServiceAssignment>> {
        let rows = sqlx::query("SELECT * FROM service_assignments ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_assignment).collect::<sqlx::Result<_>>()?)
    }

    async fn list_enabled_for_agent(&self, agent_id: i64) -> StoreResult<Vec<ServiceAssignment>> {
        let rows = sqlx::query(
            "SELECT * FROM service_assignments
             WHERE enabled = 1 AND (agent_id = ?1 OR agent_id IS NULL)
             ORDER BY id",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_assignment).collect::<sqlx::Result<_>>()?)
    }

    async fn update(&self, id: i64, enabled: Option<bool>) -> StoreResult<Option<ServiceAssignment>> {
        let Some(current) = self.get(id).await? else {
            return Ok(None);
        };
        let enabled = enabled.unwrap_or(current.enabled);
        let now = Utc::now();
        sqlx::query("UPDATE service_assignments SET enabled = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(enabled as i64)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get(id).await
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM service_assignments WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_visible_to_agent(&self, agent_id: i64) -> StoreResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM service_assignments WHERE agent_id = ?1 OR agent_id IS NULL",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("c")?)
    }

    async fn max_updated_at_visible_to_agent(&self, agent_id: i64) -> StoreResult<Option<chrono::DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(updated_at) as m FROM service_assignments WHERE agent_id = ?1 OR agent_id IS NULL",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("m")?)
    }
}
