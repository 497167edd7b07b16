use async_trait::async_trait;
use chrono::Utc;
use nekoproxy_common::{Protocol, Service};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::{classify, StoreError, StoreResult};

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn create(
        &self,
        name: &str,
        listen_port: u16,
        protocol: Protocol,
        backend_host: &str,
        backend_port: u16,
        description: Option<&str>,
    ) -> StoreResult<Service>;

    async fn get(&self, id: i64) -> StoreResult<Option<Service>>;
    async fn list(&self) -> StoreResult<Vec<Service>>;

    async fn update(
        &self,
        id: i64,
        name: Option<&str>,
        listen_port: Option<u16>,
        protocol: Option<Protocol>,
        backend_host: Option<&str>,
        backend_port: Option<u16>,
        description: Option<Option<&str>>,
    ) -> StoreResult<Option<Service>>;

    /// Deletes the service and cascades to its assignments and stats.
    async fn delete(&self, id: i64) -> StoreResult<bool>;

    /// Maximum `updated_at` across services visible to `agent_id` (bound to
    /// it via an enabled assignment, or assigned to no agent at all), for
    /// the version formula.
    async fn max_updated_at_visible_to_agent(&self, agent_id: i64) -> StoreResult<Option<chrono::DateTime<Utc>>>;
}

pub struct SqliteServiceRepository {
    pool: SqlitePool,
}

impl SqliteServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Service> {
    let protocol: String = row.try_get("protocol")?;
    let listen_port: i64 = row.try_get("listen_port")?;
    let backend_port: i64 = row.try_get("backend_port")?;
    Ok(Service {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        listen_port: listen_port as u16,
        protocol: Protocol::from_str(&protocol).unwrap_or(Protocol::Tcp),
        backend_host: row.try_get("backend_host")?,
        backend_port: backend_port as u16,
        description: row.try_get("description")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ServiceRepository for SqliteServiceRepository {
    async fn create(
        &self,
        name: &str,
        listen_port: u16,
        protocol: Protocol,
        backend_host: &str,
        backend_port: u16,
        description: Option<&str>,
    ) -> StoreResult<Service> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO services (name, listen_port, protocol, backend_host, backend_port, description, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(name)
        .bind(listen_port as i64)
        .bind(protocol.as_str())
        .bind(backend_host)
        .bind(backend_port as i64)
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "a service with that name or (listen_port, protocol) already exists"))?;

        self.get(result.last_insert_rowid()).await?.ok_or(StoreError::NotFound)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Service>> {
        let row = sqlx::query("SELECT * FROM services WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_service(&r)).transpose()?)
    }

    async fn list(&self) -> StoreResult<Vec<Service>> {
        let rows = sqlx::query("SELECT * FROM services ORDER BY id").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_service).collect::<sqlx::Result<_>>()?)
    }

    async fn update(
        &self,
        id: i64,
        name: Option<&str>,
        listen_port: Option<u16>,
        protocol: Option<Protocol>,
        backend_host: Option<&str>,
        backend_port: Option<u16>,
        description: Option<Option<&str>>,
    ) -> StoreResult<Option<Service>> {
        let Some(current) = self.get(id).await? else {
            return Ok(None);
        };
        let name = name.unwrap_or(&current.name);
        let listen_port = listen_port.unwrap_or(current.listen_port);
        let protocol = protocol.unwrap_or(current.protocol);
        let backend_host = backend_host.unwrap_or(&current.backend_host);
        let backend_port = backend_port.unwrap_or(current.backend_port);
        let description = description.unwrap_or(current.description.as_deref());
        let now = Utc::now();

        sqlx::query(
            "UPDATE services SET name = ?1, listen_port = ?2, protocol = ?3, backend_host = ?4,
                backend_port = ?5, description = ?6, updated_at = ?7 WHERE id = ?8",
        )
        .bind(name)
        .bind(listen_port as i64)
        .bind(protocol.as_str())
        .bind(backend_host)
        .bind(backend_port as i64)
        .bind(description)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "a service with that name or (listen_port, protocol) already exists"))?;

        self.get(id).await
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM connection_stats WHERE service_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM service_assignments WHERE service_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM services WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn max_updated_at_visible_to_agent(&self, agent_id: i64) -> StoreResult<Option<chrono::DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(s.updated_at) as m FROM services s
             JOIN service_assignments sa ON sa.service_id = s.id
             WHERE sa.enabled = 1 AND (sa.agent_id = ?1 OR sa.agent_id IS NULL)",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("m")?)
    }
}
