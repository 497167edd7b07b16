use async_trait::async_trait;
use chrono::Utc;
use nekoproxy_common::{FirewallAction, FirewallRule, Protocol};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::{classify, StoreError, StoreResult};

#[async_trait]
pub trait FirewallRuleRepository: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        port: u16,
        protocol: Protocol,
        interface: &str,
        action: FirewallAction,
        description: Option<&str>,
        enabled: bool,
        agent_id: Option<i64>,
    ) -> StoreResult<FirewallRule>;

    async fn get(&self, id: i64) -> StoreResult<Option<FirewallRule>>;
    async fn list(&self) -> StoreResult<Vec<FirewallRule>>;

    /// Enabled rules visible to `agent_id` (bound to it, or to no agent).
    async fn list_enabled_for_agent(&self, agent_id: i64) -> StoreResult<Vec<FirewallRule>>;

    async fn update(&self, id: i64, enabled: Option<bool>) -> StoreResult<Option<FirewallRule>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;

    async fn count_visible_to_agent(&self, agent_id: i64) -> StoreResult<i64>;
    async fn max_updated_at_visible_to_agent(&self, agent_id: i64) -> StoreResult<Option<chrono::DateTime<Utc>>>;
}

pub struct SqliteFirewallRuleRepository {
    pool: SqlitePool,
}

impl SqliteFirewallRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<FirewallRule> {
    let protocol: String = row.try_get("protocol")?;
    let action: String = row.try_get("action")?;
    let enabled: i64 = row.try_get("enabled")?;
    let port: i64 = row.try_get("port")?;
    Ok(FirewallRule {
        id: row.try_get("id")?,
        port: port as u16,
        protocol: Protocol::from_str(&protocol).unwrap_or(Protocol::Tcp),
        interface: row.try_get("interface")?,
        action: FirewallAction::from_str(&action).unwrap_or(FirewallAction::Block),
        description: row.try_get("description")?,
        enabled: enabled != 0,
        agent_id: row.try_get("agent_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl FirewallRuleRepository for SqliteFirewallRuleRepository {
    async fn create(
        &self,
        port: u16,
        protocol: Protocol,
        interface: &str,
        action: FirewallAction,
        description: Option<&str>,
        enabled: bool,
        agent_id: Option<i64>,
    ) -> StoreResult<FirewallRule> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO firewall_rules (port, protocol, interface, action, description, enabled, agent_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(port as i64)
        .bind(protocol.as_str())
        .bind(interface)
        .bind(match action {
            FirewallAction::Allow => "allow",
            FirewallAction::Block => "block",
        })
        .bind(description)
        .bind(enabled as i64)
        .bind(agent_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "a firewall rule for that (port, protocol, interface) already exists"))?;

        self.get(result.last_insert_rowid()).await?.ok_or(StoreError::NotFound)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<FirewallRule>> {
        let row = sqlx::query("SELECT * FROM firewall_rules WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_rule(&r)).transpose()?)
    }

    async fn list(&self) -> StoreResult<Vec<FirewallRule>> {
        let rows = sqlx::query("SELECT * FROM firewall_rules ORDER BY id").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_rule).collect::<sqlx::Result<_>>()?)
    }

    async fn list_enabled_for_agent(&self, agent_id: i64) -> StoreResult<Vec<FirewallRule>> {
        let rows = sqlx::query(
            "SELECT * FROM firewall_rules
             WHERE enabled = 1 AND (agent_id = ?1 OR agent_id IS NULL)
             ORDER BY id",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_rule).collect::<sqlx::Result<_>>()?)
    }

    async fn update(&self, id: i64, enabled: Option<bool>) -> StoreResult<Option<FirewallRule>> {
        let Some(current) = self.get(id).await? else {
            return Ok(None);
        };
        let enabled = enabled.unwrap_or(current.enabled);
        let now = Utc::now();
        sqlx::query("UPDATE firewall_rules SET enabled = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(enabled as i64)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get(id).await
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM firewall_rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_visible_to_agent(&self, agent_id: i64) -> StoreResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM firewall_rules WHERE agent_id = ?1 OR agent_id IS NULL",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("c")?)
    }

    async fn max_updated_at_visible_to_agent(&self, agent_id: i64) -> StoreResult<Option<chrono::DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(updated_at) as m FROM firewall_rules WHERE agent_id = ?1 OR agent_id IS NULL",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("m")?)
    }
}
