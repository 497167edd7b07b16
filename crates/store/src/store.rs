use std::sync::Arc;

use sqlx::SqlitePool;

use crate::agents::{AgentRepository, SqliteAgentRepository};
use crate::assignments::{AssignmentRepository, SqliteAssignmentRepository};
use crate::blocklist::{BlocklistRepository, SqliteBlocklistRepository};
use crate::firewall::{FirewallRuleRepository, SqliteFirewallRuleRepository};
use crate::services::{ServiceRepository, SqliteServiceRepository};
use crate::stats::{SqliteStatsRepository, StatsRepository};

/// Aggregates the six repositories behind one handle cheap to clone into an
/// axum `AppState`. Each field is a trait object so the Controller can swap
/// in fakes for route-level testing without a real SQLite file.
#[derive(Clone)]
pub struct Store {
    pub agents: Arc<dyn AgentRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub blocklist: Arc<dyn BlocklistRepository>,
    pub firewall_rules: Arc<dyn FirewallRuleRepository>,
    pub stats: Arc<dyn StatsRepository>,
}

impl Store {
    /// Builds the SQLite-backed store over an already-migrated pool.
    pub fn from_sqlite_pool(pool: SqlitePool) -> Self {
        Self {
            agents: Arc::new(SqliteAgentRepository::new(pool.clone())),
            services: Arc::new(SqliteServiceRepository::new(pool.clone())),
            assignments: Arc::new(SqliteAssignmentRepository::new(pool.clone())),
            blocklist: Arc::new(SqliteBlocklistRepository::new(pool.clone())),
            firewall_rules: Arc::new(SqliteFirewallRuleRepository::new(pool.clone())),
            stats: Arc::new(SqliteStatsRepository::new(pool)),
        }
    }

    /// Computes the `config_version` an agent should see right now, per the
    /// formula in `nekoproxy_common::version`: the maximum `updated_at`
    /// across FirewallRule, ServiceAssignment, Service, and BlocklistEntry
    /// records visible to this agent, folded with a count-derived tail.
    pub async fn version_inputs_for_agent(
        &self,
        agent_id: i64,
    ) -> crate::error::StoreResult<nekoproxy_common::VersionInputs> {
        let service_max = self.services.max_updated_at_visible_to_agent(agent_id).await?;
        let assignment_max = self.assignments.max_updated_at_visible_to_agent(agent_id).await?;
        let firewall_max = self.firewall_rules.max_updated_at_visible_to_agent(agent_id).await?;
        let blocklist_max = self.blocklist.max_updated_at().await?;

        let max_updated_at = [service_max, assignment_max, firewall_max, blocklist_max]
            .into_iter()
            .flatten()
            .max();

        let firewall_count = self.firewall_rules.count_visible_to_agent(agent_id).await?;
        let assignment_count = self.assignments.count_visible_to_agent(agent_id).await?;
        let blocklist_count = self.blocklist.count().await?;

        Ok(nekoproxy_common::VersionInputs {
            max_updated_at,
            firewall_count,
            assignment_count,
            blocklist_count,
        })
    }
}
