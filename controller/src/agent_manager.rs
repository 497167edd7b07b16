//! Registration, heartbeat processing, and `AgentConfig` assembly.

use nekoproxy_common::{Agent, AgentConfig, FirewallRuleWire, ServiceWire, config_version};
use nekoproxy_store::Store;

use crate::error::ApiError;
use crate::state::AppState;

pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;

/// Registers (or re-registers, by `wireguard_ip`) an agent and invalidates
/// the round-robin cursor, per spec §4.1.
pub async fn register(state: &AppState, hostname: &str, wireguard_ip: &str, public_ip: Option<&str>, version: &str) -> Result<Agent, ApiError> {
    let agent = state.store.agents.register(hostname, wireguard_ip, public_ip, version).await?;
    state.reset_round_robin();
    Ok(agent)
}

/// Applies a heartbeat, returning the updated agent or `None` if the id is
/// unknown (caller maps that to 404).
pub async fn heartbeat(
    store: &Store,
    agent_id: i64,
    active_connections: i64,
    cpu_percent: f64,
    memory_percent: f64,
) -> Result<Option<Agent>, ApiError> {
    Ok(store.agents.record_heartbeat(agent_id, active_connections, cpu_percent, memory_percent).await?)
}

/// Assembles the coherent `AgentConfig` view for one agent: every Service
/// reachable via an enabled Assignment visible to it (deduplicated by id),
/// every enabled FirewallRule visible to it, the full blocklist, and the
/// computed `config_version`.
pub async fn get_agent_config(store: &Store, agent_id: i64) -> Result<AgentConfig, ApiError> {
    if store.agents.get(agent_id).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    let assignments = store.assignments.list_enabled_for_agent(agent_id).await?;
    let mut services = Vec::new();
    let mut seen_service_ids = std::collections::HashSet::new();
    for assignment in &assignments {
        if seen_service_ids.insert(assignment.service_id) {
            if let Some(service) = store.services.get(assignment.service_id).await? {
                services.push(ServiceWire {
                    id: service.id,
                    name: service.name,
                    listen_port: service.listen_port,
                    backend_host: service.backend_host,
                    backend_port: service.backend_port,
                    protocol: service.protocol,
                });
            }
        }
    }

    let firewall_rules = store
        .firewall_rules
        .list_enabled_for_agent(agent_id)
        .await?
        .into_iter()
        .map(|rule| FirewallRuleWire {
            id: rule.id,
            port: rule.port,
            protocol: rule.protocol,
            interface: rule.interface,
            action: rule.action,
            enabled: rule.enabled,
            agent_id: rule.agent_id,
        })
        .collect();

    let blocklist = store.blocklist.list_ips().await?;

    let version_inputs = store.version_inputs_for_agent(agent_id).await?;
    let mut config = AgentConfig {
        agent_id,
        config_version: config_version(&version_inputs),
        services,
        blocklist,
        firewall_rules,
        heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
    };
    config.canonicalize();
    Ok(config)
}

/// Round-robin agent selector over currently-healthy agents. Kept even
/// though no HTTP endpoint exposes it directly (spec §4.1 [EXPANSION]):
/// future load-balancing callers use it, and it is unit-tested directly.
pub async fn get_next_agent(state: &AppState) -> Result<Option<Agent>, ApiError> {
    let healthy = state.store.agents.list_healthy().await?;
    if healthy.is_empty() {
        return Ok(None);
    }
    let index = state.next_round_robin_index() % healthy.len();
    Ok(Some(healthy[index].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use nekoproxy_store::connect;

    async fn test_state() -> AppState {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Store::from_sqlite_pool(pool);
        let config = Config {
            host: "0.0.0.0".into(),
            port: 8001,
            database_url: "sqlite::memory:".into(),
            heartbeat_timeout_secs: 90,
            stats_retention_days: 30,
            log_level: "info".into(),
            log_format: "pretty".into(),
        };
        AppState::new(store, config)
    }

    #[tokio::test]
    async fn register_twice_with_same_overlay_ip_updates_in_place() {
        let state = test_state().await;
        let first = register(&state, "a1", "10.0.0.2", None, "0.1.0").await.unwrap();
        let second = register(&state, "a1-renamed", "10.0.0.2", Some("1.2.3.4"), "0.2.0").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.hostname, "a1-renamed");
        assert_eq!(second.public_ip.as_deref(), Some("1.2.3.4"));

        let all = state.store.agents.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn get_agent_config_for_bare_agent_has_default_version() {
        let state = test_state().await;
        let agent = register(&state, "a1", "10.0.0.2", None, "0.1.0").await.unwrap();
        let config = get_agent_config(&state.store, agent.id).await.unwrap();
        assert_eq!(config.services.len(), 0);
        assert_eq!(config.blocklist.len(), 0);
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[tokio::test]
    async fn get_agent_config_unknown_agent_is_not_found() {
        let state = test_state().await;
        let err = get_agent_config(&state.store, 999).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn get_next_agent_round_robins_and_resets_on_registration() {
        let state = test_state().await;
        let a1 = register(&state, "a1", "10.0.0.2", None, "0.1.0").await.unwrap();
        let a2 = register(&state, "a2", "10.0.0.3", None, "0.1.0").await.unwrap();

        let first = get_next_agent(&state).await.unwrap().unwrap();
        let second = get_next_agent(&state).await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert!([a1.id, a2.id].contains(&first.id));

        // Registering again resets the cursor.
        register(&state, "a1", "10.0.0.2", None, "0.1.1").await.unwrap();
        let after_reset = get_next_agent(&state).await.unwrap().unwrap();
        assert_eq!(after_reset.id, first.id);
    }
}
