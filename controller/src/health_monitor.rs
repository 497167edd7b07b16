//! Background loop: demote silent agents, prune old stats at most once/hour.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

const TICK_INTERVAL: Duration = Duration::from_secs(30);
const PRUNE_INTERVAL: chrono::Duration = chrono::Duration::hours(1);

pub async fn run(state: AppState, shutdown: CancellationToken) {
    let mut last_prune: Option<chrono::DateTime<Utc>> = None;
    let mut interval = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("health monitor shutting down");
                return;
            }
            _ = interval.tick() => {
                if let Err(err) = demote_stale_agents(&state).await {
                    tracing::warn!(error = %err, "health monitor: demotion pass failed");
                }

                let now = Utc::now();
                let due = last_prune.map(|ts| now - ts >= PRUNE_INTERVAL).unwrap_or(true);
                if due {
                    match state.store.stats.cleanup_old(state.config.stats_retention_days).await {
                        Ok(removed) => {
                            tracing::info!(removed, "health monitor: pruned old stats");
                            last_prune = Some(now);
                        }
                        Err(err) => tracing::warn!(error = %err, "health monitor: stats prune failed"),
                    }
                }
            }
        }
    }
}

async fn demote_stale_agents(state: &AppState) -> Result<(), nekoproxy_store::StoreError> {
    let timeout = chrono::Duration::seconds(state.config.heartbeat_timeout_secs);
    let now = Utc::now();

    for agent in state.store.agents.list_healthy().await? {
        let stale = match agent.last_heartbeat {
            Some(ts) => now - ts > timeout,
            None => true,
        };
        if stale {
            state.store.agents.mark_unhealthy(agent.id).await?;
            tracing::info!(agent_id = agent.id, "demoted agent to unhealthy");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use nekoproxy_store::{connect, Store};

    async fn test_state(heartbeat_timeout_secs: i64) -> AppState {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Store::from_sqlite_pool(pool);
        let config = Config {
            host: "0.0.0.0".into(),
            port: 8001,
            database_url: "sqlite::memory:".into(),
            heartbeat_timeout_secs,
            stats_retention_days: 30,
            log_level: "info".into(),
            log_format: "pretty".into(),
        };
        AppState::new(store, config)
    }

    #[tokio::test]
    async fn demotes_agent_with_no_heartbeat_and_one_past_timeout() {
        let state = test_state(90).await;
        let agent = state.store.agents.register("a1", "10.0.0.2", None, "0.1.0").await.unwrap();
        // Freshly registered agents carry a heartbeat of "now" from registration.
        demote_stale_agents(&state).await.unwrap();
        let refreshed = state.store.agents.get(agent.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, nekoproxy_common::AgentStatus::Healthy);
    }

    #[tokio::test]
    async fn demotes_agent_past_heartbeat_timeout() {
        let state = test_state(0).await;
        let agent = state.store.agents.register("a1", "10.0.0.2", None, "0.1.0").await.unwrap();
        // heartbeat_timeout_secs = 0, so even a fresh heartbeat reads as stale.
        tokio::time::sleep(Duration::from_millis(10)).await;
        demote_stale_agents(&state).await.unwrap();
        let refreshed = state.store.agents.get(agent.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, nekoproxy_common::AgentStatus::Unhealthy);
    }
}
