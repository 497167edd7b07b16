use axum::extract::{Path, State};
use axum::Json;
use nekoproxy_common::{AgentConfig, AgentHeartbeat, AgentRegistration, AgentStatusResponse};

use crate::agent_manager;
use crate::error::ApiError;
use crate::state::AppState;

fn to_status_response(agent: nekoproxy_common::Agent) -> AgentStatusResponse {
    let status = match agent.status {
        nekoproxy_common::AgentStatus::Healthy => "healthy",
        nekoproxy_common::AgentStatus::Unhealthy => "unhealthy",
        nekoproxy_common::AgentStatus::Unknown => "unknown",
    };
    AgentStatusResponse {
        id: agent.id,
        hostname: agent.hostname,
        wireguard_ip: agent.wireguard_ip,
        public_ip: agent.public_ip,
        version: agent.version,
        status: status.to_string(),
        active_connections: agent.active_connections,
        cpu_percent: agent.cpu_percent,
        memory_percent: agent.memory_percent,
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<AgentRegistration>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    let agent = agent_manager::register(
        &state,
        &body.hostname,
        &body.wireguard_ip,
        body.public_ip.as_deref(),
        &body.version,
    )
    .await?;
    Ok(Json(to_status_response(agent)))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AgentHeartbeat>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    let agent = agent_manager::heartbeat(&state.store, id, body.active_connections, body.cpu_percent, body.memory_percent)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(to_status_response(agent)))
}

pub async fn get_config(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<AgentConfig>, ApiError> {
    let config = agent_manager::get_agent_config(&state.store, id).await?;
    Ok(Json(config))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<AgentStatusResponse>>, ApiError> {
    let agents = state.store.agents.list().await?;
    Ok(Json(agents.into_iter().map(to_status_response).collect()))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Result<(), ApiError> {
    if !state.store.agents.delete(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(())
}
