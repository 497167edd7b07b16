use axum::extract::{Path, State};
use axum::Json;
use nekoproxy_common::{FirewallAction, FirewallRule, Protocol};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateFirewallRuleRequest {
    pub port: u16,
    pub protocol: Protocol,
    pub interface: String,
    pub action: FirewallAction,
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub agent_id: Option<i64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateFirewallRuleRequest {
    pub enabled: Option<bool>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateFirewallRuleRequest>,
) -> Result<Json<FirewallRule>, ApiError> {
    let rule = state
        .store
        .firewall_rules
        .create(
            body.port,
            body.protocol,
            &body.interface,
            body.action,
            body.description.as_deref(),
            body.enabled,
            body.agent_id,
        )
        .await?;
    Ok(Json(rule))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<FirewallRule>>, ApiError> {
    Ok(Json(state.store.firewall_rules.list().await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<FirewallRule>, ApiError> {
    state.store.firewall_rules.get(id).await?.map(Json).ok_or(ApiError::NotFound)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateFirewallRuleRequest>,
) -> Result<Json<FirewallRule>, ApiError> {
    state
        .store
        .firewall_rules
        .update(id, body.enabled)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Result<(), ApiError> {
    if !state.store.firewall_rules.delete(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(())
}
