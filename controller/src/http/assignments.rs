use axum::extract::{Path, State};
use axum::Json;
use nekoproxy_common::ServiceAssignment;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentRequest {
    pub service_id: i64,
    pub agent_id: Option<i64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateAssignmentRequest {
    pub enabled: Option<bool>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateAssignmentRequest>,
) -> Result<Json<ServiceAssignment>, ApiError> {
    let assignment = state.store.assignments.create(body.service_id, body.agent_id, body.enabled).await?;
    Ok(Json(assignment))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ServiceAssignment>>, ApiError> {
    Ok(Json(state.store.assignments.list().await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<ServiceAssignment>, ApiError> {
    state.store.assignments.get(id).await?.map(Json).ok_or(ApiError::NotFound)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateAssignmentRequest>,
) -> Result<Json<ServiceAssignment>, ApiError> {
    state
        .store
        .assignments
        .update(id, body.enabled)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Result<(), ApiError> {
    if !state.store.assignments.delete(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(())
}
