use axum::extract::{Path, State};
use axum::Json;
use nekoproxy_common::{Protocol, Service};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub listen_port: u16,
    pub protocol: Protocol,
    pub backend_host: String,
    pub backend_port: u16,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub listen_port: Option<u16>,
    pub protocol: Option<Protocol>,
    pub backend_host: Option<String>,
    pub backend_port: Option<u16>,
    pub description: Option<Option<String>>,
}

pub async fn create(State(state): State<AppState>, Json(body): Json<CreateServiceRequest>) -> Result<Json<Service>, ApiError> {
    let service = state
        .store
        .services
        .create(
            &body.name,
            body.listen_port,
            body.protocol,
            &body.backend_host,
            body.backend_port,
            body.description.as_deref(),
        )
        .await?;
    Ok(Json(service))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Service>>, ApiError> {
    Ok(Json(state.store.services.list().await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Service>, ApiError> {
    state.store.services.get(id).await?.map(Json).ok_or(ApiError::NotFound)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<Service>, ApiError> {
    state
        .store
        .services
        .update(
            id,
            body.name.as_deref(),
            body.listen_port,
            body.protocol,
            body.backend_host.as_deref(),
            body.backend_port,
            body.description.as_ref().map(|d| d.as_deref()),
        )
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> Result<(), ApiError> {
    if !state.store.services.delete(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(())
}
