use axum::extract::{Path, State};
use axum::Json;
use nekoproxy_common::BlocklistEntry;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBlocklistEntryRequest {
    pub ip: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBlocklistEntryRequest>,
) -> Result<Json<BlocklistEntry>, ApiError> {
    Ok(Json(state.store.blocklist.add(&body.ip).await?))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<BlocklistEntry>>, ApiError> {
    Ok(Json(state.store.blocklist.list().await?))
}

pub async fn delete(State(state): State<AppState>, Path(ip): Path<String>) -> Result<(), ApiError> {
    if !state.store.blocklist.remove(&ip).await? {
        return Err(ApiError::NotFound);
    }
    Ok(())
}
