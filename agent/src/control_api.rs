//! Small control-plane HTTP surface bound to the overlay IP: lets the
//! Controller (or an operator) force an immediate config pull (spec §4.2,
//! §9).

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::config_sync::ConfigSync;

pub fn router(config_sync: Arc<ConfigSync>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trigger-sync", post(trigger_sync))
        .with_state(config_sync)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn trigger_sync(State(config_sync): State<Arc<ConfigSync>>) -> impl IntoResponse {
    let applied = config_sync.force_sync().await;
    Json(json!({"status": if applied { "ok" } else { "error" }}))
}
