pub mod agents;
pub mod assignments;
pub mod blocklist;
pub mod firewall;
pub mod health;
pub mod services;
pub mod stats;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/agents/register", post(agents::register))
        .route("/api/v1/agents", get(agents::list))
        .route("/api/v1/agents/:id", delete(agents::delete))
        .route("/api/v1/agents/:id/heartbeat", post(agents::heartbeat))
        .route("/api/v1/agents/:id/config", get(agents::get_config))
        .route("/api/v1/services", get(services::list).post(services::create))
        .route(
            "/api/v1/services/:id",
            get(services::get).put(services::update).delete(services::delete),
        )
        .route("/api/v1/assignments", get(assignments::list).post(assignments::create))
        .route(
            "/api/v1/assignments/:id",
            get(assignments::get).put(assignments::update).delete(assignments::delete),
        )
        .route("/api/v1/blocklist", get(blocklist::list).post(blocklist::create))
        .route("/api/v1/blocklist/:ip", delete(blocklist::delete))
        .route("/api/v1/firewall", get(firewall::list).post(firewall::create))
        .route(
            "/api/v1/firewall/:id",
            get(firewall::get).put(firewall::update).delete(firewall::delete),
        )
        .route("/api/v1/stats/connections", post(stats::intake))
        .route("/api/v1/stats/summary", get(stats::summary))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
