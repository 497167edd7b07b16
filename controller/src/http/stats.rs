use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use nekoproxy_common::{ConnectionStatWire, StatsIntakeRequest, StatsSummary as WireSummary};
use nekoproxy_store::NewConnectionStat;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    1
}

/// Coerces the wire timestamp to a native one, defaulting to "now" on a
/// missing field or parse failure (spec §4.6).
fn coerce_timestamp(raw: &Option<String>) -> DateTime<Utc> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn to_new_stat(agent_id: i64, wire: ConnectionStatWire) -> NewConnectionStat {
    NewConnectionStat {
        agent_id,
        service_id: wire.service_id,
        client_ip: wire.client_ip,
        status: nekoproxy_store::stats::parse_status(&wire.status),
        duration: wire.duration,
        bytes_sent: wire.bytes_sent,
        bytes_received: wire.bytes_received,
        timestamp: coerce_timestamp(&wire.timestamp),
    }
}

pub async fn intake(State(state): State<AppState>, Json(body): Json<StatsIntakeRequest>) -> Result<(), ApiError> {
    let agent_id = body.agent_id;
    let stats: Vec<NewConnectionStat> = body
        .connections
        .into_iter()
        .map(|wire| to_new_stat(agent_id, wire))
        .collect();
    state.store.stats.add_batch(&stats).await?;
    Ok(())
}

pub async fn summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<WireSummary>, ApiError> {
    let summary = state.store.stats.summary(query.hours).await?;
    Ok(Json(WireSummary {
        total_connections: summary.total_connections,
        blocked_connections: summary.blocked_connections,
        total_bytes_sent: summary.total_bytes_sent,
        total_bytes_received: summary.total_bytes_received,
    }))
}
