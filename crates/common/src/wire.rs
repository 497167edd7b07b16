//! JSON shapes crossing the Controller <-> Agent HTTP boundary.

use serde::{Deserialize, Serialize};

use crate::model::{FirewallAction, Protocol};

/// One forwarding definition as delivered inside an [`AgentConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceWire {
    pub id: i64,
    pub name: String,
    pub listen_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    pub protocol: Protocol,
}

/// One firewall rule as delivered inside an [`AgentConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirewallRuleWire {
    pub id: i64,
    pub port: u16,
    pub protocol: Protocol,
    pub interface: String,
    pub action: FirewallAction,
    pub enabled: bool,
    pub agent_id: Option<i64>,
}

/// The coherent configuration view an Agent pulls (or is pushed) from the
/// Controller. Not stored anywhere; assembled fresh on every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub agent_id: i64,
    pub config_version: i64,
    pub services: Vec<ServiceWire>,
    pub blocklist: Vec<String>,
    pub firewall_rules: Vec<FirewallRuleWire>,
    pub heartbeat_interval: u64,
}

impl AgentConfig {
    /// Put list fields into a canonical order so two configs with the same
    /// content but different record-store iteration order compare equal and
    /// round-trip byte-identically through JSON.
    pub fn canonicalize(&mut self) {
        self.services.sort_by_key(|s| s.id);
        self.blocklist.sort();
        self.firewall_rules.sort_by_key(|r| r.id);
    }
}

/// `POST /api/v1/agents/register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub hostname: String,
    pub wireguard_ip: String,
    pub public_ip: Option<String>,
    pub version: String,
}

/// `POST /api/v1/agents/{id}/heartbeat` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHeartbeat {
    pub active_connections: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Response shared by registration and listing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusResponse {
    pub id: i64,
    pub hostname: String,
    pub wireguard_ip: String,
    pub public_ip: Option<String>,
    pub version: String,
    pub status: String,
    pub active_connections: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// One record inside a `POST /api/v1/stats/connections` batch.
///
/// `timestamp` is carried as the raw string the agent sent so the intake
/// handler can apply the spec's "coerce ISO-string, default to now on parse
/// failure" rule explicitly rather than failing deserialization outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatWire {
    pub service_id: Option<i64>,
    pub client_ip: String,
    pub status: String,
    pub duration: Option<f64>,
    #[serde(default)]
    pub bytes_sent: i64,
    #[serde(default)]
    pub bytes_received: i64,
    pub timestamp: Option<String>,
}

/// `POST /api/v1/stats/connections` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsIntakeRequest {
    pub agent_id: i64,
    pub connections: Vec<ConnectionStatWire>,
}

/// `GET /api/v1/stats/summary` response body.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StatsSummary {
    pub total_connections: i64,
    pub blocked_connections: i64,
    pub total_bytes_sent: i64,
    pub total_bytes_received: i64,
}

/// Uniform error body for non-2xx API responses (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}
