//! Entities owned by the Controller's record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport protocol a [`Service`] or [`FirewallRule`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(ModelError::InvalidEnumValue {
                field: "protocol",
                value: other.to_string(),
            }),
        }
    }
}

/// Health classification of an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Action a [`FirewallRule`] applies once its interface resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallAction {
    Allow,
    Block,
}

impl std::str::FromStr for FirewallAction {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(FirewallAction::Allow),
            "block" => Ok(FirewallAction::Block),
            other => Err(ModelError::InvalidEnumValue {
                field: "action",
                value: other.to_string(),
            }),
        }
    }
}

/// Terminal status recorded against one completed flow.
///
/// `blocked`/`deferred`/`bounced` exist for parity with the source system's
/// email-proxy add-on, which is out of core here but shares this enum on the
/// wire so a future sidecar can reuse the stats intake unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Completed,
    Timeout,
    Refused,
    Error,
    Blocked,
    Deferred,
    Bounced,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid value for {field}: {value}")]
    InvalidEnumValue { field: &'static str, value: String },
}

/// Identity of a proxy host reachable over the overlay network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub hostname: String,
    pub wireguard_ip: String,
    pub public_ip: Option<String>,
    pub version: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub status: AgentStatus,
    pub active_connections: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// A forwarding definition: one listen port/protocol to one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub listen_port: u16,
    pub protocol: Protocol,
    pub backend_host: String,
    pub backend_port: u16,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Binds a [`Service`] to an agent (`agent_id = None` means "all agents").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAssignment {
    pub id: i64,
    pub service_id: i64,
    pub agent_id: Option<i64>,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// A blocked client source address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub id: i64,
    pub ip: String,
    pub updated_at: DateTime<Utc>,
}

/// A host packet-filter rule the Firewall Reconciler installs on an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: i64,
    pub port: u16,
    pub protocol: Protocol,
    pub interface: String,
    pub action: FirewallAction,
    pub description: Option<String>,
    pub enabled: bool,
    pub agent_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one completed flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStat {
    pub id: i64,
    pub agent_id: i64,
    pub service_id: Option<i64>,
    pub client_ip: String,
    pub status: ConnectionStatus,
    pub duration: Option<f64>,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn protocol_round_trips_through_str() {
        assert_eq!(Protocol::from_str("TCP").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::from_str("udp").unwrap(), Protocol::Udp);
        assert!(Protocol::from_str("sctp").is_err());
    }

    #[test]
    fn firewall_action_round_trips_through_str() {
        assert_eq!(FirewallAction::from_str("ALLOW").unwrap(), FirewallAction::Allow);
        assert_eq!(FirewallAction::from_str("block").unwrap(), FirewallAction::Block);
        assert!(FirewallAction::from_str("maybe").is_err());
    }
}
