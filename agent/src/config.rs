//! Flat environment-variable configuration (spec §6).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub hostname: String,
    pub wireguard_ip: String,
    pub public_ip: Option<String>,
    pub controller_url: String,
    pub listen_ip: String,
    pub buffer_size: usize,
    pub connection_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub stats_batch_size: usize,
    pub stats_report_interval_secs: u64,
    pub control_api_port: u16,
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            hostname: require_env("HOSTNAME")?,
            wireguard_ip: require_env("WIREGUARD_IP")?,
            public_ip: std::env::var("PUBLIC_IP").ok(),
            controller_url: std::env::var("CONTROLLER_URL").unwrap_or_else(|_| "http://127.0.0.1:8001".to_string()),
            listen_ip: std::env::var("LISTEN_IP").unwrap_or_else(|_| "0.0.0.0".to_string()),
            buffer_size: parse_env_or("BUFFER_SIZE", 8192)?,
            connection_timeout_secs: parse_env_or("CONNECTION_TIMEOUT", 10)?,
            heartbeat_interval_secs: parse_env_or("HEARTBEAT_INTERVAL", 30)?,
            stats_batch_size: parse_env_or("STATS_BATCH_SIZE", 100)?,
            stats_report_interval_secs: parse_env_or("STATS_REPORT_INTERVAL", 60)?,
            control_api_port: parse_env_or("CONTROL_API_PORT", 8002)?,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
        })
    }
}

fn parse_env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}
