//! Flat environment-variable configuration, no profile/TOML layering: the
//! Controller's knob set is a short flat list (spec §6), so a typed
//! `from_env` beats reproducing a nested config-file loader.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub heartbeat_timeout_secs: i64,
    pub stats_retention_days: i64,
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env_or("PORT", 8001)?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://nekoproxy-controller.db".to_string()),
            heartbeat_timeout_secs: parse_env_or("HEARTBEAT_TIMEOUT", 90)?,
            stats_retention_days: parse_env_or("STATS_RETENTION_DAYS", 30)?,
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
