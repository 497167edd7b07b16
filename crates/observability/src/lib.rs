//! Tracing bootstrap shared by `controller` and `agent`.
//!
//! Deliberately smaller than a full OpenTelemetry pipeline: this fleet's
//! ambient logging need is "structured, leveled output a human or a log
//! shipper can consume", not distributed trace export.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ObservabilityError::UnsupportedLogFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("unsupported log format: {0}")]
    UnsupportedLogFormat(String),
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Settings driving [`init`]. `service_name` is attached to every event as a
/// `service` field so Controller and Agent logs are distinguishable when
/// aggregated.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>, log_level: impl Into<String>, log_format: LogFormat) -> Self {
        Self {
            service_name: service_name.into(),
            log_level: log_level.into(),
            log_format,
        }
    }
}

/// Install the global tracing subscriber. Call once at process startup,
/// before spawning any background task.
pub fn init(config: &TracingConfig) -> Result<(), ObservabilityError> {
    let env_filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.log_format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init(),
    };

    result.map_err(|err| ObservabilityError::Init(err.to_string()))?;
    tracing::info!(service = %config.service_name, "tracing initialized");
    Ok(())
}
