use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nekoproxy_agent::blocklist::BlocklistHandle;
use nekoproxy_agent::config::Config;
use nekoproxy_agent::config_sync::ConfigSync;
use nekoproxy_agent::control_api;
use nekoproxy_agent::firewall::{FirewallReconciler, SystemCommandRunner};
use nekoproxy_agent::heartbeat::HeartbeatSender;
use nekoproxy_agent::stats_reporter::StatsReporter;
use nekoproxy_agent::tcp_proxy::TcpProxyManager;
use nekoproxy_agent::udp_proxy::UdpProxyManager;
use nekoproxy_common::AgentRegistration;
use nekoproxy_observability::{LogFormat, TracingConfig};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading agent configuration")?;

    let log_format = LogFormat::from_str(&config.log_format).unwrap_or(LogFormat::Pretty);
    let tracing_config = TracingConfig::new("nekoproxy-agent", config.log_level.clone(), log_format);
    nekoproxy_observability::init(&tracing_config).context("failed to install tracing subscriber")?;

    let agent_id = register(&config).await.context("registering with controller")?;
    tracing::info!(agent_id, hostname = %config.hostname, "registered with controller");

    let blocklist = BlocklistHandle::new();
    let stats = Arc::new(StatsReporter::new(
        agent_id,
        config.controller_url.clone(),
        config.stats_batch_size,
        Duration::from_secs(config.stats_report_interval_secs),
    ));
    let tcp = Arc::new(TcpProxyManager::new(
        config.listen_ip.clone(),
        config.buffer_size,
        Duration::from_secs(config.connection_timeout_secs),
        blocklist.clone(),
        stats.clone(),
    ));
    let udp = Arc::new(UdpProxyManager::new(
        config.listen_ip.clone(),
        config.buffer_size,
        nekoproxy_agent::udp_proxy::DEFAULT_CLIENT_TIMEOUT,
        blocklist.clone(),
        stats.clone(),
    ));
    let firewall = Arc::new(FirewallReconciler::new(Box::new(SystemCommandRunner)));
    let config_sync = Arc::new(ConfigSync::new(
        agent_id,
        config.controller_url.clone(),
        blocklist,
        tcp.clone(),
        udp.clone(),
        firewall.clone(),
    ));
    let heartbeat = Arc::new(HeartbeatSender::new(
        agent_id,
        config.controller_url.clone(),
        Duration::from_secs(config.heartbeat_interval_secs),
        tcp.clone(),
    ));

    let control_api_shutdown = CancellationToken::new();
    let config_sync_shutdown = CancellationToken::new();
    let heartbeat_shutdown = CancellationToken::new();
    let stats_shutdown = CancellationToken::new();

    let control_api_listener = tokio::net::TcpListener::bind((config.wireguard_ip.as_str(), config.control_api_port))
        .await
        .context("binding control API listener")?;
    let control_api_router = control_api::router(config_sync.clone());
    let control_api_task = {
        let shutdown = control_api_shutdown.clone();
        tokio::spawn(async move {
            let server = axum::serve(control_api_listener, control_api_router).with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            });
            if let Err(err) = server.await {
                tracing::error!(error = %err, "control API server error");
            }
        })
    };

    let config_sync_task = tokio::spawn(config_sync.clone().run(config_sync_shutdown.clone()));
    let heartbeat_task = tokio::spawn(heartbeat.run(heartbeat_shutdown.clone()));
    let stats_task = tokio::spawn(stats.clone().run(stats_shutdown.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping agent");

    control_api_shutdown.cancel();
    let _ = control_api_task.await;

    config_sync_shutdown.cancel();
    let _ = config_sync_task.await;

    heartbeat_shutdown.cancel();
    let _ = heartbeat_task.await;

    tcp.shutdown().await;
    udp.shutdown().await;

    if let Err(err) = firewall.teardown() {
        tracing::warn!(error = %err, "firewall teardown failed");
    }

    stats_shutdown.cancel();
    let _ = stats_task.await;

    Ok(())
}

async fn register(config: &Config) -> anyhow::Result<i64> {
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/agents/register", config.controller_url);
    let body = AgentRegistration {
        hostname: config.hostname.clone(),
        wireguard_ip: config.wireguard_ip.clone(),
        public_ip: config.public_ip.clone(),
        version: AGENT_VERSION.to_string(),
    };

    let response = client.post(&url).json(&body).send().await.context("sending registration request")?;
    if !response.status().is_success() {
        anyhow::bail!("controller rejected registration with status {}", response.status());
    }
    let status: nekoproxy_common::AgentStatusResponse = response.json().await.context("parsing registration response")?;
    Ok(status.id)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
