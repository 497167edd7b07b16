use std::str::FromStr;

use anyhow::{Context, Result};
use nekoproxy_controller::config::Config;
use nekoproxy_controller::state::AppState;
use nekoproxy_controller::{health_monitor, http};
use nekoproxy_observability::{LogFormat, TracingConfig};
use nekoproxy_store::Store;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load controller configuration")?;

    let log_format = LogFormat::from_str(&config.log_format).unwrap_or(LogFormat::Pretty);
    let tracing_config = TracingConfig::new("nekoproxy-controller", config.log_level.clone(), log_format);
    nekoproxy_observability::init(&tracing_config).context("failed to install tracing subscriber")?;

    let pool = nekoproxy_store::connect(&config.database_url)
        .await
        .context("failed to open record store")?;
    let store = Store::from_sqlite_pool(pool);
    let state = AppState::new(store, config.clone());

    let shutdown = CancellationToken::new();
    let health_monitor_handle = tokio::spawn(health_monitor::run(state.clone(), shutdown.clone()));

    let app = http::router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind controller HTTP listener on {addr}"))?;

    info!(%addr, "controller listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("controller HTTP server terminated")?;

    shutdown.cancel();
    let _ = health_monitor_handle.await;
    info!("controller shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
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
