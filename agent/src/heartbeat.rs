//! Periodic liveness report to the Controller (spec §4.7).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nekoproxy_common::AgentHeartbeat;
use sysinfo::{CpuExt, System, SystemExt};
use tokio_util::sync::CancellationToken;

use crate::tcp_proxy::TcpProxyManager;

pub struct HeartbeatSender {
    agent_id: i64,
    controller_url: String,
    interval: Duration,
    client: reqwest::Client,
    tcp: Arc<TcpProxyManager>,
    system: Mutex<System>,
}

impl HeartbeatSender {
    pub fn new(agent_id: i64, controller_url: String, interval: Duration, tcp: Arc<TcpProxyManager>) -> Self {
        Self {
            agent_id,
            controller_url,
            interval,
            client: reqwest::Client::new(),
            tcp,
            system: Mutex::new(System::new_all()),
        }
    }

    fn sample_host_metrics(&self) -> (f64, f64) {
        let mut system = self.system.lock().unwrap();
        system.refresh_cpu();
        system.refresh_memory();
        let cpu_percent = system.global_cpu_info().cpu_usage() as f64;
        let memory_percent = if system.total_memory() > 0 {
            (system.used_memory() as f64 / system.total_memory() as f64) * 100.0
        } else {
            0.0
        };
        (cpu_percent, memory_percent)
    }

    async fn send_once(&self) {
        let (cpu_percent, memory_percent) = self.sample_host_metrics();
        let body = AgentHeartbeat {
            active_connections: self.tcp.active_connection_count(),
            cpu_percent,
            memory_percent,
        };

        let url = format!("{}/api/v1/agents/{}/heartbeat", self.controller_url, self.agent_id);
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(agent_id = self.agent_id, "heartbeat sent");
            }
            Ok(resp) => {
                tracing::warn!(agent_id = self.agent_id, status = %resp.status(), "heartbeat rejected");
            }
            Err(err) => {
                tracing::warn!(agent_id = self.agent_id, error = %err, "heartbeat failed, will retry next tick");
            }
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("heartbeat sender stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.send_once().await;
                }
            }
        }
    }
}
