//! UDP forwarding data plane: per-client session table with a dedicated
//! upstream socket per session and a periodic idle reaper (spec §4.4).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nekoproxy_common::{Protocol, ServiceWire};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;

use crate::blocklist::BlocklistHandle;
use crate::stats_reporter::{EmittedStat, StatsReporter};

const REAP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

struct Session {
    upstream: Arc<UdpSocket>,
    client_ip: String,
    service_id: i64,
    started: TokioInstant,
    last_seen: TokioInstant,
    bytes_sent: i64,
    bytes_received: i64,
    forward_cancel: CancellationToken,
}

struct ListenerState {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

pub struct UdpProxyManager {
    listen_ip: String,
    buffer_size: usize,
    client_timeout: Duration,
    blocklist: BlocklistHandle,
    stats: Arc<StatsReporter>,
    listeners: Mutex<HashMap<u16, ListenerState>>,
}

impl UdpProxyManager {
    pub fn new(listen_ip: String, buffer_size: usize, client_timeout: Duration, blocklist: BlocklistHandle, stats: Arc<StatsReporter>) -> Self {
        Self {
            listen_ip,
            buffer_size,
            client_timeout,
            blocklist,
            stats,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub async fn sync(&self, services: &[ServiceWire]) {
        let desired: HashMap<u16, &ServiceWire> = services.iter().filter(|s| s.protocol == Protocol::Udp).map(|s| (s.listen_port, s)).collect();

        let mut listeners = self.listeners.lock().await;

        let to_remove: Vec<u16> = listeners.keys().copied().filter(|port| !desired.contains_key(port)).collect();
        for port in to_remove {
            if let Some(state) = listeners.remove(&port) {
                state.cancel.cancel();
                let _ = state.join.await;
            }
        }

        for (port, service) in desired {
            if listeners.contains_key(&port) {
                continue;
            }
            let state = self.start_listener(port, service.backend_host.clone(), service.backend_port, service.id);
            listeners.insert(port, state);
        }
    }

    fn start_listener(&self, port: u16, backend_host: String, backend_port: u16, service_id: i64) -> ListenerState {
        let cancel = CancellationToken::new();
        let listen_ip = self.listen_ip.clone();
        let buffer_size = self.buffer_size;
        let client_timeout = self.client_timeout;
        let blocklist = self.blocklist.clone();
        let stats = self.stats.clone();
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let bind_addr = format!("{listen_ip}:{port}");
            let socket = match UdpSocket::bind(&bind_addr).await {
                Ok(s) => Arc::new(s),
                Err(err) => {
                    tracing::error!(%bind_addr, error = %err, "failed to bind UDP listener");
                    return;
                }
            };
            tracing::info!(%bind_addr, backend = %format!("{backend_host}:{backend_port}"), "UDP proxy listening");

            let sessions: Arc<Mutex<HashMap<SocketAddr, Session>>> = Arc::new(Mutex::new(HashMap::new()));
            let mut reap_tick = tokio::time::interval(REAP_INTERVAL);
            let mut buf = vec![0u8; buffer_size];
            let mut flows: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let mut sessions = sessions.lock().await;
                        for (_, session) in sessions.drain() {
                            session.forward_cancel.cancel();
                            let duration = TokioInstant::now().duration_since(session.started).as_secs_f64();
                            emit_with_duration(&stats, session.service_id, &session.client_ip, "closed", session.bytes_sent, session.bytes_received, Some(duration));
                        }
                        tracing::info!(%bind_addr, "UDP listener stopping");
                        break;
                    }
                    _ = reap_tick.tick() => {
                        reap_idle_sessions(&sessions, client_timeout, &stats).await;
                    }
                    Some(result) = flows.join_next(), if !flows.is_empty() => {
                        if let Err(err) = result {
                            tracing::warn!(error = %err, "udp return-path task panicked");
                        }
                    }
                    received = socket.recv_from(&mut buf) => {
                        let (n, client_addr) = match received {
                            Ok(pair) => pair,
                            Err(err) => {
                                tracing::warn!(error = %err, "udp recv failed");
                                continue;
                            }
                        };

                        let client_ip = client_addr.ip().to_string();
                        if blocklist.contains(&client_ip) {
                            tracing::warn!(%client_ip, "blocked UDP datagram");
                            emit(&stats, service_id, &client_ip, "blocked", 0, 0);
                            continue;
                        }

                        let mut sessions_guard = sessions.lock().await;
                        if !sessions_guard.contains_key(&client_addr) {
                            match UdpSocket::bind("0.0.0.0:0").await {
                                Ok(upstream) => {
                                    if let Err(err) = upstream.connect((backend_host.clone(), backend_port)).await {
                                        tracing::warn!(%client_ip, error = %err, "udp upstream connect failed");
                                        emit(&stats, service_id, &client_ip, "error", 0, 0);
                                        continue;
                                    }
                                    let upstream = Arc::new(upstream);
                                    let forward_cancel = task_cancel.child_token();
                                    spawn_return_path(
                                        &mut flows,
                                        upstream.clone(),
                                        socket.clone(),
                                        client_addr,
                                        sessions.clone(),
                                        forward_cancel.clone(),
                                    );
                                    sessions_guard.insert(client_addr, Session {
                                        upstream,
                                        client_ip: client_ip.clone(),
                                        service_id,
                                        started: TokioInstant::now(),
                                        last_seen: TokioInstant::now(),
                                        bytes_sent: 0,
                                        bytes_received: 0,
                                        forward_cancel,
                                    });
                                }
                                Err(err) => {
                                    tracing::warn!(%client_ip, error = %err, "failed to allocate upstream socket");
                                    emit(&stats, service_id, &client_ip, "error", 0, 0);
                                    continue;
                                }
                            }
                        }

                        if let Some(session) = sessions_guard.get_mut(&client_addr) {
                            session.last_seen = TokioInstant::now();
                            if let Err(err) = session.upstream.send(&buf[..n]).await {
                                tracing::warn!(%client_ip, error = %err, "udp forward to backend failed");
                                continue;
                            }
                            session.bytes_sent += n as i64;
                        }
                    }
                }
            }

            tracing::debug!(%bind_addr, pending = flows.len(), "draining in-flight UDP return paths");
            while let Some(result) = flows.join_next().await {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "udp return-path task panicked");
                }
            }
        });

        ListenerState { cancel, join }
    }

    pub async fn shutdown(&self) {
        let mut listeners = self.listeners.lock().await;
        for (_, state) in listeners.drain() {
            state.cancel.cancel();
            let _ = state.join.await;
        }
    }
}

/// Copies backend responses back to the originating client for the
/// lifetime of a session; exits when the session is evicted or the
/// listener shuts down. Tracked in `flows` so the listener task can drain
/// it before returning.
fn spawn_return_path(
    flows: &mut JoinSet<()>,
    upstream: Arc<UdpSocket>,
    client_socket: Arc<UdpSocket>,
    client_addr: SocketAddr,
    sessions: Arc<Mutex<HashMap<SocketAddr, Session>>>,
    cancel: CancellationToken,
) {
    flows.spawn(async move {
        let mut buf = vec![0u8; 65_507];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                received = upstream.recv(&mut buf) => {
                    let n = match received {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    if client_socket.send_to(&buf[..n], client_addr).await.is_err() {
                        return;
                    }
                    let mut sessions = sessions.lock().await;
                    if let Some(session) = sessions.get_mut(&client_addr) {
                        session.last_seen = TokioInstant::now();
                        session.bytes_received += n as i64;
                    }
                }
            }
        }
    });
}

async fn reap_idle_sessions(sessions: &Arc<Mutex<HashMap<SocketAddr, Session>>>, client_timeout: Duration, stats: &StatsReporter) {
    let mut sessions = sessions.lock().await;
    let now = TokioInstant::now();
    let expired: Vec<SocketAddr> = sessions
        .iter()
        .filter(|(_, session)| now.duration_since(session.last_seen) > client_timeout)
        .map(|(addr, _)| *addr)
        .collect();

    for addr in expired {
        if let Some(session) = sessions.remove(&addr) {
            session.forward_cancel.cancel();
            let duration = now.duration_since(session.started).as_secs_f64();
            emit_with_duration(stats, session.service_id, &session.client_ip, "timeout", session.bytes_sent, session.bytes_received, Some(duration));
            tracing::debug!(client = %addr, "reaped idle UDP session");
        }
    }
}

fn emit(stats: &StatsReporter, service_id: i64, client_ip: &str, status: &'static str, bytes_sent: i64, bytes_received: i64) {
    emit_with_duration(stats, service_id, client_ip, status, bytes_sent, bytes_received, None);
}

fn emit_with_duration(
    stats: &StatsReporter,
    service_id: i64,
    client_ip: &str,
    status: &'static str,
    bytes_sent: i64,
    bytes_received: i64,
    duration: Option<f64>,
) {
    stats.record(EmittedStat {
        service_id: Some(service_id),
        client_ip: client_ip.to_string(),
        status,
        duration,
        bytes_sent,
        bytes_received,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> Arc<StatsReporter> {
        Arc::new(StatsReporter::new(1, "http://localhost".into(), 100, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn blocked_client_produces_blocked_stat_without_forwarding() {
        let blocklist = BlocklistHandle::new();
        blocklist.swap(vec!["127.0.0.1".to_string()]);
        let stats = reporter();

        emit(&stats, 1, "127.0.0.1", "blocked", 0, 0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, "blocked");
    }

    #[tokio::test]
    async fn reap_idle_sessions_evicts_past_client_timeout_and_emits_timeout_stat() {
        let stats = reporter();
        let upstream = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let sessions = Arc::new(Mutex::new(HashMap::new()));
        sessions.lock().await.insert(
            addr,
            Session {
                upstream,
                client_ip: "127.0.0.1".to_string(),
                service_id: 7,
                started: TokioInstant::now(),
                last_seen: TokioInstant::now() - Duration::from_secs(1),
                bytes_sent: 12,
                bytes_received: 0,
                forward_cancel: CancellationToken::new(),
            },
        );

        reap_idle_sessions(&sessions, Duration::from_millis(100), &stats).await;

        assert!(sessions.lock().await.is_empty());
        let snapshot = stats.snapshot();
        let stat = snapshot.last().unwrap();
        assert_eq!(stat.status, "timeout");
        assert_eq!(stat.bytes_sent, 12);
        assert!(stat.duration.is_some());
    }

    #[tokio::test]
    async fn sync_starts_and_stops_listeners_by_port_diff() {
        let blocklist = BlocklistHandle::new();
        let stats = reporter();
        let manager = UdpProxyManager::new("127.0.0.1".into(), 2048, DEFAULT_CLIENT_TIMEOUT, blocklist, stats);

        let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();
        drop(backend);

        let services = vec![ServiceWire {
            id: 1,
            name: "dns".into(),
            listen_port: 0,
            backend_host: backend_addr.ip().to_string(),
            backend_port: backend_addr.port(),
            protocol: Protocol::Udp,
        }];

        manager.sync(&services).await;
        assert_eq!(manager.listeners.lock().await.len(), 1);

        manager.sync(&[]).await;
        assert_eq!(manager.listeners.lock().await.len(), 0);
    }
}
