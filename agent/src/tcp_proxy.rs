//! TCP forwarding data plane: one listener per `(listen_port, tcp)`, two
//! concurrent unidirectional copiers per accepted connection (spec §4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use nekoproxy_common::ServiceWire;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::blocklist::BlocklistHandle;
use crate::stats_reporter::{EmittedStat, StatsReporter};

struct ListenerHandle {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

pub struct TcpProxyManager {
    listen_ip: String,
    buffer_size: usize,
    connection_timeout: Duration,
    blocklist: BlocklistHandle,
    stats: Arc<StatsReporter>,
    listeners: Mutex<HashMap<u16, ListenerHandle>>,
    active_connections: Arc<AtomicI64>,
}

impl TcpProxyManager {
    pub fn new(listen_ip: String, buffer_size: usize, connection_timeout: Duration, blocklist: BlocklistHandle, stats: Arc<StatsReporter>) -> Self {
        Self {
            listen_ip,
            buffer_size,
            connection_timeout,
            blocklist,
            stats,
            listeners: Mutex::new(HashMap::new()),
            active_connections: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn active_connection_count(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Diffs `services` (tcp only) against running listeners on
    /// `listen_port` and reconciles: stop removed, start added, leave
    /// unchanged ports untouched (spec §4.2, §9 listener-identity note).
    pub async fn sync(&self, services: &[ServiceWire]) {
        let desired: HashMap<u16, &ServiceWire> = services
            .iter()
            .filter(|s| s.protocol == nekoproxy_common::Protocol::Tcp)
            .map(|s| (s.listen_port, s))
            .collect();

        let mut listeners = self.listeners.lock().await;

        let to_remove: Vec<u16> = listeners.keys().copied().filter(|port| !desired.contains_key(port)).collect();
        for port in to_remove {
            if let Some(handle) = listeners.remove(&port) {
                stop_listener(handle).await;
            }
        }

        for (port, service) in desired {
            if listeners.contains_key(&port) {
                continue;
            }
            let handle = self.start_listener(port, service);
            listeners.insert(port, handle);
        }
    }

    fn start_listener(&self, port: u16, service: &ServiceWire) -> ListenerHandle {
        let cancel = CancellationToken::new();
        let listen_ip = self.listen_ip.clone();
        let backend_host = service.backend_host.clone();
        let backend_port = service.backend_port;
        let service_id = service.id;
        let buffer_size = self.buffer_size;
        let connection_timeout = self.connection_timeout;
        let blocklist = self.blocklist.clone();
        let stats = self.stats.clone();
        let active_connections = self.active_connections.clone();
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let bind_addr = format!("{listen_ip}:{port}");
            let listener = match TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(err) => {
                    tracing::error!(%bind_addr, error = %err, "failed to bind TCP listener");
                    return;
                }
            };
            tracing::info!(%bind_addr, backend = %format!("{backend_host}:{backend_port}"), "TCP proxy listening");

            let mut flows: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        tracing::info!(%bind_addr, "TCP listener stopping");
                        break;
                    }
                    accepted = listener.accept() => {
                        let (socket, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                tracing::warn!(error = %err, "accept failed");
                                continue;
                            }
                        };
                        let backend_host = backend_host.clone();
                        let blocklist = blocklist.clone();
                        let stats = stats.clone();
                        let active_connections = active_connections.clone();
                        let flow_cancel = task_cancel.child_token();
                        flows.spawn(async move {
                            active_connections.fetch_add(1, Ordering::Relaxed);
                            handle_connection(
                                socket,
                                peer,
                                service_id,
                                backend_host,
                                backend_port,
                                buffer_size,
                                connection_timeout,
                                blocklist,
                                stats,
                                flow_cancel,
                            )
                            .await;
                            active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Some(result) = flows.join_next(), if !flows.is_empty() => {
                        if let Err(err) = result {
                            tracing::warn!(error = %err, "tcp flow task panicked");
                        }
                    }
                }
            }

            tracing::debug!(%bind_addr, pending = flows.len(), "draining in-flight TCP flows");
            while let Some(result) = flows.join_next().await {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "tcp flow task panicked");
                }
            }
        });

        ListenerHandle { cancel, join }
    }

    /// Stops all listeners, draining accept loops and in-flight flows.
    pub async fn shutdown(&self) {
        let mut listeners = self.listeners.lock().await;
        for (_, handle) in listeners.drain() {
            stop_listener(handle).await;
        }
    }
}

async fn stop_listener(handle: ListenerHandle) {
    handle.cancel.cancel();
    let _ = handle.join.await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    mut client: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    service_id: i64,
    backend_host: String,
    backend_port: u16,
    buffer_size: usize,
    connection_timeout: Duration,
    blocklist: BlocklistHandle,
    stats: Arc<StatsReporter>,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let client_ip = peer.ip().to_string();

    if blocklist.contains(&client_ip) {
        tracing::warn!(%client_ip, "blocked TCP connection");
        let _ = client.shutdown().await;
        emit(&stats, service_id, &client_ip, "blocked", start, 0, 0);
        return;
    }

    let backend_addr = format!("{backend_host}:{backend_port}");
    let connect = tokio::time::timeout(connection_timeout, tokio::net::TcpStream::connect(&backend_addr)).await;

    let mut backend = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            let status = if err.kind() == std::io::ErrorKind::ConnectionRefused { "refused" } else { "error" };
            tracing::warn!(%client_ip, %backend_addr, error = %err, "backend connect failed");
            let _ = client.shutdown().await;
            emit(&stats, service_id, &client_ip, status, start, 0, 0);
            return;
        }
        Err(_) => {
            tracing::warn!(%client_ip, %backend_addr, "backend connect timed out");
            let _ = client.shutdown().await;
            emit(&stats, service_id, &client_ip, "timeout", start, 0, 0);
            return;
        }
    };

    let (mut client_r, mut client_w) = client.split();
    let (mut backend_r, mut backend_w) = backend.split();

    let bytes_sent = Arc::new(AtomicI64::new(0));
    let bytes_received = Arc::new(AtomicI64::new(0));

    let c2b = copy_direction(&mut client_r, &mut backend_w, buffer_size, bytes_sent.clone());
    let b2c = copy_direction(&mut backend_r, &mut client_w, buffer_size, bytes_received.clone());

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = c2b => {}
        _ = b2c => {}
    }

    let _ = client_w.shutdown().await;
    let _ = backend_w.shutdown().await;

    emit(
        &stats,
        service_id,
        &client_ip,
        "completed",
        start,
        bytes_sent.load(Ordering::Relaxed),
        bytes_received.load(Ordering::Relaxed),
    );
}

async fn copy_direction<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize, counter: Arc<AtomicI64>)
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(err) if is_benign_close(&err) => return,
            Err(err) => {
                tracing::debug!(error = %err, "forward error");
                return;
            }
        };
        if writer.write_all(&buf[..n]).await.is_err() {
            return;
        }
        counter.fetch_add(n as i64, Ordering::Relaxed);
    }
}

fn is_benign_close(err: &std::io::Error) -> bool {
    matches!(err.kind(), std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe)
}

fn emit(stats: &StatsReporter, service_id: i64, client_ip: &str, status: &'static str, start: Instant, bytes_sent: i64, bytes_received: i64) {
    stats.record(EmittedStat {
        service_id: Some(service_id),
        client_ip: client_ip.to_string(),
        status,
        duration: Some(start.elapsed().as_secs_f64()),
        bytes_sent,
        bytes_received,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener as StdTcpListener;

    fn reporter() -> Arc<StatsReporter> {
        Arc::new(StatsReporter::new(1, "http://localhost".into(), 100, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn blocked_client_gets_zero_bytes_and_blocked_status() {
        let blocklist = BlocklistHandle::new();
        blocklist.swap(vec!["127.0.0.1".to_string()]);
        let stats = reporter();

        let echo = StdTcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = echo.accept().await;
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let accept_stats = stats.clone();
        let accept_task = tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            handle_connection(
                socket,
                peer,
                1,
                backend_addr.ip().to_string(),
                backend_addr.port(),
                1024,
                Duration::from_secs(1),
                blocklist,
                accept_stats,
                cancel,
            )
            .await;
        });

        let _client_conn = tokio::net::TcpStream::connect(listen_addr).await.unwrap();
        accept_task.await.unwrap();

        let snapshot = stats.snapshot();
        let stat = snapshot.last().unwrap();
        assert_eq!(stat.status, "blocked");
        assert_eq!(stat.bytes_sent, 0);
    }
}
