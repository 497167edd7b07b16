//! Bounded stats FIFO with batched upload and retry-to-head semantics
//! (spec §4.6).

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use nekoproxy_common::{ConnectionStatWire, StatsIntakeRequest};
use tokio_util::sync::CancellationToken;

const QUEUE_CAPACITY: usize = 10_000;

/// One emitted connection record, agent-side representation mirroring the
/// wire shape but with a native timestamp.
#[derive(Debug, Clone)]
pub struct EmittedStat {
    pub service_id: Option<i64>,
    pub client_ip: String,
    pub status: &'static str,
    pub duration: Option<f64>,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub timestamp: DateTime<Utc>,
}

impl EmittedStat {
    fn into_wire(self) -> ConnectionStatWire {
        ConnectionStatWire {
            service_id: self.service_id,
            client_ip: self.client_ip,
            status: self.status.to_string(),
            duration: self.duration,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            timestamp: Some(self.timestamp.to_rfc3339()),
        }
    }
}

pub struct StatsReporter {
    agent_id: i64,
    controller_url: String,
    batch_size: usize,
    report_interval: std::time::Duration,
    client: reqwest::Client,
    queue: Mutex<VecDeque<EmittedStat>>,
}

impl StatsReporter {
    pub fn new(agent_id: i64, controller_url: String, batch_size: usize, report_interval: std::time::Duration) -> Self {
        Self {
            agent_id,
            controller_url,
            batch_size,
            report_interval,
            client: reqwest::Client::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Non-blocking; drops the oldest entry on overflow (spec invariant 4).
    pub fn record(&self, stat: EmittedStat) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= QUEUE_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(stat);
    }

    fn take_batch(&self) -> Vec<EmittedStat> {
        let mut queue = self.queue.lock().unwrap();
        let n = self.batch_size.min(queue.len());
        queue.drain(..n).collect()
    }

    fn prepend(&self, mut batch: Vec<EmittedStat>) {
        let mut queue = self.queue.lock().unwrap();
        for stat in batch.drain(..).rev() {
            queue.push_front(stat);
        }
    }

    async fn send_batch(&self) {
        let batch = self.take_batch();
        if batch.is_empty() {
            return;
        }

        let request = StatsIntakeRequest {
            agent_id: self.agent_id,
            connections: batch.iter().cloned().map(EmittedStat::into_wire).collect(),
        };

        let url = format!("{}/api/v1/stats/connections", self.controller_url);
        match self.client.post(&url).json(&request).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(count = batch.len(), "reported connection stats");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "stats intake rejected batch, retrying next tick");
                self.prepend(batch);
            }
            Err(err) => {
                tracing::warn!(error = %err, "controller unreachable, retrying stats next tick");
                self.prepend(batch);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<EmittedStat> {
        self.queue.lock().unwrap().iter().cloned().collect()
    }

    pub async fn run(self: std::sync::Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.report_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("stats reporter flushing before shutdown");
                    self.send_batch().await;
                    return;
                }
                _ = interval.tick() => {
                    self.send_batch().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(client_ip: &str) -> EmittedStat {
        EmittedStat {
            service_id: Some(1),
            client_ip: client_ip.to_string(),
            status: "completed",
            duration: Some(0.1),
            bytes_sent: 1,
            bytes_received: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn record_drops_oldest_on_overflow() {
        let reporter = StatsReporter::new(1, "http://localhost".into(), 100, std::time::Duration::from_secs(60));
        for i in 0..QUEUE_CAPACITY + 5 {
            reporter.record(stat(&format!("10.0.0.{}", i % 255)));
        }
        let queue = reporter.queue.lock().unwrap();
        assert_eq!(queue.len(), QUEUE_CAPACITY);
    }

    #[test]
    fn take_batch_respects_batch_size() {
        let reporter = StatsReporter::new(1, "http://localhost".into(), 3, std::time::Duration::from_secs(60));
        for _ in 0..10 {
            reporter.record(stat("10.0.0.1"));
        }
        let batch = reporter.take_batch();
        assert_eq!(batch.len(), 3);
        assert_eq!(reporter.queue.lock().unwrap().len(), 7);
    }

    #[test]
    fn prepend_restores_original_order_at_head() {
        let reporter = StatsReporter::new(1, "http://localhost".into(), 100, std::time::Duration::from_secs(60));
        reporter.record(stat("10.0.0.1"));
        reporter.record(stat("10.0.0.2"));
        let batch = reporter.take_batch();
        reporter.record(stat("10.0.0.3"));
        reporter.prepend(batch);

        let queue = reporter.queue.lock().unwrap();
        let ips: Vec<_> = queue.iter().map(|s| s.client_ip.clone()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }
}
