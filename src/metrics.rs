//! Prometheus-compatible metrics endpoint
//!
//! Exposes session counters in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for one or more sessions
#[derive(Debug)]
pub struct SessionMetrics {
    // Roster
    pub active_peers: AtomicU64,
    pub connections_active: AtomicU64,
    pub peers_joined: AtomicU64,
    pub peers_left: AtomicU64,

    // Traffic
    pub packages_sent: AtomicU64,
    pub packages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub decode_errors: AtomicU64,

    // Voice
    pub calls_placed: AtomicU64,
    pub calls_answered: AtomicU64,

    // Flush timing (microseconds)
    pub flush_count: AtomicU64,
    pub flush_time_us: AtomicU64,
    pub flush_time_p95_us: AtomicU64,

    start_time: Instant,

    // Rolling flush times for percentile calculation
    flush_history: RwLock<VecDeque<u64>>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            active_peers: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            peers_joined: AtomicU64::new(0),
            peers_left: AtomicU64::new(0),
            packages_sent: AtomicU64::new(0),
            packages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            calls_placed: AtomicU64::new(0),
            calls_answered: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
            flush_time_us: AtomicU64::new(0),
            flush_time_p95_us: AtomicU64::new(0),
            start_time: Instant::now(),
            flush_history: RwLock::new(VecDeque::with_capacity(256)),
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        self.packages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.packages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record how long one flush took and update the p95
    pub fn record_flush_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.flush_time_us.store(us, Ordering::Relaxed);
        self.flush_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.flush_history.write();
        history.push_back(us);
        while history.len() > 256 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.flush_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("peer_session_active_peers", "Remote peers with an avatar", "gauge",
            self.active_peers.load(Ordering::Relaxed));
        metric!("peer_session_connections", "Open data connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("peer_session_peers_joined_total", "Peers that joined", "counter",
            self.peers_joined.load(Ordering::Relaxed));
        metric!("peer_session_peers_left_total", "Peers that left or were kicked", "counter",
            self.peers_left.load(Ordering::Relaxed));

        metric!("peer_session_packages_sent_total", "Packages sent", "counter",
            self.packages_sent.load(Ordering::Relaxed));
        metric!("peer_session_packages_received_total", "Packages received", "counter",
            self.packages_received.load(Ordering::Relaxed));
        metric!("peer_session_bytes_sent_total", "Bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("peer_session_bytes_received_total", "Bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("peer_session_decode_errors_total", "Inbound packages that failed to decode", "counter",
            self.decode_errors.load(Ordering::Relaxed));

        metric!("peer_session_calls_placed_total", "Voice calls placed", "counter",
            self.calls_placed.load(Ordering::Relaxed));
        metric!("peer_session_calls_answered_total", "Voice calls answered", "counter",
            self.calls_answered.load(Ordering::Relaxed));

        metric!("peer_session_flush_count", "Outbound flushes", "counter",
            self.flush_count.load(Ordering::Relaxed));
        metric!("peer_session_flush_time_microseconds", "Last flush time", "gauge",
            self.flush_time_us.load(Ordering::Relaxed));
        metric!("peer_session_flush_time_p95_microseconds", "95th percentile flush time", "gauge",
            self.flush_time_p95_us.load(Ordering::Relaxed));

        metric!("peer_session_uptime_seconds", "Process uptime", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "roster": {
                "active_peers": self.active_peers.load(Ordering::Relaxed),
                "connections": self.connections_active.load(Ordering::Relaxed),
                "joined": self.peers_joined.load(Ordering::Relaxed),
                "left": self.peers_left.load(Ordering::Relaxed),
            },
            "network": {
                "packages_sent": self.packages_sent.load(Ordering::Relaxed),
                "packages_received": self.packages_received.load(Ordering::Relaxed),
                "bytes_sent": self.bytes_sent.load(Ordering::Relaxed),
                "bytes_received": self.bytes_received.load(Ordering::Relaxed),
                "decode_errors": self.decode_errors.load(Ordering::Relaxed),
            },
            "voice": {
                "calls_placed": self.calls_placed.load(Ordering::Relaxed),
                "calls_answered": self.calls_answered.load(Ordering::Relaxed),
            },
            "flush": {
                "count": self.flush_count.load(Ordering::Relaxed),
                "time_us": self.flush_time_us.load(Ordering::Relaxed),
                "time_p95_us": self.flush_time_p95_us.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<SessionMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    // /metrics/json must be matched before /metrics
                    let response = if request.starts_with("GET /metrics/json") {
                        let body = metrics.to_json();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") {
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK".to_string()
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = SessionMetrics::new();
        assert_eq!(metrics.packages_sent.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.flush_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_traffic() {
        let metrics = SessionMetrics::new();
        metrics.record_sent(100);
        metrics.record_sent(50);
        metrics.record_received(20);

        assert_eq!(metrics.packages_sent.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.bytes_sent.load(Ordering::Relaxed), 150);
        assert_eq!(metrics.packages_received.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.bytes_received.load(Ordering::Relaxed), 20);
    }

    #[test]
    fn test_record_flush_time() {
        let metrics = SessionMetrics::new();
        for i in 0..100 {
            metrics.record_flush_time(Duration::from_micros(10 + i));
        }

        assert_eq!(metrics.flush_count.load(Ordering::Relaxed), 100);
        assert!(metrics.flush_time_p95_us.load(Ordering::Relaxed) >= 100);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = SessionMetrics::new();
        metrics.active_peers.store(3, Ordering::Relaxed);
        metrics.record_sent(10);

        let output = metrics.to_prometheus();

        assert!(output.contains("peer_session_active_peers 3"));
        assert!(output.contains("peer_session_packages_sent_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = SessionMetrics::new();
        metrics.peers_joined.store(4, Ordering::Relaxed);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["roster"]["joined"], 4);
        assert!(value["network"].is_object());
    }
}
