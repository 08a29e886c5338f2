//! Health monitor module (spec §4.8)
//!
//! Runs a single logical loop at `health_interval`. Each cycle probes every
//! `ready` worker with an end-to-end HTTP GET tunneled through its SOCKS5
//! port. Consecutive failures beyond the threshold are reported to
//! PoolManager as `worker_unhealthy`; the monitor itself never kills
//! processes - restart is PoolManager's call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::constants::HEALTH_PROBE_MAX_CONSECUTIVE_FAILURES;
use crate::pool_manager::{PoolEvent, WorkerSnapshot};
use crate::socks5;
use crate::worker_process::WorkerState;

struct ProbeTarget {
    scheme_is_https: bool,
    host: String,
    port: u16,
    path: String,
}

fn parse_health_check_url(url: &str) -> ProbeTarget {
    let (scheme_is_https, rest) = if let Some(r) = url.strip_prefix("https://") {
        (true, r)
    } else if let Some(r) = url.strip_prefix("http://") {
        (false, r)
    } else {
        (false, url)
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(if scheme_is_https { 443 } else { 80 })),
        None => (authority.to_string(), if scheme_is_https { 443 } else { 80 }),
    };

    ProbeTarget {
        scheme_is_https,
        host,
        port,
        path: path.to_string(),
    }
}

pub struct HealthMonitor {
    health_check_url: String,
    interval: Duration,
    timeout: Duration,
    fan_out: usize,
}

impl HealthMonitor {
    pub fn new(health_check_url: String, interval: Duration, timeout: Duration, fan_out: usize) -> Self {
        Self {
            health_check_url,
            interval,
            timeout,
            fan_out: fan_out.max(1),
        }
    }

    /// Runs until `shutdown` fires. `pool_manager` is locked briefly each
    /// cycle to take a read-only snapshot of currently-ready workers;
    /// results are reported back via `events`.
    pub async fn run(
        &self,
        pool_manager: Arc<tokio::sync::Mutex<crate::pool_manager::PoolManager>>,
        events: mpsc::Sender<PoolEvent>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut failure_counts: HashMap<usize, u32> = HashMap::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let workers = pool_manager.lock().await.snapshot();
                    self.run_cycle(&workers, &mut failure_counts, &events).await;
                }
                _ = shutdown.recv() => {
                    log::info!("health monitor received shutdown signal");
                    break;
                }
            }
        }
    }

    async fn run_cycle(
        &self,
        workers: &[WorkerSnapshot],
        failure_counts: &mut HashMap<usize, u32>,
        events: &mpsc::Sender<PoolEvent>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let target = parse_health_check_url(&self.health_check_url);
        let probe_timeout = self.timeout;

        let mut handles = Vec::new();
        for worker in workers.iter().filter(|w| w.state == WorkerState::Ready) {
            let permit = Arc::clone(&semaphore);
            let endpoint = worker.socks_endpoint.clone();
            let host = target.host.clone();
            let path = target.path.clone();
            let port = target.port;
            let https = target.scheme_is_https;
            let worker_id = worker.id;

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                let ok = timeout(probe_timeout, probe_once(&endpoint, &host, port, &path, https))
                    .await
                    .map(|r| r.unwrap_or(false))
                    .unwrap_or(false);
                (worker_id, ok)
            }));
        }

        for handle in handles {
            if let Ok((worker_id, ok)) = handle.await {
                if ok {
                    failure_counts.insert(worker_id, 0);
                } else {
                    let count = failure_counts.entry(worker_id).or_insert(0);
                    *count += 1;
                    if *count >= HEALTH_PROBE_MAX_CONSECUTIVE_FAILURES {
                        log::warn!("worker {worker_id} failed {count} consecutive probes, marking unhealthy");
                        let _ = events.send(PoolEvent::WorkerUnhealthy(worker_id)).await;
                        failure_counts.insert(worker_id, 0);
                    }
                }
            }
        }
    }
}

/// Single probe: tunnel through the worker's SOCKS5 port, issue a raw
/// HTTP/1.1 GET, and check for a 2xx status line. We do not terminate TLS -
/// an `https://` health_check_url is refused explicitly to avoid a false
/// sense of end-to-end verification the worker's SOCKS tunnel cannot provide.
async fn probe_once(socks_endpoint: &str, host: &str, port: u16, path: &str, https: bool) -> bool {
    if https {
        log::warn!("health_check_url uses https, which this probe cannot terminate; treating as unreachable");
        return false;
    }

    let mut stream = match socks5::connect(socks_endpoint, host, port).await {
        Ok(s) => s,
        Err(_) => return false,
    };

    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n"
    );
    if stream.write_all(request.as_bytes()).await.is_err() {
        return false;
    }

    let mut buf = vec![0u8; 512];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(_) => return false,
    };

    status_is_2xx(&buf[..n])
}

fn status_is_2xx(response_head: &[u8]) -> bool {
    let line = match response_head.split(|&b| b == b'\n').next() {
        Some(l) => l,
        None => return false,
    };
    let line = String::from_utf8_lossy(line);
    let mut parts = line.split_whitespace();
    let _version = parts.next();
    match parts.next().and_then(|code| code.parse::<u16>().ok()) {
        Some(code) => (200..300).contains(&code),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_http_url_with_path() {
        let t = parse_health_check_url("http://example.test:8080/health");
        assert_eq!(t.host, "example.test");
        assert_eq!(t.port, 8080);
        assert_eq!(t.path, "/health");
        assert!(!t.scheme_is_https);
    }

    #[test]
    fn defaults_to_port_80_and_root_path() {
        let t = parse_health_check_url("http://example.test");
        assert_eq!(t.port, 80);
        assert_eq!(t.path, "/");
    }

    #[test]
    fn recognizes_https_scheme() {
        let t = parse_health_check_url("https://example.test/");
        assert!(t.scheme_is_https);
        assert_eq!(t.port, 443);
    }

    #[test]
    fn status_2xx_passes() {
        assert!(status_is_2xx(b"HTTP/1.1 200 OK\r\n"));
        assert!(status_is_2xx(b"HTTP/1.1 204 No Content\r\n"));
    }

    #[test]
    fn status_non_2xx_fails() {
        assert!(!status_is_2xx(b"HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(!status_is_2xx(b"HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn malformed_response_fails() {
        assert!(!status_is_2xx(b"garbage"));
        assert!(!status_is_2xx(b""));
    }
}
