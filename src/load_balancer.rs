//! HTTP load balancer front-end module (spec §4.10)
//!
//! Listens on `frontend_listen`, accepts both plain proxied HTTP requests
//! and CONNECT tunnels, dials the selected backend's SOCKS5 endpoint, and
//! retries across alternates on a connection-level failure. Once any
//! response byte has reached the client (or a CONNECT tunnel has been
//! confirmed), failures are no longer retryable - they just end the
//! connection, same as any other mid-stream I/O error.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::backend_pool::ProxyBackendPool;
use crate::error::ProxyError;
use crate::socks5;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "proxy-authorization",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[derive(Debug, Default)]
pub struct LoadBalancerStats {
    pub requests_total: AtomicU64,
    pub requests_failed: AtomicU64,
}

pub struct HTTPLoadBalancer {
    listen_addr: String,
    backend_pool: Arc<ProxyBackendPool>,
    retry_attempts: usize,
    stats: Arc<LoadBalancerStats>,
}

impl HTTPLoadBalancer {
    pub fn new(listen_addr: String, backend_pool: Arc<ProxyBackendPool>, retry_attempts: usize) -> Self {
        Self {
            listen_addr,
            backend_pool,
            retry_attempts,
            stats: Arc::new(LoadBalancerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<LoadBalancerStats> {
        Arc::clone(&self.stats)
    }

    /// Binds the listener and serves until `shutdown` fires. Stops accepting
    /// new connections as soon as the signal arrives; in-flight requests are
    /// left to the caller's grace window (see `integrator`).
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ProxyError> {
        let addr: SocketAddr = self.listen_addr.parse().map_err(|e| {
            ProxyError::Config(format!("invalid frontend_listen {}: {e}", self.listen_addr))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::ListenerBind {
                addr: addr.to_string(),
                source,
            })?;

        log::info!("HTTP load balancer listening on {addr}");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let pool = Arc::clone(&self.backend_pool);
                            let stats = Arc::clone(&self.stats);
                            let retry_attempts = self.retry_attempts;
                            tokio::spawn(async move {
                                stats.requests_total.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = handle_connection(stream, pool, retry_attempts).await {
                                    stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                                    log::debug!("request from {peer} failed: {e}");
                                }
                            });
                        }
                        Err(e) => log::warn!("accept failed: {e}"),
                    }
                }
                _ = shutdown.recv() => {
                    log::info!("load balancer received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        Ok(())
    }
}

struct ParsedRequest {
    method: String,
    target: String,
    is_connect: bool,
    headers: Vec<(String, String)>,
}

async fn read_request_head(
    reader: &mut BufReader<TcpStream>,
) -> Result<ParsedRequest, ProxyError> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| ProxyError::ClientProtocol(format!("reading request line: {e}")))?;
    let line = line.trim_end();
    if line.is_empty() {
        return Err(ProxyError::ClientProtocol("empty request line".to_string()));
    }

    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or_else(|| ProxyError::ClientProtocol("missing method".to_string()))?.to_string();
    let target = parts.next().ok_or_else(|| ProxyError::ClientProtocol("missing target".to_string()))?.to_string();
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(ProxyError::ClientProtocol(format!("unsupported version {version}")));
    }

    let is_connect = method.eq_ignore_ascii_case("CONNECT");

    let mut headers = Vec::new();
    loop {
        let mut header_line = String::new();
        reader
            .read_line(&mut header_line)
            .await
            .map_err(|e| ProxyError::ClientProtocol(format!("reading headers: {e}")))?;
        let trimmed = header_line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        match trimmed.split_once(':') {
            Some((name, value)) => headers.push((name.trim().to_string(), value.trim().to_string())),
            None => return Err(ProxyError::ClientProtocol(format!("malformed header: {trimmed}"))),
        }
    }

    Ok(ParsedRequest {
        method,
        target,
        is_connect,
        headers,
    })
}

fn parse_connect_target(target: &str) -> Result<(String, u16), ProxyError> {
    target
        .rsplit_once(':')
        .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h.to_string(), p)))
        .ok_or_else(|| ProxyError::ClientProtocol(format!("malformed CONNECT target: {target}")))
}

fn parse_absolute_uri(target: &str) -> Result<(String, u16, String), ProxyError> {
    let rest = target
        .strip_prefix("http://")
        .ok_or_else(|| ProxyError::ClientProtocol(format!("only absolute http URIs are supported: {target}")))?;

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().map_err(|_| ProxyError::ClientProtocol(format!("bad port in {authority}")))?),
        None => (authority.to_string(), 80u16),
    };

    Ok((host, port, path.to_string()))
}

async fn handle_connection(
    stream: TcpStream,
    pool: Arc<ProxyBackendPool>,
    retry_attempts: usize,
) -> Result<(), ProxyError> {
    let mut reader = BufReader::new(stream);
    let request = match read_request_head(&mut reader).await {
        Ok(request) => request,
        Err(e @ ProxyError::ClientProtocol(_)) => {
            let mut stream = reader.into_inner();
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    if request.is_connect {
        handle_connect(reader, &request.target, &pool, retry_attempts).await
    } else {
        handle_plain_http(reader, &request, &pool, retry_attempts).await
    }
}

async fn handle_connect(
    mut reader: BufReader<TcpStream>,
    target: &str,
    pool: &ProxyBackendPool,
    retry_attempts: usize,
) -> Result<(), ProxyError> {
    let (host, port) = parse_connect_target(target)?;
    let mut exclude = HashSet::new();
    let mut last_error: Option<ProxyError> = None;

    for _ in 0..retry_attempts {
        let backend = match pool.pick(&exclude) {
            Some(b) => b,
            None => break,
        };

        match socks5::connect(&backend.socks_endpoint, &host, port).await {
            Ok(mut backend_stream) => {
                pool.mark_success(backend.worker_id);
                reader
                    .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                    .await
                    .map_err(|e| ProxyError::UpstreamTimeout(e.to_string()))?;

                let mut client_stream = reader.into_inner();
                io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                    .await
                    .map_err(|e| ProxyError::UpstreamTimeout(e.to_string()))?;
                return Ok(());
            }
            Err(e) => {
                pool.mark_failure(backend.worker_id);
                exclude.insert(backend.worker_id);
                log::debug!("CONNECT via worker {} failed: {e}", backend.worker_id);
                last_error = Some(e);
            }
        }
    }

    let mut client_stream = reader.into_inner();
    let response = gateway_failure_response(last_error.as_ref());
    let _ = client_stream.write_all(response.as_bytes()).await;
    Ok(())
}

/// Picks the terminal response for a CONNECT/plain-HTTP request that
/// exhausted every retry without a successful backend dial: `504` when the
/// last failure was specifically a dial/handshake timeout, `502` for any
/// other backend failure.
fn gateway_failure_response(last_error: Option<&ProxyError>) -> String {
    let status = match last_error {
        Some(ProxyError::UpstreamTimeout(_)) => "504 Gateway Timeout",
        _ => "502 Bad Gateway",
    };
    format!("HTTP/1.1 {status}\r\nConnection: close\r\n\r\n")
}

async fn handle_plain_http(
    mut reader: BufReader<TcpStream>,
    request: &ParsedRequest,
    pool: &ProxyBackendPool,
    retry_attempts: usize,
) -> Result<(), ProxyError> {
    let (host, port, path) = parse_absolute_uri(&request.target)?;

    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, path);
    let mut saw_host = false;
    for (name, value) in &request.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if name.eq_ignore_ascii_case("host") {
            saw_host = true;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !saw_host {
        head.push_str(&format!("Host: {host}\r\n"));
    }
    head.push_str("Connection: close\r\n\r\n");

    let mut exclude = HashSet::new();
    let mut last_error: Option<ProxyError> = None;

    for _ in 0..retry_attempts {
        let backend = match pool.pick(&exclude) {
            Some(b) => b,
            None => break,
        };

        match socks5::connect(&backend.socks_endpoint, &host, port).await {
            Ok(mut backend_stream) => {
                if let Err(e) = backend_stream.write_all(head.as_bytes()).await {
                    pool.mark_failure(backend.worker_id);
                    exclude.insert(backend.worker_id);
                    log::debug!("request write to worker {} failed: {e}", backend.worker_id);
                    last_error = Some(ProxyError::UpstreamTimeout(e.to_string()));
                    continue;
                }

                // Forward any body bytes already buffered from the client
                // (pipelined request bodies read while parsing headers).
                let buffered = reader.buffer().to_vec();
                if !buffered.is_empty() {
                    let _ = backend_stream.write_all(&buffered).await;
                }

                pool.mark_success(backend.worker_id);
                let mut client_stream = reader.into_inner();
                io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                    .await
                    .map_err(|e| ProxyError::UpstreamTimeout(e.to_string()))?;
                return Ok(());
            }
            Err(e) => {
                pool.mark_failure(backend.worker_id);
                exclude.insert(backend.worker_id);
                log::debug!("dial via worker {} failed: {e}", backend.worker_id);
                last_error = Some(e);
            }
        }
    }

    let mut client_stream = reader.into_inner();
    let response = gateway_failure_response(last_error.as_ref());
    let _ = client_stream.write_all(response.as_bytes()).await;
    Ok(())
}
