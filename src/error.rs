//! Error taxonomy
//!
//! One `ProxyError` variant per failure kind named in the design's error
//! handling section. Component boundaries return `Result<_, ProxyError>`
//! rather than let ad-hoc `anyhow::Error`s cross into supervisory or
//! request-handling code; `anyhow` is still used internally for cheap
//! context-adding where the error never escapes a single function.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Directory-service fetch failed (network). Recoverable - pool proceeds
    /// without exit-node pinning.
    #[error("directory service unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Directory-service response could not be parsed. Recoverable.
    #[error("directory service response malformed: {0}")]
    DirectoryMalformed(String),

    /// Worker subprocess could not be spawned (binary missing/not executable).
    #[error("worker {worker_id} failed to spawn: {reason}")]
    Spawn { worker_id: usize, reason: String },

    /// Worker did not become ready within the startup timeout.
    #[error("worker {worker_id} startup timed out after {elapsed_ms}ms")]
    StartupTimeout { worker_id: usize, elapsed_ms: u64 },

    /// Worker subprocess exited before reaching the ready state.
    #[error("worker {worker_id} exited before becoming ready (status: {status})")]
    UnexpectedExit { worker_id: usize, status: String },

    /// A single health probe failed.
    #[error("worker {worker_id} probe failed: {reason}")]
    Probe { worker_id: usize, reason: String },

    /// Dialing a backend's SOCKS5 endpoint failed.
    #[error("backend dial failed: {0}")]
    BackendDial(String),

    /// SOCKS5 handshake/negotiation with a backend failed.
    #[error("SOCKS5 negotiation failed: {0}")]
    SocksNegotiation(String),

    /// An upstream read/write exceeded its deadline.
    #[error("upstream operation timed out: {0}")]
    UpstreamTimeout(String),

    /// The front-end listener could not be bound. Fatal at startup.
    #[error("failed to bind listener on {addr}: {source}")]
    ListenerBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The client sent a request the front-end could not parse.
    #[error("malformed client request: {0}")]
    ClientProtocol(String),

    /// Every worker failed to start during the initial pool startup. Fatal.
    #[error("all workers failed to start")]
    AllWorkersFailed,
}

impl ProxyError {
    /// Process exit code this error should surface as (spec §6), for the
    /// variants that are fatal at the top level. Per-request and per-worker
    /// errors never reach this far - they are absorbed by PoolManager /
    /// HTTPLoadBalancer.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProxyError::AllWorkersFailed => 2,
            ProxyError::ListenerBind { .. } => 3,
            _ => 1,
        }
    }
}
