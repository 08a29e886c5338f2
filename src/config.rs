//! Configuration file management module
//!
//! Handles YAML configuration file parsing, validation, and default values.
//! Uses Serde to declaratively define the configuration structure, with
//! strong validation separated into `Config::validate`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::{
    get_home_config_path, get_system_config_path, DEFAULT_RETRY_ATTEMPTS, DEFAULT_START_BATCH,
    DEFAULT_WORKER_STARTUP_TIMEOUT_SECS,
};
use crate::error::ProxyError;

fn default_start_batch() -> usize {
    DEFAULT_START_BATCH
}

fn default_retry_attempts() -> usize {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_worker_startup_timeout_secs() -> u64 {
    DEFAULT_WORKER_STARTUP_TIMEOUT_SECS
}

fn default_exit_nodes_max() -> usize {
    usize::MAX
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_health_timeout_secs() -> u64 {
    5
}

/// Process-wide, read-only configuration (spec §3 "Configuration").
///
/// Durations are stored as whole seconds in the YAML representation and
/// exposed as `std::time::Duration` through accessor methods, the same split
/// the teacher repo uses for its own socket-address fields (stored as
/// strings, parsed on demand).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of worker processes to supervise. 1 <= worker_count <= 400.
    pub worker_count: usize,

    /// Lowest port in the allocation window (used for both SOCKS and control
    /// ports; see `port_allocator`).
    pub base_port: u16,
    /// Highest usable port in the allocation window.
    pub max_port: u16,

    /// Max parallel worker spawns per startup batch.
    #[serde(default = "default_start_batch")]
    pub start_batch: usize,

    /// Number of exit relays pinned to each worker. 0 disables pinning.
    #[serde(default)]
    pub exit_nodes_per_worker: usize,
    /// Global cap on relays fetched from the directory service.
    #[serde(default = "default_exit_nodes_max")]
    pub exit_nodes_max: usize,
    /// Optional set of two-letter country codes to filter relays by.
    #[serde(default)]
    pub exit_node_countries: Option<HashSet<String>>,
    /// Directory-service URL to fetch relay metadata from.
    pub directory_url: Option<String>,

    /// URL used for end-to-end health probes through each worker.
    pub health_check_url: String,
    /// Seconds between health-probe cycles.
    #[serde(
        rename = "health_interval_secs",
        default = "default_health_interval_secs"
    )]
    pub health_interval_secs: u64,
    /// Per-probe timeout in seconds.
    #[serde(
        rename = "health_timeout_secs",
        default = "default_health_timeout_secs"
    )]
    pub health_timeout_secs: u64,

    /// host:port the HTTP load balancer listens on.
    pub frontend_listen: String,

    /// Max distinct backends tried per client request.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    /// Seconds a failed backend is skipped for.
    #[serde(rename = "cooldown_secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Path to the worker binary executable.
    pub worker_binary_path: PathBuf,
    /// Seconds allowed for a worker to become ready before it is marked failed.
    #[serde(
        rename = "worker_startup_timeout_secs",
        default = "default_worker_startup_timeout_secs"
    )]
    pub worker_startup_timeout_secs: u64,

    /// Root directory under which each worker's data directory is created.
    pub data_dir_root: PathBuf,
}

impl Config {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn worker_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_startup_timeout_secs)
    }

    /// Resolve configuration file path.
    ///
    /// Priority: (1) path specified via CLI argument, (2)
    /// `$HOME/.rotor/config.yaml`, (3) `/etc/rotor/config.yaml`.
    pub fn resolve_config_path(cli_path: Option<&Path>) -> Result<PathBuf, ProxyError> {
        if let Some(path) = cli_path {
            return Ok(path.to_path_buf());
        }

        let home_path = get_home_config_path();
        if home_path.exists() {
            return Ok(home_path);
        }

        let system_path = get_system_config_path();
        if system_path.exists() {
            return Ok(system_path);
        }

        Ok(home_path)
    }

    /// Load configuration from file and validate it.
    pub async fn load(path: &Path) -> Result<Self, ProxyError> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            ProxyError::Config(format!(
                "cannot read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ProxyError::Config(format!(
                "failed to parse configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration (spec §4.1, §7 `ConfigError`).
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.worker_count == 0 || self.worker_count > 400 {
            return Err(ProxyError::Config(format!(
                "worker_count must be in 1..=400, got {}",
                self.worker_count
            )));
        }

        let required_ports = 2usize.saturating_mul(self.worker_count);
        let window = (self.max_port as usize).saturating_sub(self.base_port as usize) + 1;
        if required_ports > window {
            return Err(ProxyError::Config(format!(
                "port range [{}, {}] too small for {} workers (need {} ports)",
                self.base_port, self.max_port, self.worker_count, required_ports
            )));
        }

        if self.start_batch == 0 {
            return Err(ProxyError::Config(
                "start_batch must be at least 1".to_string(),
            ));
        }

        if self.frontend_listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ProxyError::Config(format!(
                "frontend_listen is not a valid socket address: {}",
                self.frontend_listen
            )));
        }

        if let Some(countries) = &self.exit_node_countries {
            for code in countries {
                if code.len() != 2 {
                    return Err(ProxyError::Config(format!(
                        "exit_node_countries entries must be two-letter codes, got {}",
                        code
                    )));
                }
            }
        }

        // The health monitor tunnels its probe through a worker's SOCKS port
        // and speaks raw HTTP/1.1 - it cannot terminate TLS, so an https://
        // health_check_url would fail every cycle and drive perpetual
        // restarts. Reject it here instead.
        if self.health_check_url.starts_with("https://") {
            return Err(ProxyError::Config(
                "health_check_url must be http:// (the health probe cannot terminate TLS)".to_string(),
            ));
        }

        Ok(())
    }

    /// Best-effort check that the worker binary exists and is executable.
    /// Used by `rotor check`; startup itself surfaces the same failure as a
    /// per-worker `SpawnError` (spec §4.5) rather than aborting early, since
    /// the binary could become available between check and start.
    pub fn worker_binary_is_executable(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            match std::fs::metadata(&self.worker_binary_path) {
                Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
                Err(_) => false,
            }
        }
        #[cfg(not(unix))]
        {
            self.worker_binary_path.is_file()
        }
    }
}
