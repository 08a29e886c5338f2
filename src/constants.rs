//! Constants definition module
//!
//! Centralizes constants used throughout the application.
//! This improves maintainability by requiring changes in only one place.

use std::path::PathBuf;

/// Application basic settings
pub const APP_NAME: &str = "rotor";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Defaults for configuration fields that may be omitted from the YAML file.
pub const DEFAULT_START_BATCH: usize = 20;
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_WORKER_STARTUP_TIMEOUT_SECS: u64 = 60;

/// Readiness probing: how often the SOCKS port is polled while a worker is
/// starting, and how long a single poll attempt may take.
pub const READINESS_POLL_INTERVAL_MS: u64 = 200;
pub const READINESS_CONNECT_TIMEOUT_MS: u64 = 500;

/// A worker is marked unhealthy after this many consecutive failed probes.
pub const HEALTH_PROBE_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Restart policy: linear backoff between restart attempts, capped, plus a
/// consecutive-failure quarantine threshold.
pub const RESTART_BACKOFF_STEP_MS: u64 = 1000;
pub const RESTART_BACKOFF_CAP_MS: u64 = 5000;
pub const RESTART_QUARANTINE_THRESHOLD: u32 = 5;

/// Directory-service fetch timeout (spec: at most 15s).
pub const DIRECTORY_FETCH_TIMEOUT_SECS: u64 = 15;

/// Worker stop grace period before force-kill.
pub const DEFAULT_STOP_GRACE_SECS: u64 = 5;

/// Graceful shutdown window for in-flight client requests.
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// SOCKS5 handshake default timeout when a caller doesn't supply its own.
pub const SOCKS_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

pub const CONFIG_FILENAME: &str = "config.yaml";

/// Configuration file resolution priority (highest first):
/// 1. Path specified via CLI argument
/// 2. $HOME/.rotor/config.yaml
/// 3. /etc/rotor/config.yaml
pub fn get_home_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".rotor").join(CONFIG_FILENAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME))
}

pub fn get_system_config_path() -> PathBuf {
    PathBuf::from("/etc/rotor").join(CONFIG_FILENAME)
}
