//! Worker configuration builder module (spec §4.4)
//!
//! Produces the on-disk config fragment and argv for a single worker, given
//! its id, ports, data directory, and assigned exit relays. Writes the
//! fragment to `data_dir/torrc` - no hidden defaults, everything the worker
//! binary needs lives in that one file.

use std::path::{Path, PathBuf};

use crate::port_allocator::PortPair;

pub const WORKER_CONFIG_FILENAME: &str = "torrc";

/// Static description of a single worker slot: id, ports, data directory,
/// and pinned exit relays. Built once by PoolManager at startup and reused
/// across restarts of the same id.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub id: usize,
    pub ports: PortPair,
    pub data_dir: PathBuf,
    pub exit_nodes: Vec<String>,
}

impl WorkerSpec {
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(WORKER_CONFIG_FILENAME)
    }
}

/// Renders the config fragment text and the argv to invoke the worker with.
pub struct WorkerConfigBuilder;

impl WorkerConfigBuilder {
    /// `build(worker) -> (config_text, argv)` per spec §4.4.
    pub fn build(worker_binary_path: &Path, spec: &WorkerSpec) -> (String, Vec<String>) {
        let config_text = Self::render(spec);
        let argv = vec![
            worker_binary_path.display().to_string(),
            "-f".to_string(),
            spec.config_path().display().to_string(),
        ];
        (config_text, argv)
    }

    fn render(spec: &WorkerSpec) -> String {
        let mut lines = vec![
            format!("SocksPort 127.0.0.1:{}", spec.ports.socks_port),
            format!("ControlPort 127.0.0.1:{}", spec.ports.control_port),
            format!("DataDirectory {}", spec.data_dir.display()),
            "ClientOnly 1".to_string(),
            "ExitRelay 0".to_string(),
        ];

        if !spec.exit_nodes.is_empty() {
            lines.push(format!("ExitNodes {}", spec.exit_nodes.join(",")));
            lines.push("StrictNodes 1".to_string());
        }

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}
