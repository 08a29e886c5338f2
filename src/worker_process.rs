//! Worker process lifecycle module (spec §4.5)
//!
//! Owns one subprocess: spawn, readiness probe, liveness check, shutdown,
//! forced kill, log capture. The TCP-connect readiness probe is the sole
//! authority on readiness - stdout/stderr are forwarded to the logger but
//! never parsed for state transitions.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

use crate::constants::{READINESS_CONNECT_TIMEOUT_MS, READINESS_POLL_INTERVAL_MS};
use crate::error::ProxyError;
use crate::worker_config::{WorkerConfigBuilder, WorkerSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Pending,
    Starting,
    Ready,
    Failed,
    Stopping,
    Stopped,
}

/// Owns the subprocess handle plus lifecycle bookkeeping for one worker.
pub struct WorkerProcess {
    pub spec: WorkerSpec,
    worker_binary_path: PathBuf,
    child: Option<Child>,
    pub state: WorkerState,
    pub last_ready_at: Option<Instant>,
    pub last_failure_at: Option<Instant>,
}

impl WorkerProcess {
    pub fn new(spec: WorkerSpec, worker_binary_path: PathBuf) -> Self {
        Self {
            spec,
            worker_binary_path,
            child: None,
            state: WorkerState::Pending,
            last_ready_at: None,
            last_failure_at: None,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.spec.ports.socks_port)
    }

    /// Spawns the subprocess, writes its config fragment, and polls readiness
    /// until the SOCKS port accepts a connection or `startup_timeout` elapses.
    pub async fn start(&mut self, startup_timeout: Duration) -> Result<(), ProxyError> {
        self.state = WorkerState::Starting;

        tokio::fs::create_dir_all(&self.spec.data_dir)
            .await
            .map_err(|e| ProxyError::Spawn {
                worker_id: self.spec.id,
                reason: format!("creating data dir: {e}"),
            })?;

        let (config_text, argv) = WorkerConfigBuilder::build(&self.worker_binary_path, &self.spec);
        tokio::fs::write(self.spec.config_path(), config_text)
            .await
            .map_err(|e| ProxyError::Spawn {
                worker_id: self.spec.id,
                reason: format!("writing config: {e}"),
            })?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            self.state = WorkerState::Failed;
            self.last_failure_at = Some(Instant::now());
            ProxyError::Spawn {
                worker_id: self.spec.id,
                reason: e.to_string(),
            }
        })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_forwarder(self.spec.id, stdout, log::Level::Info);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_forwarder(self.spec.id, stderr, log::Level::Warn);
        }

        self.child = Some(child);

        let deadline = Instant::now() + startup_timeout;
        let endpoint = self.endpoint();

        loop {
            if let Some(status) = self.try_wait()? {
                self.state = WorkerState::Failed;
                self.last_failure_at = Some(Instant::now());
                return Err(ProxyError::UnexpectedExit {
                    worker_id: self.spec.id,
                    status: status.to_string(),
                });
            }

            if probe_once(&endpoint).await {
                self.state = WorkerState::Ready;
                self.last_ready_at = Some(Instant::now());
                return Ok(());
            }

            if Instant::now() >= deadline {
                self.state = WorkerState::Failed;
                self.last_failure_at = Some(Instant::now());
                return Err(ProxyError::StartupTimeout {
                    worker_id: self.spec.id,
                    elapsed_ms: startup_timeout.as_millis() as u64,
                });
            }

            sleep(Duration::from_millis(READINESS_POLL_INTERVAL_MS)).await;
        }
    }

    /// True iff the subprocess has not exited. Does not block.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.child {
            None => false,
            Some(child) => matches!(child.try_wait(), Ok(None)),
        }
    }

    fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>, ProxyError> {
        match &mut self.child {
            None => Ok(None),
            Some(child) => child.try_wait().map_err(|e| ProxyError::UnexpectedExit {
                worker_id: self.spec.id,
                status: e.to_string(),
            }),
        }
    }

    /// Sends SIGTERM, waits up to `grace`, then force-kills if still alive.
    pub async fn stop(&mut self, grace: Duration) {
        self.state = WorkerState::Stopping;

        let pid = self.child.as_ref().and_then(|c| c.id());
        if let Some(pid) = pid {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        if let Some(child) = self.child.as_mut() {
            let waited = timeout(grace, child.wait()).await;
            if waited.is_err() {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }

        self.state = WorkerState::Stopped;
    }

    /// Removes the worker's data directory. Only called once the worker is
    /// permanently retired from the pool (not on ordinary restart).
    pub async fn remove(&self) -> Result<(), ProxyError> {
        if self.spec.data_dir.exists() {
            tokio::fs::remove_dir_all(&self.spec.data_dir)
                .await
                .map_err(|e| ProxyError::Config(format!(
                    "failed to remove data dir {}: {e}",
                    self.spec.data_dir.display()
                )))?;
        }
        Ok(())
    }
}

async fn probe_once(endpoint: &str) -> bool {
    let connect = timeout(
        Duration::from_millis(READINESS_CONNECT_TIMEOUT_MS),
        TcpStream::connect(endpoint),
    )
    .await;
    matches!(connect, Ok(Ok(_)))
}

fn spawn_log_forwarder<R>(worker_id: usize, reader: R, level: log::Level)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => log::log!(level, "worker[{worker_id}]: {line}"),
                Ok(None) => break,
                Err(_) => break,
            }
        }
    });
}
