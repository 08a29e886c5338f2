//! Pool manager module (spec §4.7)
//!
//! The supervisor: owns the worker set, runs the startup sequence, and
//! reacts to `worker_unhealthy`/`worker_exited` events from HealthMonitor by
//! restarting workers with a linear backoff capped at a small constant,
//! quarantining a worker after too many consecutive restart failures.
//! Supervision is message-passing rather than a shared mutable worker map,
//! per the design notes - HealthMonitor only ever talks to PoolManager
//! through `PoolEvent`s and a read-only snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};

use crate::backend_pool::ProxyBackendPool;
use crate::config::Config;
use crate::constants::{RESTART_BACKOFF_CAP_MS, RESTART_BACKOFF_STEP_MS, RESTART_QUARANTINE_THRESHOLD};
use crate::error::ProxyError;
use crate::exit_distributor;
use crate::parallel_runner;
use crate::port_allocator;
use crate::relay_directory::{RelayDirectoryClient, RelayFilter};
use crate::worker_config::WorkerSpec;
use crate::worker_process::{WorkerProcess, WorkerState};

/// Events HealthMonitor (or WorkerProcess's own liveness checks) raise to
/// PoolManager. PoolManager is the sole authority that restarts workers.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    WorkerReady(usize, String),
    WorkerUnhealthy(usize),
    WorkerExited(usize),
}

/// Read-only view of one worker, handed to HealthMonitor so it never needs
/// direct access to the mutable worker set.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub state: WorkerState,
    pub socks_endpoint: String,
}

struct RestartBookkeeping {
    consecutive_failures: u32,
    quarantined: bool,
    next_attempt_at: Instant,
}

impl RestartBookkeeping {
    fn fresh() -> Self {
        Self {
            consecutive_failures: 0,
            quarantined: false,
            next_attempt_at: Instant::now(),
        }
    }
}

pub struct PoolManager {
    config: Arc<Config>,
    backend_pool: Arc<ProxyBackendPool>,
    workers: Vec<WorkerProcess>,
    restarts: Vec<RestartBookkeeping>,
}

impl PoolManager {
    /// Runs the full startup sequence (spec §4.7): allocate ports, fetch
    /// relays, distribute exit nodes, build configs, start workers via
    /// ParallelRunner. Returns `AllWorkersFailed`-equivalent error only if
    /// every worker failed to start; otherwise returns with whatever subset
    /// reached `ready`.
    pub async fn startup(
        config: Arc<Config>,
        backend_pool: Arc<ProxyBackendPool>,
    ) -> Result<Self, ProxyError> {
        let ports = port_allocator::allocate(config.worker_count, config.base_port, config.max_port)?;

        let relay_records = if let Some(url) = &config.directory_url {
            let client = RelayDirectoryClient::new(url.clone());
            let filter = RelayFilter::new(config.exit_node_countries.clone(), config.exit_nodes_max);
            match client.fetch(&filter).await {
                Ok(records) => records,
                Err(e) => {
                    log::warn!("directory fetch failed, proceeding without exit-node pinning: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let buckets = exit_distributor::distribute(
            &relay_records,
            config.worker_count,
            config.exit_nodes_per_worker,
        );

        let mut workers = Vec::with_capacity(config.worker_count);
        for (id, pair) in ports.into_iter().enumerate() {
            let exit_nodes = buckets.get(&id).cloned().unwrap_or_default();
            let data_dir = config.data_dir_root.join(format!("worker-{id}"));
            let spec = WorkerSpec {
                id,
                ports: pair,
                data_dir,
                exit_nodes,
            };
            workers.push(WorkerProcess::new(spec, config.worker_binary_path.clone()));
        }

        let outcomes = parallel_runner::run(
            &mut workers,
            config.start_batch,
            config.worker_startup_timeout(),
        )
        .await;

        let mut ready_count = 0;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => {
                    ready_count += 1;
                    let worker = &workers[outcome.worker_id];
                    backend_pool.add(worker.spec.id, worker.endpoint());
                }
                Err(e) => {
                    log::warn!("worker {} failed to start: {e}", outcome.worker_id);
                }
            }
        }

        if ready_count == 0 && !workers.is_empty() {
            return Err(ProxyError::AllWorkersFailed);
        }

        let restarts = workers.iter().map(|_| RestartBookkeeping::fresh()).collect();

        Ok(Self {
            config,
            backend_pool,
            workers,
            restarts,
        })
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .iter()
            .map(|w| WorkerSnapshot {
                id: w.spec.id,
                state: w.state,
                socks_endpoint: w.endpoint(),
            })
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn ready_count(&self) -> usize {
        self.workers.iter().filter(|w| w.state == WorkerState::Ready).count()
    }

    /// IDs of workers this manager still believes are `ready` but whose
    /// subprocess has actually exited. Used by the liveness checker to raise
    /// `WorkerExited` for deaths HealthMonitor's probe cycle hasn't caught yet.
    pub fn dead_worker_ids(&mut self) -> Vec<usize> {
        self.workers
            .iter_mut()
            .filter(|w| w.state == WorkerState::Ready && !w.is_alive())
            .map(|w| w.spec.id)
            .collect()
    }

    /// Consumes `self` into a shared handle plus a background task that
    /// drains `events` and restarts workers per the policy in spec §4.7.
    /// Returns the shared handle (for stats/shutdown) and the task's join handle.
    pub fn spawn_event_loop(
        manager: Self,
        mut events: mpsc::Receiver<PoolEvent>,
    ) -> (Arc<Mutex<Self>>, tokio::task::JoinHandle<()>) {
        let shared = Arc::new(Mutex::new(manager));
        let loop_handle = Arc::clone(&shared);

        let join = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut manager = loop_handle.lock().await;
                match event {
                    PoolEvent::WorkerReady(id, endpoint) => {
                        manager.backend_pool.add(id, endpoint);
                    }
                    PoolEvent::WorkerUnhealthy(id) | PoolEvent::WorkerExited(id) => {
                        manager.handle_failure(id).await;
                    }
                }
            }
        });

        (shared, join)
    }

    /// Transitions a worker to `failed`, detaches it from the backend pool,
    /// and restarts it (same id/ports/exit-nodes) unless it has been
    /// quarantined after too many consecutive restart failures.
    async fn handle_failure(&mut self, id: usize) {
        if id >= self.workers.len() {
            return;
        }

        self.workers[id].state = WorkerState::Failed;
        self.workers[id].last_failure_at = Some(Instant::now());
        // Per spec §5 ordering guarantee: remove before any other action so
        // concurrent picks stop seeing this worker immediately.
        self.backend_pool.remove(id);

        if self.restarts[id].quarantined {
            log::warn!("worker {id} is quarantined, not restarting");
            return;
        }

        let wait_until = self.restarts[id].next_attempt_at;
        let now = Instant::now();
        if wait_until > now {
            tokio::time::sleep(wait_until - now).await;
        }

        match self.workers[id].start(self.config.worker_startup_timeout()).await {
            Ok(()) => {
                self.restarts[id].consecutive_failures = 0;
                self.backend_pool.add(id, self.workers[id].endpoint());
                log::info!("worker {id} restarted successfully");
            }
            Err(e) => {
                let bookkeeping = &mut self.restarts[id];
                bookkeeping.consecutive_failures += 1;
                let backoff_ms = (bookkeeping.consecutive_failures as u64 * RESTART_BACKOFF_STEP_MS)
                    .min(RESTART_BACKOFF_CAP_MS);
                bookkeeping.next_attempt_at = Instant::now() + Duration::from_millis(backoff_ms);

                if bookkeeping.consecutive_failures >= RESTART_QUARANTINE_THRESHOLD {
                    bookkeeping.quarantined = true;
                    log::error!("worker {id} quarantined after {} consecutive restart failures", bookkeeping.consecutive_failures);
                } else {
                    log::warn!("worker {id} restart failed: {e}");
                }
            }
        }
    }

    /// Stops every worker concurrently, each bounded by `grace` before
    /// force-kill, then removes data directories (spec §5 shutdown sequence).
    pub async fn shutdown_all(&mut self, grace: Duration) {
        let mut handles = Vec::new();
        for worker in &mut self.workers {
            handles.push(worker.stop(grace));
        }
        futures::future::join_all(handles).await;

        for worker in &self.workers {
            if let Err(e) = worker.remove().await {
                log::warn!("failed to remove data dir for worker {}: {e}", worker.spec.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_backoff_caps_at_configured_maximum() {
        let mut bookkeeping = RestartBookkeeping::fresh();
        for _ in 0..10 {
            bookkeeping.consecutive_failures += 1;
            let backoff_ms = (bookkeeping.consecutive_failures as u64 * RESTART_BACKOFF_STEP_MS)
                .min(RESTART_BACKOFF_CAP_MS);
            assert!(backoff_ms <= RESTART_BACKOFF_CAP_MS);
        }
    }

    #[test]
    fn quarantine_triggers_at_threshold() {
        let mut bookkeeping = RestartBookkeeping::fresh();
        for _ in 0..RESTART_QUARANTINE_THRESHOLD {
            bookkeeping.consecutive_failures += 1;
        }
        assert!(bookkeeping.consecutive_failures >= RESTART_QUARANTINE_THRESHOLD);
    }
}
