//! Integrator module (spec §4.11)
//!
//! Top-level orchestrator: wires configuration into a `PoolManager` and an
//! `HTTPLoadBalancer`, spawns the health monitor and a worker liveness task,
//! installs signal handlers, and drives graceful shutdown. Modeled on the
//! teacher's `Supervisor` - signal-driven main loop plus a timed grace
//! window for in-flight work - generalized from a single proxy+health-checker
//! pair to the full worker-pool + load-balancer stack.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::backend_pool::ProxyBackendPool;
use crate::config::Config;
use crate::constants::{DEFAULT_STOP_GRACE_SECS, READINESS_CONNECT_TIMEOUT_MS, SHUTDOWN_GRACE_SECS};
use crate::error::ProxyError;
use crate::health_monitor::HealthMonitor;
use crate::load_balancer::HTTPLoadBalancer;
use crate::pool_manager::{PoolEvent, PoolManager};

/// Aggregate runtime stats exposed for diagnostics (spec §7).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub workers_total: usize,
    pub workers_ready: usize,
    pub backends_eligible: usize,
    pub requests_total: u64,
    pub requests_failed: u64,
}

/// Runs the whole service until a termination signal arrives. Returns the
/// process exit code the spec assigns to the outcome (§6): 0 on a clean
/// shutdown, 2 if every worker failed to start, 3 if the listener couldn't
/// bind, 1 for any other fatal configuration error.
pub async fn run(config: Config) -> i32 {
    match run_inner(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("fatal error: {e}");
            match e.downcast::<ProxyError>() {
                Ok(proxy_err) => proxy_err.exit_code(),
                Err(_) => 1,
            }
        }
    }
}

async fn run_inner(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let backend_pool = Arc::new(ProxyBackendPool::new(config.cooldown_duration()));

    let manager = PoolManager::startup(Arc::clone(&config), Arc::clone(&backend_pool))
        .await
        .map_err(anyhow::Error::from)?;
    info!(
        "worker pool started: {}/{} ready",
        manager.ready_count(),
        manager.worker_count()
    );

    let (event_tx, event_rx) = mpsc::channel::<PoolEvent>(256);
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let (pool_manager, pool_loop_handle) = PoolManager::spawn_event_loop(manager, event_rx);

    let health_monitor = HealthMonitor::new(
        config.health_check_url.clone(),
        config.health_interval(),
        config.health_timeout(),
        config.start_batch,
    );
    let health_pool_manager = Arc::clone(&pool_manager);
    let health_events = event_tx.clone();
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        health_monitor.run(health_pool_manager, health_events, health_shutdown).await;
    });

    let liveness_pool_manager = Arc::clone(&pool_manager);
    let liveness_events = event_tx.clone();
    let mut liveness_shutdown = shutdown_tx.subscribe();
    let liveness_handle = tokio::spawn(async move {
        run_liveness_checks(liveness_pool_manager, liveness_events, &mut liveness_shutdown).await;
    });

    let load_balancer = Arc::new(HTTPLoadBalancer::new(
        config.frontend_listen.clone(),
        Arc::clone(&backend_pool),
        config.retry_attempts,
    ));
    let lb_for_run = Arc::clone(&load_balancer);
    let lb_shutdown = shutdown_tx.subscribe();
    let lb_handle = tokio::spawn(async move { lb_for_run.run(lb_shutdown).await });

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, starting graceful shutdown"),
        _ = sigint.recv() => info!("SIGINT received, starting graceful shutdown"),
        result = lb_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = shutdown_tx.send(());
                    return Err(e.into());
                }
                Err(e) => warn!("load balancer task panicked: {e}"),
            }
        }
    }

    let _ = shutdown_tx.send(());

    let shutdown_result = timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), async {
        if let Err(e) = health_handle.await {
            warn!("health monitor task join error: {e}");
        }
        if let Err(e) = liveness_handle.await {
            warn!("liveness task join error: {e}");
        }
    })
    .await;
    if shutdown_result.is_err() {
        warn!("graceful shutdown grace period elapsed before background tasks stopped");
    }

    drop(event_tx);
    drop(pool_loop_handle);
    pool_manager
        .lock()
        .await
        .shutdown_all(Duration::from_secs(DEFAULT_STOP_GRACE_SECS))
        .await;

    info!("rotor shutdown complete");
    Ok(())
}

/// Periodically checks `is_alive()` on every worker PoolManager currently
/// reports ready, reporting an unexpected exit as `WorkerExited`. HealthMonitor
/// only probes application-level reachability; this catches a worker process
/// dying outright between probe cycles.
async fn run_liveness_checks(
    pool_manager: Arc<tokio::sync::Mutex<PoolManager>>,
    events: mpsc::Sender<PoolEvent>,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(READINESS_CONNECT_TIMEOUT_MS * 4));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let dead_ids = pool_manager.lock().await.dead_worker_ids();
                for id in dead_ids {
                    let _ = events.send(PoolEvent::WorkerExited(id)).await;
                }
            }
            _ = shutdown.recv() => {
                info!("liveness checker received shutdown signal");
                break;
            }
        }
    }
}

/// Builds a stats snapshot by combining PoolManager and HTTPLoadBalancer
/// state (spec §7). Used by diagnostics surfaces; not wired to a subcommand
/// in this CLI surface but kept as the single place that assembles it.
pub async fn collect_stats(
    pool_manager: &Arc<tokio::sync::Mutex<PoolManager>>,
    backend_pool: &ProxyBackendPool,
    load_balancer: &HTTPLoadBalancer,
) -> Stats {
    let manager = pool_manager.lock().await;
    let stats = load_balancer.stats();
    Stats {
        workers_total: manager.worker_count(),
        workers_ready: manager.ready_count(),
        backends_eligible: backend_pool.eligible_count(),
        requests_total: stats.requests_total.load(Ordering::Relaxed),
        requests_failed: stats.requests_failed.load(Ordering::Relaxed),
    }
}
