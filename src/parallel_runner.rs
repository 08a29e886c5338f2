//! Bounded fan-out batch startup module (spec §4.6)
//!
//! Launches a batch of WorkerProcess instances concurrently, chunked by a
//! configured fan-out, awaiting each chunk before starting the next. This
//! protects the host from a thundering herd of disk/CPU usage when
//! `worker_count` is large.

use std::time::Duration;

use crate::error::ProxyError;
use crate::worker_process::WorkerProcess;

#[derive(Debug)]
pub struct StartOutcome {
    pub worker_id: usize,
    pub result: Result<(), ProxyError>,
}

/// Runs `start()` on every worker in `workers`, in chunks of at most
/// `fan_out`, and returns one outcome per worker in input order.
pub async fn run(workers: &mut [WorkerProcess], fan_out: usize, startup_timeout: Duration) -> Vec<StartOutcome> {
    let fan_out = fan_out.max(1);
    let mut outcomes = Vec::with_capacity(workers.len());

    for chunk in workers.chunks_mut(fan_out) {
        let mut futures = Vec::with_capacity(chunk.len());
        for worker in chunk.iter_mut() {
            futures.push(async move {
                let worker_id = worker.spec.id;
                let result = worker.start(startup_timeout).await;
                StartOutcome { worker_id, result }
            });
        }
        let chunk_outcomes = futures::future::join_all(futures).await;
        outcomes.extend(chunk_outcomes);
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_allocator::PortPair;
    use crate::worker_config::WorkerSpec;
    use std::path::PathBuf;

    fn worker(id: usize) -> WorkerProcess {
        let spec = WorkerSpec {
            id,
            ports: PortPair {
                socks_port: 20000 + id as u16,
                control_port: 21000 + id as u16,
            },
            data_dir: std::env::temp_dir().join(format!("rotor-runner-test-{id}")),
            exit_nodes: vec![],
        };
        // /bin/false: spawns, exits immediately, never opens the SOCKS port -
        // each start() call here is expected to return UnexpectedExit quickly.
        WorkerProcess::new(spec, PathBuf::from("/bin/false"))
    }

    #[tokio::test]
    async fn chunks_respect_fan_out_and_cover_every_worker() {
        let mut workers: Vec<WorkerProcess> = (0..5).map(worker).collect();
        let outcomes = run(&mut workers, 2, Duration::from_millis(500)).await;
        assert_eq!(outcomes.len(), 5);
        let mut ids: Vec<usize> = outcomes.iter().map(|o| o.worker_id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn single_worker_fan_out_one_is_sequential() {
        let mut workers: Vec<WorkerProcess> = (0..3).map(worker).collect();
        let outcomes = run(&mut workers, 1, Duration::from_millis(500)).await;
        assert_eq!(outcomes.len(), 3);
    }

    #[tokio::test]
    async fn failing_binary_surfaces_as_error_outcome() {
        let mut workers: Vec<WorkerProcess> = vec![worker(0)];
        let outcomes = run(&mut workers, 1, Duration::from_millis(500)).await;
        assert!(outcomes[0].result.is_err());
    }
}
