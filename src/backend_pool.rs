//! Backend pool management module (spec §4.9)
//!
//! In-memory set of backend endpoints with per-backend health/cooldown
//! state. A single mutex guards the backend list and round-robin cursor so
//! that `pick`, `add`, `remove`, and `mark_*` are atomic with respect to one
//! another - the spec's concurrency model permits finer-grained schemes but
//! a single lock is the simplest implementation that preserves linearizability.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One worker's view from the load balancer's perspective: its SOCKS
/// endpoint plus health/cooldown bookkeeping.
#[derive(Debug, Clone)]
pub struct Backend {
    pub worker_id: usize,
    pub socks_endpoint: String,
    pub healthy: bool,
    pub cooldown_until: Option<Instant>,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
}

impl Backend {
    fn new(worker_id: usize, socks_endpoint: String) -> Self {
        Self {
            worker_id,
            socks_endpoint,
            healthy: true,
            cooldown_until: None,
            consecutive_failures: 0,
            success_count: 0,
            failure_count: 0,
        }
    }

    fn is_eligible(&self, now: Instant, exclude: &HashSet<usize>) -> bool {
        self.healthy
            && self.cooldown_until.map_or(true, |until| now >= until)
            && !exclude.contains(&self.worker_id)
    }
}

struct Inner {
    backends: Vec<Backend>,
    cursor: usize,
}

pub struct ProxyBackendPool {
    inner: Mutex<Inner>,
    cooldown: Duration,
}

impl ProxyBackendPool {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backends: Vec::new(),
                cursor: 0,
            }),
            cooldown,
        }
    }

    /// Appends a backend; no-op if `worker_id` is already present.
    pub fn add(&self, worker_id: usize, socks_endpoint: String) {
        let mut inner = self.inner.lock().unwrap();
        if inner.backends.iter().any(|b| b.worker_id == worker_id) {
            return;
        }
        inner.backends.push(Backend::new(worker_id, socks_endpoint));
    }

    /// Removes the backend for `worker_id`, if present. Any reference a
    /// concurrent request already holds (returned by an earlier `pick`)
    /// remains valid for that request's lifetime - this only affects future picks.
    pub fn remove(&self, worker_id: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.backends.iter().position(|b| b.worker_id == worker_id) {
            inner.backends.remove(pos);
            if inner.cursor > pos {
                inner.cursor -= 1;
            }
        }
    }

    /// Starting at `cursor mod len`, scans forward up to `len` positions,
    /// returning the first eligible backend's snapshot. Advances the cursor
    /// one past the returned slot. Returns `None` if no eligible backend exists.
    pub fn pick(&self, exclude: &HashSet<usize>) -> Option<Backend> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let len = inner.backends.len();
        if len == 0 {
            return None;
        }

        let start = inner.cursor % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if inner.backends[idx].is_eligible(now, exclude) {
                inner.cursor = (idx + 1) % len;
                return Some(inner.backends[idx].clone());
            }
        }
        None
    }

    pub fn mark_success(&self, worker_id: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(backend) = inner.backends.iter_mut().find(|b| b.worker_id == worker_id) {
            backend.consecutive_failures = 0;
            backend.success_count += 1;
        }
    }

    pub fn mark_failure(&self, worker_id: usize) {
        let cooldown = self.cooldown;
        let mut inner = self.inner.lock().unwrap();
        if let Some(backend) = inner.backends.iter_mut().find(|b| b.worker_id == worker_id) {
            backend.consecutive_failures += 1;
            backend.failure_count += 1;
            backend.cooldown_until = Some(Instant::now() + cooldown);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn eligible_count(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        inner
            .backends
            .iter()
            .filter(|b| b.is_eligible(now, &HashSet::new()))
            .count()
    }

    pub fn snapshot(&self) -> Vec<Backend> {
        self.inner.lock().unwrap().backends.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ProxyBackendPool {
        ProxyBackendPool::new(Duration::from_secs(30))
    }

    #[test]
    fn add_is_idempotent_by_worker_id() {
        let p = pool();
        p.add(0, "127.0.0.1:20000".to_string());
        p.add(0, "127.0.0.1:20000".to_string());
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn round_robin_over_three_backends() {
        let p = pool();
        p.add(0, "a".to_string());
        p.add(1, "b".to_string());
        p.add(2, "c".to_string());

        let exclude = HashSet::new();
        let picks: Vec<usize> = (0..6)
            .map(|_| p.pick(&exclude).unwrap().worker_id)
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn pick_skips_excluded_workers() {
        let p = pool();
        p.add(0, "a".to_string());
        p.add(1, "b".to_string());

        let mut exclude = HashSet::new();
        exclude.insert(0);
        let picked = p.pick(&exclude).unwrap();
        assert_eq!(picked.worker_id, 1);
    }

    #[test]
    fn empty_pool_returns_none() {
        let p = pool();
        assert!(p.pick(&HashSet::new()).is_none());
    }

    #[test]
    fn failed_backend_is_excluded_until_cooldown_expires() {
        let p = pool();
        p.add(0, "a".to_string());
        p.mark_failure(0);
        assert!(p.pick(&HashSet::new()).is_none());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let p = pool();
        p.add(0, "a".to_string());
        p.mark_failure(0);
        p.mark_success(0);
        let snapshot = p.snapshot();
        assert_eq!(snapshot[0].consecutive_failures, 0);
    }

    #[test]
    fn remove_then_add_back_resets_logical_state() {
        let p = pool();
        p.add(0, "a".to_string());
        p.add(1, "b".to_string());
        p.remove(0);
        assert_eq!(p.len(), 1);
        p.add(0, "a".to_string());
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn single_backend_eligible_then_ineligible() {
        let p = pool();
        p.add(0, "a".to_string());
        assert!(p.pick(&HashSet::new()).is_some());
        p.mark_failure(0);
        assert!(p.pick(&HashSet::new()).is_none());
    }

    #[test]
    fn removed_backend_never_returned_again() {
        let p = pool();
        p.add(0, "a".to_string());
        p.add(1, "b".to_string());
        p.remove(0);
        for _ in 0..5 {
            let picked = p.pick(&HashSet::new()).unwrap();
            assert_eq!(picked.worker_id, 1);
        }
    }
}
