//! Exit node distribution module (spec §4.3)
//!
//! Partitions a relay list deterministically across workers.

use std::collections::HashMap;

use crate::relay_directory::RelayRecord;

/// Sort relays by descending `exit_probability` (missing treated as 0.0),
/// then ascending `id`, for a stable, deterministic ordering.
fn sorted_relays(relays: &[RelayRecord]) -> Vec<&RelayRecord> {
    let mut sorted: Vec<&RelayRecord> = relays.iter().collect();
    sorted.sort_by(|a, b| {
        let prob_a = a.exit_probability.unwrap_or(0.0);
        let prob_b = b.exit_probability.unwrap_or(0.0);
        prob_b
            .partial_cmp(&prob_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    sorted
}

/// Distribute relays round-robin into `worker_count` buckets, each capped at
/// `per_worker` entries. Returns an empty map (well, a map of empty sets) if
/// `per_worker == 0`. If there aren't enough relays to fill every bucket,
/// distributes what's available without error.
pub fn distribute(
    relays: &[RelayRecord],
    worker_count: usize,
    per_worker: usize,
) -> HashMap<usize, Vec<String>> {
    let mut buckets: HashMap<usize, Vec<String>> =
        (0..worker_count).map(|id| (id, Vec::new())).collect();

    if per_worker == 0 || worker_count == 0 {
        return buckets;
    }

    let sorted = sorted_relays(relays);
    let mut worker = 0usize;
    for relay in sorted {
        // Find the next worker with room, wrapping at most worker_count
        // times before giving up (all buckets full).
        let mut attempts = 0;
        while buckets[&worker].len() >= per_worker {
            worker = (worker + 1) % worker_count;
            attempts += 1;
            if attempts >= worker_count {
                return buckets;
            }
        }
        buckets.get_mut(&worker).unwrap().push(relay.id.clone());
        worker = (worker + 1) % worker_count;
    }

    buckets
}
