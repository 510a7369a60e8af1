//! Per-peer registry of known endpoints.
//!
//! Every peer owns exactly one [`PeerRegistry`]. It records the endpoints the peer knows about in
//! the order it learned them, plus the *neighbor horizon*: how many of those endpoints (counting
//! from the front) the peer currently polls. Index 0 is always the peer itself.

use itertools::Itertools;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Inner {
    known: Vec<String>,
    horizon: usize,
}

/// Ordered, append-only set of endpoints guarded by a single read/write lock.
///
/// The registry does not deduplicate on [`add`](PeerRegistry::add); callers check
/// [`has`](PeerRegistry::has) first. [`merge`](PeerRegistry::merge) bundles both steps.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    inner: RwLock<Inner>,
}

impl PeerRegistry {
    /// Creates an empty registry with a horizon of zero.
    pub fn new() -> Self {
        PeerRegistry::default()
    }

    /// Seeds the registry from the full ring membership, replacing anything known before.
    ///
    /// Adds `own` followed by its two ring successors in `endpoints`, skipping repeats so that
    /// clusters of one or two peers keep every endpoint unique. The horizon is set to the number
    /// of endpoints seeded. If `own` is not part of `endpoints`, only `own` is seeded.
    pub fn seed(&self, own: &str, endpoints: &[String]) {
        let mut seeded = vec![own.to_string()];
        if let Some(i) = endpoints.iter().position(|endpoint| endpoint == own) {
            let n = endpoints.len();
            seeded.push(endpoints[(i + 1) % n].clone());
            seeded.push(endpoints[(i + 2) % n].clone());
        }

        let mut inner = self.inner.write();
        inner.known = seeded.into_iter().unique().collect();
        inner.horizon = inner.known.len();
    }

    /// Appends `endpoint`.
    pub fn add(&self, endpoint: impl Into<String>) {
        self.inner.write().known.push(endpoint.into());
    }

    /// Returns `true` if `endpoint` is already known.
    pub fn has(&self, endpoint: &str) -> bool {
        self.inner.read().known.iter().any(|known| known == endpoint)
    }

    /// Number of known endpoints.
    pub fn size(&self) -> usize {
        self.inner.read().known.len()
    }

    /// Number of endpoints currently eligible for polling, self included.
    pub fn horizon(&self) -> usize {
        self.inner.read().horizon
    }

    /// Widens the neighbor horizon by one, never past the number of known endpoints.
    pub fn increment_horizon(&self) {
        let mut inner = self.inner.write();
        if inner.horizon < inner.known.len() {
            inner.horizon += 1;
        }
    }

    /// Advances the round-robin cursor and returns the next neighbor to poll.
    ///
    /// Walks `1..horizon`, wrapping back to 1, and never yields index 0 (this peer). Returns
    /// `None` when there is nobody else within the horizon.
    pub fn next_neighbor(&self, current: usize) -> Option<(usize, String)> {
        let inner = self.inner.read();
        if inner.horizon < 2 {
            return None;
        }
        let mut next = current + 1;
        if next >= inner.horizon {
            next = 1;
        }
        Some((next, inner.known[next].clone()))
    }

    /// Adds every endpoint not yet known and returns the size before and after the merge.
    ///
    /// The membership check and the append happen under one write lock, so concurrent merges
    /// cannot introduce duplicates.
    pub fn merge<I, S>(&self, endpoints: I) -> (usize, usize)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write();
        let size_before = inner.known.len();
        for endpoint in endpoints {
            let endpoint = endpoint.as_ref();
            if !inner.known.iter().any(|known| known == endpoint) {
                inner.known.push(endpoint.to_string());
            }
        }
        (size_before, inner.known.len())
    }

    /// Point-in-time copy of the known endpoints, in insertion order.
    pub fn endpoints(&self) -> Vec<String> {
        self.inner.read().known.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.0.0.{i}:7000")).collect()
    }

    #[test]
    fn seed_takes_two_ring_successors() {
        let endpoints = ring(5);

        let registry = PeerRegistry::new();
        registry.seed(&endpoints[3], &endpoints);

        assert_eq!(
            registry.endpoints(),
            vec![
                endpoints[3].clone(),
                endpoints[4].clone(),
                endpoints[0].clone()
            ]
        );
        assert_eq!(registry.horizon(), 3);
    }

    #[test]
    fn seed_single_peer_cluster() {
        let endpoints = ring(1);

        let registry = PeerRegistry::new();
        registry.seed(&endpoints[0], &endpoints);

        assert_eq!(registry.size(), 1);
        assert_eq!(registry.horizon(), 1);
        assert_eq!(registry.next_neighbor(0), None);
    }

    #[test]
    fn seed_two_peer_cluster() {
        let endpoints = ring(2);

        let registry = PeerRegistry::new();
        registry.seed(&endpoints[1], &endpoints);

        assert_eq!(
            registry.endpoints(),
            vec![endpoints[1].clone(), endpoints[0].clone()]
        );
        assert_eq!(registry.horizon(), 2);

        let mut cursor = 0;
        for _ in 0..4 {
            let (next, endpoint) = registry.next_neighbor(cursor).unwrap();
            assert_eq!(next, 1);
            assert_eq!(endpoint, endpoints[0]);
            cursor = next;
        }
    }

    #[test]
    fn seed_without_own_endpoint() {
        let registry = PeerRegistry::new();
        registry.seed("10.0.0.9:7000", &ring(4));

        assert_eq!(registry.endpoints(), vec!["10.0.0.9:7000".to_string()]);
        assert_eq!(registry.horizon(), 1);
    }

    #[test]
    fn next_neighbor_wraps_and_skips_self() {
        let registry = PeerRegistry::new();
        for endpoint in ring(6) {
            registry.add(endpoint);
        }
        for _ in 0..4 {
            registry.increment_horizon();
        }
        assert_eq!(registry.horizon(), 4);

        let mut cursor = 0;
        let mut seen = Vec::new();
        for _ in 0..7 {
            let (next, _) = registry.next_neighbor(cursor).unwrap();
            seen.push(next);
            cursor = next;
        }
        assert_eq!(seen, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn next_neighbor_recovers_from_stale_cursor() {
        let registry = PeerRegistry::new();
        let endpoints = ring(3);
        registry.seed(&endpoints[0], &endpoints);

        assert_eq!(registry.next_neighbor(17).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn horizon_never_exceeds_size() {
        let registry = PeerRegistry::new();
        registry.add("a");
        registry.add("b");
        for _ in 0..5 {
            registry.increment_horizon();
            assert!(registry.horizon() <= registry.size());
        }
        assert_eq!(registry.horizon(), 2);
    }

    #[test]
    fn merge_skips_known_endpoints() {
        let endpoints = ring(4);
        let registry = PeerRegistry::new();
        registry.seed(&endpoints[0], &endpoints);

        let (before, after) = registry.merge(["10.0.0.2:7000", "10.0.0.3:7000", "10.0.0.3:7000"]);
        assert_eq!((before, after), (3, 4));
        assert_eq!(registry.endpoints(), endpoints);

        let (before, after) = registry.merge(endpoints.iter());
        assert_eq!(before, after);
    }

    #[test]
    fn concurrent_merges_keep_endpoints_unique() {
        use std::{collections::HashSet, sync::Arc, thread};

        let registry = Arc::new(PeerRegistry::new());
        registry.add("self");

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..50 {
                        registry.merge([format!("peer-{}", (i + t) % 20)]);
                        registry.increment_horizon();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let endpoints = registry.endpoints();
        let unique: HashSet<_> = endpoints.iter().collect();
        assert_eq!(unique.len(), endpoints.len());
        assert!(registry.horizon() <= registry.size());
    }
}
