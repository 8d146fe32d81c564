use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::endpoint::Endpoint;

/// The set of endpoints backing one virtual host, plus round-robin
/// selection state.
///
/// Endpoints are kept in insertion order (`members`) with an index
/// (`by_addr`) for idempotent `put`/`remove`. The cursor is a plain
/// `AtomicUsize` rather than a lock: `pick` only ever needs to read the
/// member list and advance a counter, and pools are rebuilt wholesale on
/// reload rather than mutated concurrently with reads, so a lock-free
/// counter is enough to make `pick` safe to call from many dispatcher tasks
/// at once.
#[derive(Debug)]
pub struct EndpointPool {
    members: Vec<Endpoint>,
    by_addr: HashMap<String, usize>,
    cursor: AtomicUsize,
    prune_interval: Duration,
}

impl EndpointPool {
    /// `prune_interval` is a hook for a future active-health extension
    /// (the original implementation sizes it as `reload_interval / 5`); it
    /// has no behavioral effect without a health signal driving eviction.
    pub fn new(prune_interval: Duration) -> Self {
        Self {
            members: Vec::new(),
            by_addr: HashMap::new(),
            cursor: AtomicUsize::new(0),
            prune_interval,
        }
    }

    pub fn prune_interval(&self) -> Duration {
        self.prune_interval
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Inserts `endpoint` if no member shares its canonical address.
    /// Returns `true` if a new entry was created.
    pub fn put(&mut self, endpoint: Endpoint) -> bool {
        if self.by_addr.contains_key(endpoint.canonical_addr()) {
            return false;
        }
        self.by_addr
            .insert(endpoint.canonical_addr().to_string(), self.members.len());
        self.members.push(endpoint);
        true
    }

    /// Drops the member with canonical address `addr`, if present.
    pub fn remove(&mut self, addr: &str) {
        let Some(idx) = self.by_addr.remove(addr) else {
            return;
        };
        self.members.remove(idx);
        // Reindex everything after the removed slot.
        for slot in self.by_addr.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
    }

    /// Returns one member using an advancing cursor; `None` if the pool is
    /// empty. Successive calls rotate through members in insertion order.
    pub fn pick(&self) -> Option<&Endpoint> {
        if self.members.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.members.len();
        self.members.get(idx)
    }

    /// Visits every member in insertion order.
    pub fn each(&self, mut visit: impl FnMut(&Endpoint)) {
        for endpoint in &self.members {
            visit(endpoint);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool_with(addrs: &[&str]) -> EndpointPool {
        let mut pool = EndpointPool::new(Duration::from_secs(1));
        for addr in addrs {
            let (host, port) = addr.split_once(':').unwrap();
            pool.put(Endpoint::new(host, port.parse().unwrap(), None).unwrap());
        }
        pool
    }

    #[test]
    fn put_is_idempotent_on_addr() {
        let mut pool = EndpointPool::new(Duration::from_secs(1));
        let a = Endpoint::new("10.0.0.1", 80, None).unwrap();
        let b = Endpoint::new("10.0.0.1", 80, [("t".into(), "v".into())]).unwrap();
        assert!(pool.put(a));
        assert!(!pool.put(b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pick_on_empty_pool_is_none() {
        let pool = EndpointPool::new(Duration::from_secs(1));
        assert!(pool.pick().is_none());
    }

    #[test]
    fn pick_rotates_in_insertion_order() {
        let pool = pool_with(&["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);
        let picks: Vec<_> = (0..6)
            .map(|_| pool.pick().unwrap().canonical_addr().to_string())
            .collect();
        assert_eq!(
            picks,
            vec![
                "10.0.0.1:80",
                "10.0.0.2:80",
                "10.0.0.3:80",
                "10.0.0.1:80",
                "10.0.0.2:80",
                "10.0.0.3:80",
            ]
        );
    }

    #[test]
    fn round_robin_fairness_for_arbitrary_multiples() {
        let k = 5;
        let m = 7;
        let pool = pool_with(&[
            "h0:1", "h1:1", "h2:1", "h3:1", "h4:1",
        ]);
        assert_eq!(pool.len(), k);
        let mut counts = HashMap::new();
        for _ in 0..(k * m) {
            let addr = pool.pick().unwrap().canonical_addr().to_string();
            *counts.entry(addr).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), k);
        for count in counts.values() {
            assert_eq!(*count, m);
        }
    }

    #[test]
    fn remove_drops_member_and_reindexes() {
        let mut pool = pool_with(&["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);
        pool.remove("10.0.0.2:80");
        assert_eq!(pool.len(), 2);
        let mut seen = Vec::new();
        pool.each(|e| seen.push(e.canonical_addr().to_string()));
        assert_eq!(seen, vec!["10.0.0.1:80", "10.0.0.3:80"]);
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut pool = pool_with(&["10.0.0.1:80"]);
        pool.remove("10.0.0.9:80");
        assert_eq!(pool.len(), 1);
    }
}
