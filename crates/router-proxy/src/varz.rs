use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use router_registry::Registry;
use serde::Serialize;

/// Process-wide counters surfaced as JSON on `/varz`.
///
/// Each counter is a plain `AtomicU64` bumped from dispatcher tasks;
/// `snapshot` only runs when something asks for `/varz`, so the hot path
/// never pays for serialization.
#[derive(Debug, Default)]
pub struct Varz {
    index: u32,
    requests: AtomicU64,
    responses_2xx: AtomicU64,
    responses_3xx: AtomicU64,
    responses_4xx: AtomicU64,
    responses_5xx: AtomicU64,
    bad_requests: AtomicU64,
    backend_failures: AtomicU64,
}

impl Varz {
    pub fn new() -> Self {
        Self::default()
    }

    /// `index` is the configured instance ordinal, advertised on `/varz` so
    /// an operator running several router instances behind a load balancer
    /// can tell which one answered.
    pub fn with_index(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status(&self, status: u16) {
        let counter = match status {
            200..=299 => &self.responses_2xx,
            300..=399 => &self.responses_3xx,
            400..=499 => &self.responses_4xx,
            _ => &self.responses_5xx,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_failure(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, registry: &Registry, started_at: Instant) -> VarzSnapshot {
        VarzSnapshot {
            index: self.index,
            requests: self.requests.load(Ordering::Relaxed),
            responses_2xx: self.responses_2xx.load(Ordering::Relaxed),
            responses_3xx: self.responses_3xx.load(Ordering::Relaxed),
            responses_4xx: self.responses_4xx.load(Ordering::Relaxed),
            responses_5xx: self.responses_5xx.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            num_uris: registry.num_uris(),
            num_endpoints: registry.num_endpoints(),
            uptime_seconds: started_at.elapsed().as_secs(),
        }
    }
}

pub type SharedVarz = Arc<Varz>;

#[derive(Debug, Serialize)]
pub struct VarzSnapshot {
    pub index: u32,
    pub requests: u64,
    pub responses_2xx: u64,
    pub responses_3xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,
    pub bad_requests: u64,
    pub backend_failures: u64,
    pub num_uris: usize,
    pub num_endpoints: usize,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counters_bucket_by_class() {
        let varz = Varz::new();
        varz.record_status(201);
        varz.record_status(301);
        varz.record_status(404);
        varz.record_status(502);
        assert_eq!(varz.responses_2xx.load(Ordering::Relaxed), 1);
        assert_eq!(varz.responses_3xx.load(Ordering::Relaxed), 1);
        assert_eq!(varz.responses_4xx.load(Ordering::Relaxed), 1);
        assert_eq!(varz.responses_5xx.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn snapshot_reflects_registry_size() {
        let varz = Varz::new();
        let registry = Registry::new();
        let snap = varz.snapshot(&registry, Instant::now());
        assert_eq!(snap.num_uris, 0);
        assert_eq!(snap.num_endpoints, 0);
    }
}
