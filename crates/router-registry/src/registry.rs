use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use router_core::Snapshot;
use tracing::{debug, error};

use crate::error::RegistryError;
use crate::loader::TopologyLoader;
use crate::store::StoreClient;

/// The live, concurrently-readable routing table.
///
/// A reload builds a brand new [`Snapshot`] off to the side (the loader
/// never touches the one currently being served) and publishes it with one
/// atomic pointer swap. Readers — dispatcher tasks doing a lookup per
/// request — never block on a reload in progress and never observe a
/// partially-built snapshot.
pub struct Registry {
    current: ArcSwap<Snapshot>,
    time_of_last_update_unix_ms: AtomicI64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            time_of_last_update_unix_ms: AtomicI64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Builds a registry already holding `snapshot`, bypassing the loader.
    /// Useful for tests in downstream crates (e.g. the dispatcher) that want
    /// a known routing table without standing up a store.
    pub fn with_snapshot(snapshot: Snapshot, now_unix_ms: i64) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            time_of_last_update_unix_ms: AtomicI64::new(now_unix_ms),
        }
    }

    pub fn num_uris(&self) -> usize {
        self.current.load().num_uris()
    }

    pub fn num_endpoints(&self) -> usize {
        self.current.load().num_endpoints()
    }

    pub fn time_of_last_update_unix_ms(&self) -> i64 {
        self.time_of_last_update_unix_ms.load(Ordering::Acquire)
    }

    /// Loads a fresh snapshot from `store` and publishes it. Errors are
    /// returned to the caller rather than swallowed, but a failed reload
    /// always leaves the previously published snapshot in place — routing
    /// never regresses to empty because the store hiccuped once.
    pub async fn reload(
        &self,
        store: &dyn StoreClient,
        prune_interval: Duration,
        now_unix_ms: i64,
    ) -> Result<(), RegistryError> {
        debug!("registry starting reload");
        let loader = TopologyLoader::new(store, prune_interval);
        let snapshot = loader.load().await?;
        self.current.store(Arc::new(snapshot));
        self.time_of_last_update_unix_ms
            .store(now_unix_ms, Ordering::Release);
        debug!("registry finished reload");
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs [`Registry::reload`] on a fixed interval until cancelled.
///
/// A zero interval disables the cycle entirely (the original router treats
/// `ReloadUriInterval == 0` the same way: reload only ever happens once, at
/// startup, and never again).
pub async fn run_reload_cycle(
    registry: Arc<Registry>,
    store: Arc<dyn StoreClient>,
    interval: Duration,
    prune_interval: Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
    now_unix_ms: impl Fn() -> i64,
) {
    if interval.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = registry.reload(store.as_ref(), prune_interval, now_unix_ms()).await {
                    error!(%err, "periodic route reload failed");
                }
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreClient;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeStore {
        lists: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl StoreClient for FakeStore {
        async fn keys(&self) -> Result<Vec<String>, RegistryError> {
            Ok(self.lists.keys().cloned().collect())
        }
        async fn lrange_all(&self, key: &str) -> Result<Vec<String>, RegistryError> {
            Ok(self.lists.get(key).cloned().unwrap_or_default())
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, RegistryError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn new_registry_is_empty_until_first_reload() {
        let registry = Registry::new();
        assert_eq!(registry.num_uris(), 0);
        assert_eq!(registry.time_of_last_update_unix_ms(), 0);
    }

    struct FailingStore;

    #[async_trait]
    impl StoreClient for FailingStore {
        async fn keys(&self) -> Result<Vec<String>, RegistryError> {
            Err(RegistryError::Store(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "store unreachable",
            ))))
        }
        async fn lrange_all(&self, _key: &str) -> Result<Vec<String>, RegistryError> {
            unreachable!("keys() fails before any lrange_all call")
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, RegistryError> {
            unreachable!("keys() fails before any get call")
        }
    }

    #[tokio::test]
    async fn reload_failure_leaves_previous_snapshot_and_timestamp_unchanged() {
        let mut store = FakeStore::default();
        store.lists.insert(
            "rs/app.example.com".to_string(),
            vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()],
        );

        let registry = Registry::new();
        registry
            .reload(&store, Duration::from_secs(1), 1_000)
            .await
            .unwrap();
        assert_eq!(registry.num_uris(), 1);
        assert_eq!(registry.num_endpoints(), 2);

        let failing = FailingStore;
        let err = registry
            .reload(&failing, Duration::from_secs(1), 2_000)
            .await;
        assert!(err.is_err());

        assert_eq!(registry.num_uris(), 1);
        assert_eq!(registry.num_endpoints(), 2);
        assert_eq!(registry.time_of_last_update_unix_ms(), 1_000);
    }

    #[tokio::test]
    async fn reload_publishes_a_new_snapshot() {
        let mut store = FakeStore::default();
        store.lists.insert(
            "rs/app.example.com".to_string(),
            vec!["10.0.0.1:80".to_string()],
        );

        let registry = Registry::new();
        registry
            .reload(&store, Duration::from_secs(1), 1_000)
            .await
            .unwrap();

        assert_eq!(registry.num_uris(), 1);
        assert_eq!(registry.time_of_last_update_unix_ms(), 1_000);
    }
}
