use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::pool::EndpointPool;
use crate::uri::Uri;

/// The complete `Uri → EndpointPool` mapping at one point in time.
///
/// Snapshots are immutable once built: a [`crate::Registry`] (in
/// `router-registry`) constructs one fully off to the side and then
/// publishes it in one atomic swap. Aliased hostnames hold an `Arc` to the
/// *same* pool as their target, so a CNAME and its real host share
/// round-robin state within one snapshot — but never across snapshots,
/// since a reload always builds fresh pools.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    by_uri: HashMap<Uri, Arc<EndpointPool>>,
}

impl Snapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn lookup(&self, uri: &Uri) -> Option<Arc<EndpointPool>> {
        self.by_uri.get(uri).cloned()
    }

    pub fn num_uris(&self) -> usize {
        self.by_uri.len()
    }

    /// Count of distinct endpoint addresses across all pools, deduplicated
    /// by canonical address (a CNAME's shared pool must not be counted
    /// twice).
    pub fn num_endpoints(&self) -> usize {
        let mut seen = HashSet::new();
        for pool in self.by_uri.values() {
            pool.each(|endpoint| {
                seen.insert(endpoint.canonical_addr().to_string());
            });
        }
        seen.len()
    }

    /// The `hostname -> [address, ...]` projection served at `/routes`.
    pub fn to_routes_json(&self) -> RoutesProjection<'_> {
        RoutesProjection { snapshot: self }
    }
}

/// Lazily-serialized view of a [`Snapshot`] as `{hostname: [addr, ...]}`.
pub struct RoutesProjection<'a> {
    snapshot: &'a Snapshot,
}

impl Serialize for RoutesProjection<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.snapshot.by_uri.len()))?;
        for (uri, pool) in &self.snapshot.by_uri {
            let addrs: Vec<&str> = pool.iter().map(|e| e.canonical_addr()).collect();
            map.serialize_entry(uri.as_str(), &addrs)?;
        }
        map.end()
    }
}

/// Assembles a [`Snapshot`] in two passes, matching the loader's real-host /
/// alias ordering requirement. Not `Sync`; build on one task and publish
/// the finished [`Snapshot`].
#[derive(Default)]
pub struct SnapshotBuilder {
    by_uri: HashMap<Uri, Arc<EndpointPool>>,
}

impl SnapshotBuilder {
    /// Returns a mutable pool for `uri`, creating an empty one (with the
    /// given prune interval) on first sight. Used by pass 1 of the loader.
    pub fn pool_mut(
        &mut self,
        uri: Uri,
        new_pool: impl FnOnce() -> EndpointPool,
    ) -> &mut EndpointPool {
        let arc = self
            .by_uri
            .entry(uri)
            .or_insert_with(|| Arc::new(new_pool()));
        // Pass 1 is the only writer and runs before any Arc is cloned for
        // an alias, so this is always uniquely owned at this point.
        Arc::get_mut(arc).expect("pool mutated only during pass 1, before aliasing")
    }

    pub fn contains(&self, uri: &Uri) -> bool {
        self.by_uri.contains_key(uri)
    }

    pub fn get(&self, uri: &Uri) -> Option<&Arc<EndpointPool>> {
        self.by_uri.get(uri)
    }

    /// Binds `alias` to the same pool reference as `target`, used by pass 2
    /// of the loader. The caller is responsible for having already checked
    /// that `alias` is not itself a real host.
    pub fn alias(&mut self, alias: Uri, target: &Uri) -> bool {
        let Some(pool) = self.by_uri.get(target).cloned() else {
            return false;
        };
        self.by_uri.insert(alias, pool);
        true
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            by_uri: self.by_uri,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::endpoint::Endpoint;

    fn uri(s: &str) -> Uri {
        Uri::new(s)
    }

    #[test]
    fn alias_shares_pool_with_target() {
        let mut builder = Snapshot::builder();
        {
            let pool = builder.pool_mut(uri("app.example.com"), || {
                EndpointPool::new(Duration::from_secs(1))
            });
            pool.put(Endpoint::new("10.0.0.1", 80, None).unwrap());
        }
        assert!(builder.alias(uri("alias.example.com"), &uri("app.example.com")));
        let snapshot = builder.build();

        let real = snapshot.lookup(&uri("app.example.com")).unwrap();
        let alias = snapshot.lookup(&uri("alias.example.com")).unwrap();
        assert!(Arc::ptr_eq(&real, &alias));
        assert_eq!(snapshot.num_uris(), 2);
        assert_eq!(snapshot.num_endpoints(), 1);
    }

    #[test]
    fn alias_to_missing_target_is_dropped() {
        let mut builder = Snapshot::builder();
        assert!(!builder.alias(uri("ghost.example.com"), &uri("nowhere")));
        let snapshot = builder.build();
        assert!(snapshot.lookup(&uri("ghost.example.com")).is_none());
    }

    #[test]
    fn endpoints_are_deduplicated_across_shared_pools() {
        let mut builder = Snapshot::builder();
        {
            let pool = builder.pool_mut(uri("a"), || EndpointPool::new(Duration::from_secs(1)));
            pool.put(Endpoint::new("10.0.0.1", 80, None).unwrap());
            pool.put(Endpoint::new("10.0.0.2", 80, None).unwrap());
        }
        builder.alias(uri("b"), &uri("a"));
        let snapshot = builder.build();
        assert_eq!(snapshot.num_endpoints(), 2);
    }
}
