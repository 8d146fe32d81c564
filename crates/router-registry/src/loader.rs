use std::time::Duration;

use router_core::{Endpoint, EndpointPool, Snapshot, Uri};
use tracing::warn;

use crate::error::RegistryError;
use crate::store::StoreClient;

/// Builds a [`Snapshot`] from the store's current contents.
///
/// Keys are namespaced `"rs/<host>"` for a real service host and
/// `"cname/<alias>"` for an alias; the list behind an `rs` key is its
/// member addresses (`"host:port"`), and the value behind a `cname` key
/// points at the real host it aliases, itself a `"rs/<host>"` string.
/// Loading happens in two passes because an alias can only be resolved once
/// every real host's pool exists: pass 1 builds all `rs` pools, pass 2
/// attaches aliases to them, matching the original loader's ordering.
pub struct TopologyLoader<'s> {
    store: &'s dyn StoreClient,
    prune_interval: Duration,
}

impl<'s> TopologyLoader<'s> {
    pub fn new(store: &'s dyn StoreClient, prune_interval: Duration) -> Self {
        Self { store, prune_interval }
    }

    pub async fn load(&self) -> Result<Snapshot, RegistryError> {
        let keys = self.store.keys().await?;

        let mut builder = Snapshot::builder();

        for key in &keys {
            let Some((kind, uri)) = split_key(key) else {
                warn!(key, "skipping malformed store key");
                continue;
            };
            if kind != "rs" {
                continue;
            }
            let uri = Uri::new(uri);

            let addrs = self.store.lrange_all(key).await?;
            let pool = builder.pool_mut(uri.clone(), || EndpointPool::new(self.prune_interval));
            for addr in addrs {
                match parse_host_port(&addr) {
                    Some((host, port)) => {
                        match Endpoint::new(host, port, None) {
                            Ok(endpoint) => {
                                pool.put(endpoint);
                            }
                            Err(err) => warn!(%addr, %err, "skipping invalid endpoint"),
                        }
                    }
                    None => warn!(%addr, "skipping malformed endpoint address"),
                }
            }
        }

        for key in &keys {
            let Some((kind, alias)) = split_key(key) else {
                continue;
            };
            if kind != "cname" {
                continue;
            }
            let alias_uri = Uri::new(alias);

            if builder.contains(&alias_uri) {
                warn!(alias, "cname has its own rs entry, ignoring alias");
                continue;
            }

            let Some(value) = self.store.get(key).await? else {
                warn!(alias, "cname key disappeared before GET, skipping");
                continue;
            };
            let Some(target) = split_cname_target(&value) else {
                warn!(alias, value, "skipping malformed cname target");
                continue;
            };
            let target_uri = Uri::new(target);

            if !builder.alias(alias_uri, &target_uri) {
                warn!(alias, target, "cname points to a uri with no rs entry");
            }
        }

        Ok(builder.build())
    }
}

/// Splits a store key of the form `"<kind>/<uri>"` into `(kind, uri)`.
fn split_key(key: &str) -> Option<(&str, &str)> {
    let (kind, uri) = key.split_once('/')?;
    if kind.is_empty() || uri.is_empty() {
        return None;
    }
    Some((kind, uri))
}

/// Extracts the target uri from a cname value of the form `"rs/<uri>"`.
fn split_cname_target(value: &str) -> Option<&str> {
    let (_kind, uri) = value.split_once('/')?;
    if uri.is_empty() {
        return None;
    }
    Some(uri)
}

fn parse_host_port(addr: &str) -> Option<(&str, u32)> {
    let (host, port) = addr.split_once(':')?;
    let port: u32 = port.parse().ok()?;
    Some((host, port))
}
