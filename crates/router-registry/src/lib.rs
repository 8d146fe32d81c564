//! Loads route topology from the external store and keeps a live,
//! atomically-swapped [`Snapshot`](router_core::Snapshot) that dispatcher
//! tasks can read without ever blocking on a reload in progress.

mod error;
mod loader;
mod registry;
mod store;

pub use error::RegistryError;
pub use loader::TopologyLoader;
pub use registry::{run_reload_cycle, Registry};
pub use store::{RedisStore, StoreClient};
