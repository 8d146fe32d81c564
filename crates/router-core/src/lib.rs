//! Domain model for the reverse proxy core: virtual hostnames, backend
//! endpoints, pools of endpoints, and the hostname→pool snapshot that a
//! registry publishes for dispatchers to read.
//!
//! This crate has no I/O and no notion of an external store or an HTTP
//! server — it only knows how to represent a point-in-time routing table
//! and pick an endpoint out of a pool. `router-registry` builds snapshots
//! from an external store; `router-proxy` dispatches requests against them.

mod endpoint;
mod error;
mod pool;
mod snapshot;
mod uri;

pub use endpoint::{Endpoint, EndpointLogData};
pub use error::CoreError;
pub use pool::EndpointPool;
pub use snapshot::{RoutesProjection, Snapshot, SnapshotBuilder};
pub use uri::Uri;
