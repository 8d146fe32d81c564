//! HTTP dispatch, lifecycle management, and the diagnostic surface for the
//! reverse proxy. Depends on `router-core` for the domain model and
//! `router-registry` for the live snapshot; knows nothing about
//! configuration file formats.

mod access_log;
mod diagnostics;
mod dispatcher;
mod error;
mod lifecycle;
mod varz;

pub use access_log::{AccessLogRecord, AccessLogger};
pub use diagnostics::Diagnostics;
pub use dispatcher::{Dispatcher, ResponseBody};
pub use error::ProxyError;
pub use lifecycle::{ignore_further_signals, wait_for_shutdown_signal, Lifecycle, ShutdownSignal};
pub use varz::{SharedVarz, Varz, VarzSnapshot};
