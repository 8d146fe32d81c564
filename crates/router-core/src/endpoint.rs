use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::CoreError;

/// An immutable backend identity: a canonical `host:port` address plus an
/// opaque tag map. Two endpoints are equal, and hash equally, iff their
/// canonical addresses match — the tags are metadata, not identity.
#[derive(Clone, Debug)]
pub struct Endpoint {
    addr: String,
    tags: BTreeMap<String, String>,
}

impl Endpoint {
    /// Builds a new endpoint, validating `host` and `port` the way the
    /// original loader does: non-empty host, port in `1..=65535`.
    pub fn new(
        host: impl AsRef<str>,
        port: u32,
        tags: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, CoreError> {
        let host = host.as_ref();
        if host.is_empty() {
            return Err(CoreError::EmptyHost);
        }
        if port == 0 || port > 65535 {
            return Err(CoreError::PortOutOfRange(port));
        }
        Ok(Self {
            addr: format!("{host}:{port}"),
            tags: tags.into_iter().collect(),
        })
    }

    /// The canonical address; this is also the endpoint's identity.
    pub fn canonical_addr(&self) -> &str {
        &self.addr
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// A small projection meant for structured log records: address plus
    /// tags, nothing else.
    pub fn to_log_data(&self) -> EndpointLogData<'_> {
        EndpointLogData {
            addr: &self.addr,
            tags: &self.tags,
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

/// The JSON projection of an [`Endpoint`] is just its canonical address —
/// tags never leave the process through this path.
impl Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.addr)
    }
}

#[derive(Debug, Serialize)]
pub struct EndpointLogData<'a> {
    pub addr: &'a str,
    pub tags: &'a BTreeMap<String, String>,
}
