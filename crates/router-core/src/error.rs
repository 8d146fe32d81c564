use thiserror::Error;

/// Errors raised while constructing or mutating the domain model.
///
/// Kept deliberately small: most of the interesting failure modes in this
/// crate (store unreachable, alias dangling, ...) belong to the loader and
/// registry crates layered on top, not to the plain data types here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("endpoint host must not be empty")]
    EmptyHost,

    #[error("endpoint port {0} is out of range (expected 1..=65535)")]
    PortOutOfRange(u32),
}
