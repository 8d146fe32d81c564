#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("querying route store")]
    Store(#[source] redis::RedisError),
}
