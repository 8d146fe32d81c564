use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::RegistryError;

/// The three operations the topology loader needs from the external route
/// store. Kept narrow and deliberately: this is all the original router
/// asks of Redis (`KEYS("*")`, `LRANGE(key, 0, -1)`, `GET(key)`), and
/// narrowing the trait to exactly that keeps a fake store for tests honest
/// about what production code can rely on.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn keys(&self) -> Result<Vec<String>, RegistryError>;
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, RegistryError>;
    async fn get(&self, key: &str) -> Result<Option<String>, RegistryError>;
}

/// A [`StoreClient`] backed by a real Redis (or Redis-protocol-compatible)
/// server, reusing one multiplexed connection across calls.
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(server_addr: &str) -> Result<Self, RegistryError> {
        let client = redis::Client::open(format!("redis://{server_addr}"))
            .map_err(RegistryError::Store)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(RegistryError::Store)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    async fn keys(&self) -> Result<Vec<String>, RegistryError> {
        let mut conn = self.conn.clone();
        conn.keys("*").await.map_err(RegistryError::Store)
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, 0, -1).await.map_err(RegistryError::Store)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(RegistryError::Store)
    }
}
