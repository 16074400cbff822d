//! Redis-backed [`CacheStore`].

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::store::CacheStore;
use crate::{MimirError, Result};

/// Shared cache store on a single redis instance.
///
/// Connections are multiplexed; a fresh handle is requested per operation so
/// a dropped connection recovers on the next call.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create a store for `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// Only parses the URL; no connection is made until first use.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)
    }
}

fn unavailable(e: redis::RedisError) -> MimirError {
    MimirError::StoreUnavailable {
        backend: "redis",
        message: e.to_string(),
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(key).await.map_err(unavailable)
    }

    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, ttl_secs).await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await.map_err(unavailable)?;
        Ok(())
    }
}
