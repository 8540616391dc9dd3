//! Monotonic counters in the shared store.
//!
//! Counters live under `<namespace>:stat:<name>` and only ever move via
//! INCR, so concurrent workers can bump them without coordination. The
//! engine maintains `processed` and `failed` globally plus
//! `processed:<worker>` / `failed:<worker>` per worker.

use redis::AsyncCommands;

use crate::error::Error;
use crate::storage::{RedisPool, StorageError};

#[derive(Clone)]
pub struct Stat {
    pool: RedisPool,
    namespace: String,
}

impl Stat {
    pub fn new(pool: RedisPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:stat:{}", self.namespace, name)
    }

    async fn conn(
        &self,
    ) -> Result<bb8_redis::bb8::PooledConnection<'_, bb8_redis::RedisConnectionManager>, Error>
    {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(format!("get() from pool: {}", e)).into())
    }

    /// Current value of a counter; a counter that was never bumped reads 0.
    pub async fn get(&self, name: &str) -> Result<u64, Error> {
        let mut conn = self.conn().await?;
        let value: Option<u64> = conn.get(self.key(name)).await?;
        Ok(value.unwrap_or(0))
    }

    /// Increment a counter by one.
    pub async fn incr(&self, name: &str) -> Result<u64, Error> {
        let mut conn = self.conn().await?;
        Ok(conn.incr(self.key(name), 1u64).await?)
    }

    /// Delete a counter entirely (it reads 0 afterwards).
    pub async fn clear(&self, name: &str) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(self.key(name)).await?;
        Ok(())
    }
}
