//! The store-backed failure backend.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

use super::{FailureBackend, FailureRecord};
use crate::error::Error;
use crate::queue;
use crate::storage::{RedisPool, StorageError};

/// Persists failure records to an append-ordered Redis list. Works out of
/// the box and backs the operator-facing failure views.
#[derive(Clone)]
pub struct RedisFailure {
    pool: RedisPool,
    namespace: String,
}

impl RedisFailure {
    pub fn new(pool: RedisPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    fn key(&self) -> String {
        format!("{}:failed", self.namespace)
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

    async fn fetch(&self, index: isize) -> Result<Option<FailureRecord>, Error> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.lindex(self.key(), index).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|e| Error::Decode(e.to_string())))
            .transpose()
    }
}

#[async_trait]
impl FailureBackend for RedisFailure {
    async fn record(&self, failure: FailureRecord) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let encoded = serde_json::to_string(&failure)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let _: () = conn.rpush(self.key(), encoded).await?;
        info!(
            queue = %failure.queue,
            class = %failure.payload.class,
            exception = %failure.exception,
            "recorded job failure"
        );
        Ok(())
    }

    async fn count(&self) -> Result<u64, Error> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(self.key()).await?)
    }

    async fn all(&self, start: isize, count: usize) -> Result<Vec<FailureRecord>, Error> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let stop = start + count as isize - 1;
        let entries: Vec<String> = conn.lrange(self.key(), start, stop).await?;
        entries
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(|e| Error::Decode(e.to_string())))
            .collect()
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(self.key()).await?;
        Ok(())
    }

    async fn requeue(&self, index: isize) -> Result<(), Error> {
        let Some(mut record) = self.fetch(index).await? else {
            return Ok(());
        };
        record.stamp_retried();

        let mut conn = self.conn().await?;
        let encoded = serde_json::to_string(&record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let _: () = conn.lset(self.key(), index, encoded).await?;

        // Fresh pending job from the stored payload, on its original queue.
        let _: () = conn
            .sadd(queue::registry_key(&self.namespace), &record.queue)
            .await?;
        let _: () = conn
            .rpush(
                queue::list_key(&self.namespace, &record.queue),
                record.payload.encode(),
            )
            .await?;
        info!(queue = %record.queue, class = %record.payload.class, index, "requeued failed job");
        Ok(())
    }

    async fn remove(&self, index: isize) -> Result<(), Error> {
        // Positional deletion shifts later indices, so overwrite the slot
        // with a locally-unique sentinel and delete one occurrence of it.
        // Exactly the addressed record goes away, even under concurrent
        // appends.
        let sentinel = Uuid::new_v4().to_string();
        let mut conn = self.conn().await?;
        let _: () = conn.lset(self.key(), index, &sentinel).await?;
        let _: () = conn.lrem(self.key(), 1, &sentinel).await?;
        debug!(index, "removed failure record");
        Ok(())
    }

    async fn requeue_queue(&self, queue: &str) -> Result<u64, Error> {
        let total = self.count().await? as isize;
        let mut requeued = 0;
        for index in 0..total {
            if let Some(record) = self.fetch(index).await? {
                if record.queue == queue {
                    self.requeue(index).await?;
                    requeued += 1;
                }
            }
        }
        Ok(requeued)
    }

    async fn remove_queue(&self, queue: &str) -> Result<u64, Error> {
        let mut removed = 0;
        loop {
            let total = self.count().await? as isize;
            let mut target = None;
            for index in 0..total {
                if let Some(record) = self.fetch(index).await? {
                    if record.queue == queue {
                        target = Some(index);
                        break;
                    }
                }
            }
            match target {
                Some(index) => {
                    self.remove(index).await?;
                    removed += 1;
                }
                None => return Ok(removed),
            }
        }
    }
}
