//! Named FIFO queues backed by Redis lists.
//!
//! Each queue is one list under `<namespace>:queue:<name>`; push appends to
//! the tail, pop removes from the head. The set of queue names ever used is
//! tracked in `<namespace>:queues` so operators can enumerate queues; a
//! name may stay registered after its list drains to empty.

pub mod multi;

pub use multi::MultiQueue;

use std::num::NonZeroUsize;
use std::time::Duration;

use redis::AsyncCommands;
use tracing::debug;

use crate::error::Error;
use crate::job::Payload;
use crate::storage::{RedisPool, StorageError};

/// A single named, append-ordered work list.
#[derive(Clone)]
pub struct Queue {
    pool: RedisPool,
    namespace: String,
    name: String,
}

impl Queue {
    pub fn new(pool: RedisPool, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Redis key holding this queue's entries.
    pub(crate) fn list_key(&self) -> String {
        list_key(&self.namespace, &self.name)
    }

    fn registry_key(&self) -> String {
        registry_key(&self.namespace)
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

    /// Serialize and append a payload to the tail; registers the queue name.
    pub async fn push(&self, payload: &Payload) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let encoded = serde_json::to_string(payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let _: () = conn.sadd(self.registry_key(), &self.name).await?;
        let _: () = conn.rpush(self.list_key(), encoded).await?;
        debug!(queue = %self.name, class = %payload.class, "pushed job");
        Ok(())
    }

    /// Remove and return the head entry, or `None` when the queue is empty.
    /// Never blocks; emptiness is not an error.
    pub async fn pop(&self) -> Result<Option<Payload>, Error> {
        let mut conn = self.conn().await?;
        let entry: Option<String> = conn.lpop(self.list_key(), None::<NonZeroUsize>).await?;
        entry.map(|raw| decode(&raw)).transpose()
    }

    /// Remove and return the head entry, waiting up to `timeout` for one to
    /// appear (`None` waits indefinitely). Uses the store's native blocking
    /// pop, so a push wakes the caller immediately, no poll loop. Fails
    /// with [`Error::Timeout`] when the deadline elapses.
    pub async fn pop_blocking(&self, timeout: Option<Duration>) -> Result<Payload, Error> {
        let mut conn = self.conn().await?;
        let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
        let entry: Option<(String, String)> = conn.blpop(self.list_key(), secs).await?;
        match entry {
            Some((_key, raw)) => decode(&raw),
            None => Err(Error::Timeout),
        }
    }

    /// Read-only view of the entry at `index`, or `None` when out of range.
    pub async fn peek(&self, index: isize) -> Result<Option<Payload>, Error> {
        Ok(self.peek_range(index, 1).await?.into_iter().next())
    }

    /// Read-only view of up to `count` entries starting at `start`; empty
    /// when the range falls outside the queue. Never mutates the queue.
    pub async fn peek_range(&self, start: isize, count: usize) -> Result<Vec<Payload>, Error> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let stop = start + count as isize - 1;
        let entries: Vec<String> = conn.lrange(self.list_key(), start, stop).await?;
        entries.iter().map(|raw| decode(raw)).collect()
    }

    /// Current number of entries.
    pub async fn size(&self) -> Result<u64, Error> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(self.list_key()).await?)
    }

    /// Delete every entry matching `class` (and, when given, exactly
    /// `args`). Returns the number removed.
    ///
    /// With args the match is an exact stored value, removed in one LREM.
    /// Class-only matching has to inspect each entry, so it runs as a
    /// single Lua pass to stay atomic with respect to concurrent pushes.
    pub async fn remove(
        &self,
        class: &str,
        args: Option<&[serde_json::Value]>,
    ) -> Result<u64, Error> {
        let mut conn = self.conn().await?;
        let removed: u64 = match args {
            Some(args) => {
                let entry = Payload::new(class, args.to_vec()).encode();
                conn.lrem(self.list_key(), 0, entry).await?
            }
            None => {
                // Entries are decoded inside Redis so the scan and the
                // removals land in one atomic step.
                let script = redis::Script::new(
                    r#"
                    local removed = 0
                    local items = redis.call('LRANGE', KEYS[1], 0, -1)
                    for _, item in ipairs(items) do
                        local ok, decoded = pcall(cjson.decode, item)
                        if ok and decoded['class'] == ARGV[1] then
                            removed = removed + redis.call('LREM', KEYS[1], 0, item)
                        end
                    end
                    return removed
                    "#,
                );
                script
                    .key(self.list_key())
                    .arg(class)
                    .invoke_async(&mut *conn)
                    .await?
            }
        };
        debug!(queue = %self.name, class = %class, removed, "removed jobs");
        Ok(removed)
    }
}

pub(crate) fn list_key(namespace: &str, name: &str) -> String {
    format!("{}:queue:{}", namespace, name)
}

pub(crate) fn registry_key(namespace: &str) -> String {
    format!("{}:queues", namespace)
}

pub(crate) fn decode(raw: &str) -> Result<Payload, Error> {
    serde_json::from_str(raw).map_err(|e| Error::Decode(format!("{}: {}", e, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(list_key("forq", "jobs"), "forq:queue:jobs");
        assert_eq!(registry_key("forq"), "forq:queues");
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        assert!(matches!(decode("{not json"), Err(Error::Decode(_))));
        assert!(matches!(decode(r#"{"class":1}"#), Err(Error::Decode(_))));
        let payload = decode(r#"{"class":"SomeJob","args":[20,"/tmp"]}"#).unwrap();
        assert_eq!(payload.class, "SomeJob");
        assert_eq!(payload.args, vec![json!(20), json!("/tmp")]);
    }
}
