//! Priority-ordered pops across several queues.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use redis::AsyncCommands;
use tracing::trace;

use crate::error::Error;
use crate::job::Payload;
use crate::queue::{decode, list_key, registry_key};
use crate::storage::{RedisPool, StorageError};

/// Upper bound on one blocking wait before the queue set is re-resolved.
/// Keeps wildcard expansion fresh without busy-waiting; tuning detail, not
/// a contract.
const BLOCK_SLICE: Duration = Duration::from_secs(1);

/// The wildcard entry meaning "all known queues not explicitly listed".
pub const WILDCARD: &str = "*";

/// Presents an ordered set of queues as one logical pop source.
///
/// The caller-supplied order is the priority order: whichever listed queue
/// is non-empty first wins a scan. A `*` entry expands to every registered
/// queue not named explicitly, in lexicographic order, spliced in at the
/// wildcard's position, re-resolved on every poll, so queues
/// created after the worker started are picked up without a restart.
#[derive(Clone)]
pub struct MultiQueue {
    pool: RedisPool,
    namespace: String,
    names: Vec<String>,
}

impl MultiQueue {
    pub fn new(pool: RedisPool, namespace: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            names,
        }
    }

    /// The raw (unexpanded) queue list this source was built from.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Expand the configured list into concrete queue names, resolving any
    /// wildcard against the live queue registry.
    pub async fn resolve(&self) -> Result<Vec<String>, Error> {
        if !self.names.iter().any(|n| n == WILDCARD) {
            return Ok(self.names.clone());
        }

        let mut conn = self.conn().await?;
        let known: Vec<String> = conn.smembers(registry_key(&self.namespace)).await?;
        let explicit: HashSet<&str> = self
            .names
            .iter()
            .filter(|n| *n != WILDCARD)
            .map(String::as_str)
            .collect();

        let mut expansion: Vec<String> = known
            .into_iter()
            .filter(|name| !explicit.contains(name.as_str()))
            .collect();
        expansion.sort();

        let mut resolved = Vec::with_capacity(self.names.len() + expansion.len());
        for name in &self.names {
            if name == WILDCARD {
                resolved.extend(expansion.iter().cloned());
            } else {
                resolved.push(name.clone());
            }
        }
        Ok(resolved)
    }

    /// Non-blocking pop: try each queue in priority order once and return
    /// the first hit. Returns immediately with `None` when every queue is
    /// empty; this call never waits.
    pub async fn pop(&self) -> Result<Option<(String, Payload)>, Error> {
        let names = self.resolve().await?;
        let mut conn = self.conn().await?;
        for name in names {
            let entry: Option<String> = conn
                .lpop(list_key(&self.namespace, &name), None::<NonZeroUsize>)
                .await?;
            if let Some(raw) = entry {
                return Ok(Some((name, decode(&raw)?)));
            }
        }
        Ok(None)
    }

    /// Blocking pop: one combined blocking wait across the whole queue set,
    /// in bounded slices so the wildcard expansion stays fresh. The store
    /// services the keys in the order given, which preserves the priority
    /// order within each slice. Fails with [`Error::Timeout`] when
    /// `deadline` elapses; `None` waits indefinitely.
    pub async fn pop_blocking(
        &self,
        deadline: Option<Duration>,
    ) -> Result<(String, Payload), Error> {
        let started = Instant::now();
        loop {
            let remaining = match deadline {
                Some(total) => {
                    let elapsed = started.elapsed();
                    if elapsed >= total {
                        return Err(Error::Timeout);
                    }
                    Some(total - elapsed)
                }
                None => None,
            };
            let slice = remaining.map_or(BLOCK_SLICE, |r| r.min(BLOCK_SLICE));

            let names = self.resolve().await?;
            if names.is_empty() {
                return Err(Error::NoQueue);
            }
            let keys: Vec<String> = names
                .iter()
                .map(|name| list_key(&self.namespace, name))
                .collect();

            let mut conn = self.conn().await?;
            let entry: Option<(String, String)> =
                conn.blpop(&keys, slice.as_secs_f64()).await?;
            match entry {
                Some((key, raw)) => {
                    let prefix = format!("{}:queue:", self.namespace);
                    let name = key
                        .strip_prefix(&prefix)
                        .unwrap_or(key.as_str())
                        .to_string();
                    return Ok((name, decode(&raw)?));
                }
                None => {
                    trace!(queues = ?names, "blocking pop slice expired, rescanning");
                }
            }
        }
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
}
