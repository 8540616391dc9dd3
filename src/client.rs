//! The top-level client: everything producers and operators call.

use std::sync::Arc;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::Error;
use crate::failure::{FailureBackend, RedisFailure};
use crate::job::{HandlerRegistry, Job, JobHandler, Payload};
use crate::queue::{self, MultiQueue, Queue};
use crate::stats::Stat;
use crate::storage::{create_redis_pool_with_config, RedisPool, StorageError};
use crate::worker;

/// Aggregate system statistics, as shown by monitoring frontends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Info {
    /// Jobs waiting across all queues.
    pub pending: u64,
    /// Jobs ever processed (successes and failures both count).
    pub processed: u64,
    /// Jobs that failed.
    pub failed: u64,
    /// Number of registered queue names.
    pub queues: u64,
    /// Number of registered workers.
    pub workers: u64,
    /// Workers currently processing a job.
    pub working: u64,
}

/// Handle to one engine instance: a Redis pool, a key namespace, the
/// handler registry and the configured failure backend. Cloning is cheap;
/// all clones share the same registry and backend.
#[derive(Clone)]
pub struct Forq {
    pool: RedisPool,
    namespace: String,
    handlers: HandlerRegistry,
    failure: Arc<dyn FailureBackend>,
}

impl Forq {
    /// Connect to Redis per `config` and verify the connection. The
    /// store-backed failure backend is installed by default.
    pub async fn connect(config: Config) -> Result<Self, Error> {
        let pool = create_redis_pool_with_config(&config.redis_url, config.pool).await?;
        Ok(Self::from_pool(pool, config.namespace))
    }

    /// Build a client around an existing pool.
    pub fn from_pool(pool: RedisPool, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let failure = Arc::new(RedisFailure::new(pool.clone(), namespace.clone()));
        Self {
            pool,
            namespace,
            handlers: HandlerRegistry::new(),
            failure,
        }
    }

    /// Replace the failure backend (e.g. with a [`Multiple`]
    /// fan-out or an external notifier).
    ///
    /// [`Multiple`]: crate::failure::Multiple
    pub fn with_failure_backend(mut self, backend: Arc<dyn FailureBackend>) -> Self {
        self.failure = backend;
        self
    }

    /// Register the handler executing jobs of class `class`.
    pub fn register(&self, class: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(class, handler);
    }

    pub(crate) fn pool(&self) -> &RedisPool {
        &self.pool
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn handler(&self, class: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(class)
    }

    /// The configured failure backend.
    pub fn failure(&self) -> Arc<dyn FailureBackend> {
        Arc::clone(&self.failure)
    }

    /// Handle to a single named queue.
    pub fn queue(&self, name: impl Into<String>) -> Queue {
        Queue::new(self.pool.clone(), self.namespace.clone(), name)
    }

    /// Handle to an ordered multi-queue source (may contain `*`).
    pub fn multi_queue(&self, names: Vec<String>) -> MultiQueue {
        MultiQueue::new(self.pool.clone(), self.namespace.clone(), names)
    }

    pub(crate) fn stat(&self) -> Stat {
        Stat::new(self.pool.clone(), self.namespace.clone())
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

    // ------------------------------------------------------------------
    // Enqueue API
    // ------------------------------------------------------------------

    /// Push a job of `class` with `args` onto `queue`.
    ///
    /// Fails with [`Error::NoClass`] when the class is empty and
    /// [`Error::NoQueue`] when the queue is; producer mistakes surface
    /// synchronously, never silently.
    pub async fn create(&self, queue: &str, class: &str, args: Vec<Value>) -> Result<(), Error> {
        if class.trim().is_empty() {
            return Err(Error::NoClass);
        }
        if queue.trim().is_empty() {
            return Err(Error::NoQueue);
        }
        self.queue(queue).push(&Payload::new(class, args)).await
    }

    /// Push a job of `class`, inferring the queue from the registered
    /// handler's declared queue. Fails with [`Error::NoQueue`] when no
    /// handler declares one.
    pub async fn enqueue(&self, class: &str, args: Vec<Value>) -> Result<(), Error> {
        let queue = self
            .handler(class)
            .and_then(|h| h.queue().map(str::to_string))
            .ok_or(Error::NoQueue)?;
        self.create(&queue, class, args).await
    }

    /// Push a job of `class` onto an explicit queue, ignoring whatever the
    /// handler declares.
    pub async fn enqueue_to(&self, queue: &str, class: &str, args: Vec<Value>) -> Result<(), Error> {
        self.create(queue, class, args).await
    }

    /// Re-push an equivalent record onto the job's own queue (manual
    /// retry).
    pub async fn recreate(&self, job: &Job) -> Result<(), Error> {
        self.create(&job.queue, job.class(), job.args().to_vec())
            .await
    }

    /// Remove matching jobs from the class's inferred queue: with `args`,
    /// exact match on class and args; without, every job of the class.
    /// Returns the number removed.
    pub async fn dequeue(&self, class: &str, args: Option<&[Value]>) -> Result<u64, Error> {
        let queue = self
            .handler(class)
            .and_then(|h| h.queue().map(str::to_string))
            .ok_or(Error::NoQueue)?;
        self.destroy(&queue, class, args).await
    }

    /// Remove matching jobs from an explicit queue. Semantics as
    /// [`dequeue`](Self::dequeue).
    pub async fn destroy(
        &self,
        queue: &str,
        class: &str,
        args: Option<&[Value]>,
    ) -> Result<u64, Error> {
        self.queue(queue).remove(class, args).await
    }

    // ------------------------------------------------------------------
    // Dequeue / introspection API
    // ------------------------------------------------------------------

    /// Pop the next job off `queue`, bound to its originating queue.
    /// `None` when the queue is empty; nothing available is not an error.
    pub async fn reserve(&self, queue: &str) -> Result<Option<Job>, Error> {
        let payload = self.queue(queue).pop().await?;
        Ok(payload.map(|payload| Job::new(queue, payload)))
    }

    /// Current length of `queue`.
    pub async fn size(&self, queue: &str) -> Result<u64, Error> {
        self.queue(queue).size().await
    }

    /// Read-only range view of `queue` without mutating it.
    pub async fn peek(&self, queue: &str, start: isize, count: usize) -> Result<Vec<Payload>, Error> {
        self.queue(queue).peek_range(start, count).await
    }

    /// Every queue name ever used (sorted). Names persist after their
    /// queues drain; see [`remove_queue`](Self::remove_queue).
    pub async fn queues(&self) -> Result<Vec<String>, Error> {
        let mut conn = self.conn().await?;
        let mut names: Vec<String> = conn.smembers(queue::registry_key(&self.namespace)).await?;
        names.sort();
        Ok(names)
    }

    /// Drop a queue: its pending entries and its registry listing.
    pub async fn remove_queue(&self, name: &str) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .srem(queue::registry_key(&self.namespace), name)
            .await?;
        let _: () = conn.del(queue::list_key(&self.namespace, name)).await?;
        debug!(queue = %name, "removed queue");
        Ok(())
    }

    /// Identities of every registered worker.
    pub async fn workers(&self) -> Result<Vec<String>, Error> {
        let mut conn = self.conn().await?;
        let mut ids: Vec<String> = conn.smembers(worker::set_key(&self.namespace)).await?;
        ids.sort();
        Ok(ids)
    }

    /// Whether a worker with this identity is registered.
    pub async fn worker_exists(&self, id: &str) -> Result<bool, Error> {
        let mut conn = self.conn().await?;
        Ok(conn.sismember(worker::set_key(&self.namespace), id).await?)
    }

    /// Unregister a worker by identity, synthesizing a dirty-exit failure
    /// for any job it was still marked as working on.
    pub async fn remove_worker(&self, id: &str) -> Result<(), Error> {
        worker::unregister_id(self, id).await
    }

    /// Every worker currently processing a job, with what it is working on.
    pub async fn working(&self) -> Result<Vec<(String, worker::WorkingOn)>, Error> {
        let ids = self.workers().await?;
        let mut conn = self.conn().await?;
        let mut out = Vec::new();
        for id in ids {
            let raw: Option<String> = conn.get(worker::marker_key(&self.namespace, &id)).await?;
            if let Some(raw) = raw {
                let working: worker::WorkingOn =
                    serde_json::from_str(&raw).map_err(|e| Error::Decode(e.to_string()))?;
                out.push((id, working));
            }
        }
        Ok(out)
    }

    /// Aggregate system statistics.
    pub async fn info(&self) -> Result<Info, Error> {
        let queues = self.queues().await?;
        let mut pending = 0;
        for name in &queues {
            pending += self.size(name).await?;
        }
        let stat = self.stat();
        let workers = self.workers().await?;
        let working = self.working().await?;
        Ok(Info {
            pending,
            processed: stat.get("processed").await?,
            failed: stat.get("failed").await?,
            queues: queues.len() as u64,
            workers: workers.len() as u64,
            working: working.len() as u64,
        })
    }
}
