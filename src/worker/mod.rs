//! The worker: reserves jobs, isolates their execution, reports liveness.
//!
//! One worker maps to one OS process and handles jobs strictly one at a
//! time. Everything a worker knows about its peers travels through the
//! store: the `workers` registry set, per-worker `worker:<id>` markers for
//! the job currently being processed, and `worker:<id>:started`
//! timestamps. A worker owns its own entries; the only time it touches
//! another worker's entries is the startup pruning pass, which converts
//! markers left by dead processes into dirty-exit failure records.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::Forq;
use crate::error::{Error, JobError};
use crate::failure::FailureRecord;
use crate::job::{self, Job, Payload};
use crate::storage::StorageError;

/// A worker's durable "currently processing" marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingOn {
    pub queue: String,
    pub run_at: DateTime<Utc>,
    pub payload: Payload,
}

/// A bare callback invoked around job dispatch.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Optional process-level callbacks around job isolation: one-time setup
/// before the first dispatch (connection re-establishment and the like),
/// per-cycle setup in the supervisor, and per-job setup inside the child
/// task.
#[derive(Clone, Default)]
pub struct DispatchCallbacks {
    /// Runs exactly once per worker, before its first dispatch.
    pub before_first_dispatch: Option<Callback>,
    /// Runs in the supervisor on every cycle, before isolating execution.
    pub before_dispatch: Option<Callback>,
    /// Runs inside the isolating child task, before the job body.
    pub after_dispatch: Option<Callback>,
}

pub(crate) fn set_key(namespace: &str) -> String {
    format!("{}:workers", namespace)
}

pub(crate) fn marker_key(namespace: &str, id: &str) -> String {
    format!("{}:worker:{}", namespace, id)
}

pub(crate) fn started_key(namespace: &str, id: &str) -> String {
    format!("{}:worker:{}:started", namespace, id)
}

/// Split a worker identity into host, pid and its queue list.
pub(crate) fn parse_id(id: &str) -> Option<(&str, u32, &str)> {
    let mut parts = id.splitn(3, ':');
    let host = parts.next()?;
    let pid = parts.next()?.parse().ok()?;
    let queues = parts.next()?;
    Some((host, pid, queues))
}

/// One job-processing worker.
pub struct Worker {
    client: Forq,
    queues: Vec<String>,
    id: String,
    host: String,
    pid: u32,
    callbacks: DispatchCallbacks,
    shutdown_tx: watch::Sender<bool>,
    first_dispatch_ran: AtomicBool,
}

impl Worker {
    /// Build a worker over `queues` (entries may be comma-joined and may
    /// include the `*` wildcard; incidental whitespace is stripped).
    /// Fails with [`Error::NoQueue`] when no queue names remain.
    pub fn new(client: Forq, queues: &[&str]) -> Result<Self, Error> {
        let queues: Vec<String> = queues
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if queues.is_empty() {
            return Err(Error::NoQueue);
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let pid = std::process::id();
        let id = format!("{}:{}:{}", host, pid, queues.join(","));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            client,
            queues,
            id,
            host,
            pid,
            callbacks: DispatchCallbacks::default(),
            shutdown_tx,
            first_dispatch_ran: AtomicBool::new(false),
        })
    }

    /// Install dispatch callbacks.
    pub fn with_callbacks(mut self, callbacks: DispatchCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Pin an explicit identity. Useful for process managers that assign
    /// identities and for exercising the pruning pass.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        if let Some((host, pid, _)) = parse_id(&self.id) {
            self.host = host.to_string();
            self.pid = pid;
        }
        self
    }

    /// Identity string `host:pid:queue1,queue2`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The queue list this worker polls (unexpanded; may contain `*`).
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    async fn conn(
        &self,
    ) -> Result<bb8_redis::bb8::PooledConnection<'_, bb8_redis::RedisConnectionManager>, Error>
    {
        self.client
            .pool()
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(format!("get() from pool: {}", e)).into())
    }

    fn namespace(&self) -> &str {
        self.client.namespace()
    }

    // ------------------------------------------------------------------
    // Registration & liveness
    // ------------------------------------------------------------------

    /// Add this worker to the global registry and stamp its start time.
    pub async fn register(&self) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(set_key(self.namespace()), &self.id).await?;
        let _: () = conn
            .set(
                started_key(self.namespace(), &self.id),
                Utc::now().to_rfc3339(),
            )
            .await?;
        info!(worker = %self.id, "registered worker");
        Ok(())
    }

    /// Remove this worker from the registry, synthesizing a dirty-exit
    /// failure if a job was still marked in flight. Per-worker stats go
    /// away with the worker.
    pub async fn unregister(&self) -> Result<(), Error> {
        info!(worker = %self.id, "unregistering worker");
        unregister_id(&self.client, &self.id).await
    }

    /// When this worker registered, if it is registered.
    pub async fn started(&self) -> Result<Option<DateTime<Utc>>, Error> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(started_key(self.namespace(), &self.id)).await?;
        Ok(raw.and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }

    /// Scan the registry for workers on this host whose process is gone
    /// and clean up after them. Any marker they left becomes exactly one
    /// dirty-exit failure record. Runs before this worker starts its own
    /// reservation loop.
    pub async fn prune_dead_workers(&self) -> Result<(), Error> {
        let ids = self.client.workers().await?;
        if ids.is_empty() {
            return Ok(());
        }
        let Some(live) = worker_pids() else {
            warn!("could not list worker processes; skipping prune pass");
            return Ok(());
        };
        for id in ids {
            let Some((host, pid, _)) = parse_id(&id) else {
                warn!(worker = %id, "unparseable worker identity, skipping");
                continue;
            };
            if host != self.host || pid == self.pid || live.contains(&pid) {
                continue;
            }
            info!(worker = %id, "pruning dead worker");
            unregister_id(&self.client, &id).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Working-on marker & stats
    // ------------------------------------------------------------------

    /// Write the durable "currently processing" marker for `job`. If this
    /// process dies before [`done_working`](Self::done_working), the
    /// marker is the evidence the pruning pass turns into a dirty-exit
    /// failure.
    pub async fn working_on(&self, job: &Job) -> Result<(), Error> {
        let marker = WorkingOn {
            queue: job.queue.clone(),
            run_at: Utc::now(),
            payload: job.payload.clone(),
        };
        let encoded = serde_json::to_string(&marker)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let mut conn = self.conn().await?;
        let _: () = conn
            .set(marker_key(self.namespace(), &self.id), encoded)
            .await?;
        Ok(())
    }

    /// Clear the marker and count the job as processed.
    pub async fn done_working(&self) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(marker_key(self.namespace(), &self.id)).await?;
        drop(conn);
        let stat = self.client.stat();
        stat.incr("processed").await?;
        stat.incr(&format!("processed:{}", self.id)).await?;
        Ok(())
    }

    /// What this worker is currently processing, if anything.
    pub async fn job(&self) -> Result<Option<WorkingOn>, Error> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(marker_key(self.namespace(), &self.id)).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|e| Error::Decode(e.to_string())))
            .transpose()
    }

    pub async fn is_working(&self) -> Result<bool, Error> {
        Ok(self.job().await?.is_some())
    }

    pub async fn is_idle(&self) -> Result<bool, Error> {
        Ok(self.job().await?.is_none())
    }

    /// Jobs this worker has processed (successes and failures).
    pub async fn processed(&self) -> Result<u64, Error> {
        self.client
            .stat()
            .get(&format!("processed:{}", self.id))
            .await
    }

    /// Jobs this worker has seen fail.
    pub async fn failed(&self) -> Result<u64, Error> {
        self.client.stat().get(&format!("failed:{}", self.id)).await
    }

    // ------------------------------------------------------------------
    // Reservation & dispatch
    // ------------------------------------------------------------------

    /// Reserve the next job across this worker's queue set.
    ///
    /// A zero `interval` makes a single non-blocking attempt (the
    /// deterministic single-step mode); a positive interval is the
    /// blocking wait budget. Either way, nothing available is `None`,
    /// not an error.
    pub async fn reserve(&self, interval: Duration) -> Result<Option<Job>, Error> {
        let multi = self.client.multi_queue(self.queues.clone());
        if interval.is_zero() {
            Ok(multi.pop().await?.map(|(queue, payload)| Job::new(queue, payload)))
        } else {
            match multi.pop_blocking(Some(interval)).await {
                Ok((queue, payload)) => Ok(Some(Job::new(queue, payload))),
                Err(Error::Timeout) => Ok(None),
                Err(e) => Err(e),
            }
        }
    }

    /// One full cycle: a single non-blocking reservation attempt plus
    /// dispatch. Returns whether a job was processed.
    pub async fn process_one(&self) -> Result<bool, Error> {
        match self.reserve(Duration::ZERO).await? {
            Some(job) => {
                self.dispatch(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The main loop: startup (pruning, registration, one-time callback),
    /// then reserve/dispatch until shutdown. With a zero interval the loop
    /// drains the queues and returns; with a positive interval it keeps
    /// polling, blocking up to `interval` per attempt. The worker
    /// unregisters on the way out even when the loop errors.
    pub async fn work(&self, interval: Duration) -> Result<(), Error> {
        self.startup().await?;
        let result = self.work_loop(interval).await;
        let unregistered = self.unregister().await;
        result.and(unregistered)
    }

    async fn work_loop(&self, interval: Duration) -> Result<(), Error> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }
            let outcome = if interval.is_zero() {
                self.reserve(interval).await
            } else {
                tokio::select! {
                    _ = shutdown_rx.changed() => return Ok(()),
                    outcome = self.reserve(interval) => outcome,
                }
            };
            let reserved = match outcome {
                Ok(reserved) => reserved,
                Err(Error::Decode(message)) => {
                    // Data-integrity failure: the entry is already off the
                    // queue; surface it loudly and keep working.
                    error!(worker = %self.id, error = %message, "undecodable payload popped");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match reserved {
                Some(job) => self.dispatch(job).await?,
                None => {
                    if interval.is_zero() {
                        return Ok(());
                    }
                    debug!(worker = %self.id, "nothing to reserve, polling again");
                }
            }
        }
    }

    async fn startup(&self) -> Result<(), Error> {
        self.prune_dead_workers().await?;
        self.register().await?;
        // One-time callback, guarded so repeated work() calls on the same
        // worker cannot re-run it.
        if !self.first_dispatch_ran.swap(true, Ordering::SeqCst) {
            if let Some(cb) = &self.callbacks.before_first_dispatch {
                cb();
            }
        }
        Ok(())
    }

    /// Execute one reserved job in an isolating child task.
    ///
    /// The supervisor's bookkeeping survives anything the job body does: a
    /// panicking task is caught at the join point and recorded as a
    /// dirty-exit failure. Handler errors become failure records; either
    /// way the worker moves on to its next reservation.
    pub async fn dispatch(&self, job: Job) -> Result<(), Error> {
        if let Some(cb) = &self.callbacks.before_dispatch {
            cb();
        }
        info!(worker = %self.id, job = %job, "got job");
        self.working_on(&job).await?;

        let result = match self.client.handler(job.class()) {
            None => Err(JobError::NoHandler(job.class().to_string())),
            Some(handler) => {
                let child_job = job.clone();
                let after_dispatch = self.callbacks.after_dispatch.clone();
                let handle = tokio::spawn(async move {
                    if let Some(cb) = after_dispatch {
                        cb();
                    }
                    job::perform(&child_job, handler).await
                });
                match handle.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        if join_err.is_panic() {
                            error!(worker = %self.id, class = %job.class(), "job task panicked");
                        } else {
                            error!(worker = %self.id, class = %job.class(), "job task aborted");
                        }
                        Err(JobError::DirtyExit)
                    }
                }
            }
        };

        match result {
            Ok(()) => info!(worker = %self.id, class = %job.class(), "job performed"),
            Err(err) => self.report_failure(&job, err).await,
        }
        self.done_working().await
    }

    /// Convert a job error into a failure record, fan it to the failure
    /// backend, run the class's failure hooks and bump the failed
    /// counters. Backend trouble is logged and never escapes; a bad job
    /// (or a bad notifier) must not take the worker down.
    async fn report_failure(&self, job: &Job, err: JobError) {
        warn!(worker = %self.id, class = %job.class(), error = %err, "job failed");
        let record = FailureRecord::from_job(job, &err, &self.id);
        if let Err(backend_err) = self.client.failure().record(record).await {
            error!(error = %backend_err, "failure backend error; continuing");
        }
        if let Some(handler) = self.client.handler(job.class()) {
            job::run_failure_hooks(job, &handler, &err).await;
        }
        let stat = self.client.stat();
        if let Err(e) = stat.incr("failed").await {
            error!(error = %e, "could not bump failed counter");
        }
        if let Err(e) = stat.incr(&format!("failed:{}", self.id)).await {
            error!(error = %e, "could not bump per-worker failed counter");
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Ask the worker to stop after its in-flight job, if any.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wire TERM/INT to graceful shutdown. The first signal stops the
    /// reservation loop; a second one exits the process without waiting
    /// for the in-flight job.
    pub fn install_signal_handlers(&self) {
        let tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("termination signal received; finishing current job");
            let _ = tx.send(true);
            wait_for_termination().await;
            warn!("second termination signal; exiting immediately");
            std::process::exit(130);
        });
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Unregister any worker by identity: synthesize a dirty-exit failure for
/// a still-set marker, then drop the registry entry, marker, started stamp
/// and per-worker stats.
pub(crate) async fn unregister_id(client: &Forq, id: &str) -> Result<(), Error> {
    let namespace = client.namespace().to_string();

    let raw: Option<String> = {
        let mut conn = client
            .pool()
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(format!("get() from pool: {}", e)))?;
        conn.get(marker_key(&namespace, id)).await?
    };

    if let Some(raw) = raw {
        match serde_json::from_str::<WorkingOn>(&raw) {
            Ok(marker) => {
                let stranded = Job::new(marker.queue, marker.payload);
                let err = JobError::DirtyExit;
                warn!(worker = %id, class = %stranded.class(), "worker died mid-job; recording dirty exit");
                let record = FailureRecord::from_job(&stranded, &err, id);
                if let Err(backend_err) = client.failure().record(record).await {
                    error!(error = %backend_err, "failure backend error while recording dirty exit");
                }
                if let Some(handler) = client.handler(stranded.class()) {
                    job::run_failure_hooks(&stranded, &handler, &err).await;
                }
            }
            Err(e) => warn!(worker = %id, error = %e, "undecodable working-on marker"),
        }
    }

    let mut conn = client
        .pool()
        .get()
        .await
        .map_err(|e| StorageError::Unavailable(format!("get() from pool: {}", e)))?;
    let _: () = conn.srem(set_key(&namespace), id).await?;
    let _: () = conn.del(marker_key(&namespace, id)).await?;
    let _: () = conn.del(started_key(&namespace, id)).await?;
    drop(conn);

    let stat = client.stat();
    stat.clear(&format!("processed:{}", id)).await?;
    stat.clear(&format!("failed:{}", id)).await?;
    Ok(())
}

/// Pids of processes on this host running this program, or `None` when
/// the process table cannot be read (in which case pruning is skipped;
/// better to leave a dead entry than to prune a live peer).
fn worker_pids() -> Option<HashSet<u32>> {
    let program = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|f| f.to_string_lossy().into_owned()))?;

    let output = std::process::Command::new("ps")
        .args(["-A", "-o", "pid=,args="])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let mut pids = HashSet::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let line = line.trim();
        let mut parts = line.splitn(2, char::is_whitespace);
        let (Some(pid), Some(command)) = (parts.next(), parts.next()) else {
            continue;
        };
        if let Ok(pid) = pid.parse::<u32>() {
            if command.contains(&program) {
                pids.insert(pid);
            }
        }
    }
    Some(pids)
}

async fn wait_for_termination() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_parses_back() {
        let (host, pid, queues) = parse_id("deploy-1:4242:critical,high,low").unwrap();
        assert_eq!(host, "deploy-1");
        assert_eq!(pid, 4242);
        assert_eq!(queues, "critical,high,low");

        assert!(parse_id("no-pid-here").is_none());
        assert!(parse_id("host:notanumber:jobs").is_none());
    }

    #[test]
    fn worker_keys_are_namespaced() {
        assert_eq!(set_key("forq"), "forq:workers");
        assert_eq!(marker_key("forq", "h:1:jobs"), "forq:worker:h:1:jobs");
        assert_eq!(
            started_key("forq", "h:1:jobs"),
            "forq:worker:h:1:jobs:started"
        );
    }

    #[test]
    fn own_process_is_listed() {
        // The test binary itself shows up in the process listing, so a
        // registered worker with our pid would never be pruned. On hosts
        // without a usable `ps` the prune pass skips itself instead.
        if let Some(pids) = worker_pids() {
            assert!(pids.contains(&std::process::id()));
        }
    }
}
