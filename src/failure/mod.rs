//! The failure-backend contract and failure records.
//!
//! Every job that errors (or is lost to a dead worker) becomes a
//! [`FailureRecord`] dispatched to the configured [`FailureBackend`]. The
//! default backend persists records to Redis ([`RedisFailure`]); several
//! backends can be fanned out with [`Multiple`]; an external notifier is
//! just another implementation of the same trait.

mod multiple;
mod redis;

pub use multiple::Multiple;
pub use redis::RedisFailure;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, JobError};
use crate::job::{Job, Payload};

/// Timestamp format used for `failed_at` / `retried_at` stamps.
const STAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S %Z";

/// One recorded job failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub failed_at: String,
    pub payload: Payload,
    /// Error kind (the `exception_kind` of the producing [`JobError`]).
    pub exception: String,
    pub error: String,
    pub backtrace: Vec<String>,
    /// Identity of the worker that was running the job.
    pub worker: String,
    pub queue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retried_at: Option<String>,
}

impl FailureRecord {
    /// Build a record for `error` raised while `worker` ran `job`.
    pub fn from_job(job: &Job, error: &JobError, worker: &str) -> Self {
        Self {
            failed_at: Utc::now().format(STAMP_FORMAT).to_string(),
            payload: job.payload.clone(),
            exception: error.exception_kind().to_string(),
            error: error.to_string(),
            backtrace: filter_backtrace(error.backtrace()),
            worker: worker.to_string(),
            queue: job.queue.clone(),
            retried_at: None,
        }
    }

    pub(crate) fn stamp_retried(&mut self) {
        self.retried_at = Some(Utc::now().format(STAMP_FORMAT).to_string());
    }
}

/// A sink for failed job executions.
///
/// `requeue`/`remove` address records by position in the backend's ordered
/// collection; positions are not stable identities across removals, so
/// implementations must remove exactly the addressed record even while
/// other failures are concurrently appended.
#[async_trait]
pub trait FailureBackend: Send + Sync {
    /// Persist one failure.
    async fn record(&self, failure: FailureRecord) -> Result<(), Error>;

    /// Number of recorded failures.
    async fn count(&self) -> Result<u64, Error>;

    /// Up to `count` records starting at `start`, oldest first.
    async fn all(&self, start: isize, count: usize) -> Result<Vec<FailureRecord>, Error>;

    /// Drop every recorded failure.
    async fn clear(&self) -> Result<(), Error>;

    /// Stamp `retried_at` on the record at `index` and re-create a fresh
    /// pending job from its payload on its original queue. The failure
    /// record itself stays in place.
    async fn requeue(&self, index: isize) -> Result<(), Error>;

    /// Remove exactly the record at `index`.
    async fn remove(&self, index: isize) -> Result<(), Error>;

    /// Requeue every record whose `queue` field matches; returns how many.
    async fn requeue_queue(&self, queue: &str) -> Result<u64, Error>;

    /// Remove every record whose `queue` field matches; returns how many.
    async fn remove_queue(&self, queue: &str) -> Result<u64, Error>;
}

/// Truncate a captured backtrace at the first frame belonging to this
/// engine's own job-execution internals, leaving only the frames the
/// user's code put on the stack.
pub fn filter_backtrace(frames: &[String]) -> Vec<String> {
    frames
        .iter()
        .take_while(|frame| !frame.contains("forq::job::"))
        .cloned()
        .collect()
}
