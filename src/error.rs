//! Crate-level error taxonomy.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the queue, job and worker APIs.
///
/// Producer-side errors (`NoQueue`, `NoClass`) are returned synchronously
/// to the caller. Execution-side failures never appear here; they are
/// captured at the worker boundary as [`JobError`] and turned into failure
/// records.
#[derive(Error, Debug)]
pub enum Error {
    /// A job was enqueued, or a worker started, without a resolvable queue.
    #[error("jobs must be placed onto a queue")]
    NoQueue,

    /// A job was created without a class identifier.
    #[error("jobs must be given a class")]
    NoClass,

    /// A stored payload could not be decoded.
    #[error("failed to decode stored payload: {0}")]
    Decode(String),

    /// A hook name collides with a reserved bare family name.
    #[error("{class}.{hook} is not namespaced")]
    Lint { class: String, hook: String },

    /// A blocking pop ran out of time before an item appeared.
    #[error("timed out waiting for a job")]
    Timeout,

    /// The shared store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Storage(StorageError::from(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

/// How a single job execution failed.
///
/// These never propagate out of the worker's reservation loop; they are
/// converted into [`FailureRecord`](crate::failure::FailureRecord)s and
/// dispatched to the configured failure backends.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// The handler (or one of its hooks) returned an error.
    #[error("{message}")]
    Failed {
        /// Error kind recorded as the failure's `exception` field.
        exception: String,
        message: String,
        /// Frames captured where the error was constructed; the failure
        /// backend filters engine-internal frames out before storing.
        backtrace: Vec<String>,
    },

    /// The job was lost to a crashed or forcibly-killed worker, or its
    /// isolating task aborted without reporting a result.
    #[error("job was interrupted by a dirty exit")]
    DirtyExit,

    /// No handler is registered for the job's class, so there is no
    /// callable execution entry point.
    #[error("no handler registered for job class {0}")]
    NoHandler(String),
}

impl JobError {
    /// Build a handler failure with an explicit exception kind, capturing
    /// a backtrace at the raise site.
    pub fn new(exception: impl Into<String>, message: impl Into<String>) -> Self {
        let backtrace = std::backtrace::Backtrace::force_capture()
            .to_string()
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect();
        JobError::Failed {
            exception: exception.into(),
            message: message.into(),
            backtrace,
        }
    }

    /// Frames captured when the error was raised; empty for synthesized
    /// errors, which by definition carry no original stack.
    pub fn backtrace(&self) -> &[String] {
        match self {
            JobError::Failed { backtrace, .. } => backtrace,
            _ => &[],
        }
    }

    /// The exception kind stored on the failure record.
    pub fn exception_kind(&self) -> &str {
        match self {
            JobError::Failed { exception, .. } => exception,
            JobError::DirtyExit => "DirtyExit",
            JobError::NoHandler(_) => "NoHandlerError",
        }
    }
}
