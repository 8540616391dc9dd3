//! The job record and the perform pipeline.

mod handler;

pub use handler::{HandlerRegistry, JobHandler};

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::JobError;
use crate::plugin::Next;

/// The serialized unit of work stored on a queue: a target class name and
/// its argument list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    pub class: String,
    pub args: Vec<Value>,
}

impl Payload {
    pub fn new(class: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            class: class.into(),
            args,
        }
    }

    /// The canonical stored form. Serialization is deterministic (struct
    /// field order), so equal payloads always serialize to equal strings;
    /// exact-value list removal relies on this.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A job record bound to the queue it was reserved from.
///
/// Equality is structural: two jobs are equal iff queue, class and args all
/// match (args comparison is order-sensitive).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub queue: String,
    pub payload: Payload,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: Payload) -> Self {
        Self {
            queue: queue.into(),
            payload,
        }
    }

    pub fn class(&self) -> &str {
        &self.payload.class
    }

    pub fn args(&self) -> &[Value] {
        &self.payload.args
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Job{{{}}} | {} | {})",
            self.queue,
            self.payload.class,
            serde_json::to_string(&self.payload.args).unwrap_or_default()
        )
    }
}

/// Run a job through its handler's full hook pipeline:
/// before hooks, the around chain wrapping the job body, then after hooks.
///
/// Hooks in each family run in lexicographic name order. For around hooks
/// the first name in sort order is the outermost wrapper, so it observes
/// the job body first and last. Failure hooks are NOT run here; the
/// worker dispatches them together with the failure record so that dirty
/// exits take the same path.
pub async fn perform(job: &Job, handler: Arc<dyn JobHandler>) -> Result<(), JobError> {
    let hooks = handler.hooks();
    let args = job.payload.args.clone();

    for (name, hook) in hooks.before_hooks() {
        debug!(hook = %name, class = %job.payload.class, "running before hook");
        hook(args.clone()).await?;
    }

    // Innermost layer of the around chain is the job body itself.
    let mut chain: Next = {
        let handler = Arc::clone(&handler);
        let args = args.clone();
        Box::new(move || async move { handler.perform(args).await }.boxed())
    };
    for (name, hook) in hooks.around_hooks().into_iter().rev() {
        let inner = chain;
        let args = args.clone();
        let class = job.payload.class.clone();
        chain = Box::new(move || {
            debug!(hook = %name, class = %class, "running around hook");
            hook(args, inner)
        });
    }
    chain().await?;

    for (name, hook) in hooks.after_hooks() {
        debug!(hook = %name, class = %job.payload.class, "running after hook");
        hook(args.clone()).await?;
    }

    Ok(())
}

/// Run a job's failure hooks for `error`. Hook errors cannot fail the job
/// (it already failed); they only log.
pub async fn run_failure_hooks(job: &Job, handler: &Arc<dyn JobHandler>, error: &JobError) {
    for (name, hook) in handler.hooks().failure_hooks() {
        debug!(hook = %name, class = %job.payload.class, "running failure hook");
        hook(error.clone(), job.payload.args.clone()).await;
    }
}
