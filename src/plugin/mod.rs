//! Lifecycle hook registration for job classes.
//!
//! The engine runs four hook families around every job execution:
//!
//! - `before_perform*`: run before the job body; an error aborts the job.
//! - `around_perform*`: wrap the remaining chain; the innermost layer is
//!   the job body itself.
//! - `after_perform*`: run after a successful job body.
//! - `on_failure*`: run when any of the above (or the body) fails.
//!
//! Hooks are registered explicitly on a [`HookSet`] rather than discovered
//! by reflection. Within a family, hooks execute in lexicographic order of
//! their registered name, so `around_perform_a` wraps `around_perform_b`.
//! That ordering is deterministic and stable across repeated calls.
//!
//! Hook names must be namespaced: a hook registered under exactly the bare
//! family name (`before_perform`, `after_perform`, `around_perform`,
//! `on_failure`) is indistinguishable from an application's own job entry
//! points and is rejected by [`HookSet::lint`].

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{Error, JobError};

/// Future returned by before/around/after hooks.
pub type HookFuture = BoxFuture<'static, Result<(), JobError>>;

/// The continuation an around hook must invoke to run the rest of the
/// chain. Not calling it skips the job body.
pub type Next = Box<dyn FnOnce() -> HookFuture + Send>;

/// A before or after hook: receives the job's argument list.
pub type SimpleHookFn = Arc<dyn Fn(Vec<Value>) -> HookFuture + Send + Sync>;

/// An around hook: receives the argument list and the continuation.
pub type AroundHookFn = Arc<dyn Fn(Vec<Value>, Next) -> HookFuture + Send + Sync>;

/// A failure hook: receives the execution error and the argument list.
/// Failure hooks cannot themselves fail the job; errors they produce are
/// logged and dropped by the caller.
pub type FailureHookFn = Arc<dyn Fn(JobError, Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

const BEFORE_FAMILY: &str = "before_perform";
const AROUND_FAMILY: &str = "around_perform";
const AFTER_FAMILY: &str = "after_perform";
const FAILURE_FAMILY: &str = "on_failure";

/// The ordered callback slots a job class populates.
#[derive(Clone, Default)]
pub struct HookSet {
    before: Vec<(String, SimpleHookFn)>,
    around: Vec<(String, AroundHookFn)>,
    after: Vec<(String, SimpleHookFn)>,
    on_failure: Vec<(String, FailureHookFn)>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `before_perform` hook under `name`.
    pub fn before<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> HookFuture + Send + Sync + 'static,
    {
        self.before.push((name.into(), Arc::new(f)));
        self
    }

    /// Register an `around_perform` hook under `name`.
    pub fn around<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>, Next) -> HookFuture + Send + Sync + 'static,
    {
        self.around.push((name.into(), Arc::new(f)));
        self
    }

    /// Register an `after_perform` hook under `name`.
    pub fn after<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> HookFuture + Send + Sync + 'static,
    {
        self.after.push((name.into(), Arc::new(f)));
        self
    }

    /// Register an `on_failure` hook under `name`.
    pub fn on_failure<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JobError, Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.on_failure.push((name.into(), Arc::new(f)));
        self
    }

    /// Before hooks, sorted lexicographically by name.
    pub fn before_hooks(&self) -> Vec<(String, SimpleHookFn)> {
        sorted(&self.before)
    }

    /// Around hooks, sorted lexicographically by name. The first entry is
    /// the outermost layer of the chain.
    pub fn around_hooks(&self) -> Vec<(String, AroundHookFn)> {
        sorted(&self.around)
    }

    /// After hooks, sorted lexicographically by name.
    pub fn after_hooks(&self) -> Vec<(String, SimpleHookFn)> {
        sorted(&self.after)
    }

    /// Failure hooks, sorted lexicographically by name.
    pub fn failure_hooks(&self) -> Vec<(String, FailureHookFn)> {
        sorted(&self.on_failure)
    }

    /// Validate that no hook is registered under a bare family name.
    ///
    /// `class` is the job class the hooks belong to; it is named in the
    /// resulting [`Error::Lint`] so misconfigured classes are easy to find.
    pub fn lint(&self, class: &str) -> Result<(), Error> {
        let families: [(&str, Vec<&String>); 4] = [
            (BEFORE_FAMILY, self.before.iter().map(|(n, _)| n).collect()),
            (AROUND_FAMILY, self.around.iter().map(|(n, _)| n).collect()),
            (AFTER_FAMILY, self.after.iter().map(|(n, _)| n).collect()),
            (FAILURE_FAMILY, self.on_failure.iter().map(|(n, _)| n).collect()),
        ];
        for (family, names) in families {
            for name in names {
                if name == family {
                    return Err(Error::Lint {
                        class: class.to_string(),
                        hook: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn sorted<T: Clone>(hooks: &[(String, T)]) -> Vec<(String, T)> {
    let mut out = hooks.to_vec();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}
