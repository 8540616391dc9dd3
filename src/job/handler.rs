//! The job descriptor interface and handler registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobError;
use crate::plugin::HookSet;

/// A job class: the execution entry point for records carrying its name.
///
/// Implementations declare an optional default queue (used by
/// [`Forq::enqueue`](crate::Forq::enqueue)), their lifecycle hooks, and the
/// job body itself. The class name a handler is registered under is the
/// stable type identifier stored in every job record.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Queue this class enqueues to when the producer does not name one.
    fn queue(&self) -> Option<&str> {
        None
    }

    /// Lifecycle hooks to run around `perform`. Defaults to none.
    fn hooks(&self) -> HookSet {
        HookSet::new()
    }

    /// Execute the job body.
    async fn perform(&self, args: Vec<Value>) -> Result<(), JobError>;
}

/// Maps class names to their handlers.
///
/// Shared between the client, workers and the perform pipeline; cloning is
/// cheap and all clones observe the same registrations.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn JobHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, class: impl Into<String>, handler: Arc<dyn JobHandler>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(class.into(), handler);
        }
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn JobHandler>> {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(class).cloned())
    }

    pub fn contains(&self, class: &str) -> bool {
        self.inner
            .read()
            .map(|map| map.contains_key(class))
            .unwrap_or(false)
    }
}
