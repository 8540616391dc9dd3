//! forq: a Redis-backed background-job processing engine.
//!
//! Producers enqueue named units of work onto durable FIFO queues; a fleet
//! of independent worker processes competes to reserve and execute them,
//! recording failures and liveness so operators can observe and recover
//! the fleet. Redis is the single source of truth; workers never talk to
//! each other directly.
//!
//! # Architecture
//!
//! - [`Queue`] / [`MultiQueue`]: single-queue and priority-ordered
//!   multi-queue reservation, blocking and non-blocking.
//! - [`Job`] / [`JobHandler`]: the serialized work record and the explicit
//!   execution interface classes implement.
//! - [`HookSet`]: before/around/after/on_failure lifecycle hooks with a
//!   deterministic, lint-checked ordering contract.
//! - [`Worker`]: registration, working-on markers, child-task isolation,
//!   dead-peer pruning, graceful shutdown, statistics.
//! - [`FailureBackend`]: the pluggable sink for failed executions;
//!   [`RedisFailure`] persists to the store, [`Multiple`] fans out.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use forq::{Config, Forq, JobError, JobHandler, Worker};
//! use serde_json::{json, Value};
//!
//! struct Archive;
//!
//! #[async_trait]
//! impl JobHandler for Archive {
//!     fn queue(&self) -> Option<&str> {
//!         Some("archive")
//!     }
//!
//!     async fn perform(&self, args: Vec<Value>) -> Result<(), JobError> {
//!         println!("archiving {:?}", args);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), forq::Error> {
//! let forq = Forq::connect(Config::from_env()).await?;
//! forq.register("Archive", Arc::new(Archive));
//! forq.enqueue("Archive", vec![json!(42)]).await?;
//!
//! let worker = Worker::new(forq.clone(), &["archive"])?;
//! worker.install_signal_handlers();
//! worker.work(std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;

pub mod failure;
pub mod job;
pub mod plugin;
pub mod queue;
pub mod stats;
pub mod storage;
pub mod worker;

pub use client::{Forq, Info};
pub use config::Config;
pub use error::{Error, JobError};
pub use failure::{FailureBackend, FailureRecord, Multiple, RedisFailure};
pub use job::{Job, JobHandler, Payload};
pub use plugin::HookSet;
pub use queue::{MultiQueue, Queue};
pub use storage::{RedisConfig, StorageError};
pub use worker::{DispatchCallbacks, Worker, WorkingOn};
