//! Shared-store access layer.
//!
//! Redis is the single source of truth for everything cross-process: queue
//! contents, the queue-name registry, worker registration and working-on
//! markers, statistics counters, and recorded failures. This module owns
//! pool construction and the store-level error type; the actual key layout
//! lives with the components that own each key.

mod error;
mod pool;

pub use error::StorageError;
pub use pool::{create_redis_pool, create_redis_pool_with_config, RedisConfig};

/// Convenience alias for the pooled Redis handle threaded through the crate.
pub type RedisPool = bb8_redis::bb8::Pool<bb8_redis::RedisConnectionManager>;
