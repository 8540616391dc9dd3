//! Engine configuration.

use std::env;

use crate::storage::RedisConfig;

/// Connection and namespace settings for a [`Forq`](crate::Forq) client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis URL, e.g. `redis://127.0.0.1:6379/0`.
    pub redis_url: String,
    /// Key namespace prefixed onto every key this engine touches.
    pub namespace: String,
    /// Connection pool tuning.
    pub pool: RedisConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".into(),
            namespace: "forq".into(),
            pool: RedisConfig::default(),
        }
    }
}

impl Config {
    /// Resolve configuration from the environment, falling back to
    /// defaults. Reads `FORQ_REDIS_URL` and `FORQ_NAMESPACE`; pool tuning
    /// keeps its defaults (process entry points that need more pass a
    /// custom [`RedisConfig`]).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("FORQ_REDIS_URL") {
            if !url.is_empty() {
                config.redis_url = url;
            }
        }
        if let Ok(ns) = env::var("FORQ_NAMESPACE") {
            if !ns.is_empty() {
                config.namespace = ns;
            }
        }
        config
    }

    /// Override the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}
