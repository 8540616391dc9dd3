//! Shared harness for the Redis-backed integration tests.
//!
//! Each test runs in its own key namespace so the suite can share one
//! server; the namespace is wiped before the test starts. The suite needs
//! a Redis at `redis://127.0.0.1:6379` (override with
//! `FORQ_TEST_REDIS_URL`), which is why these tests are `#[ignore]`d by
//! default.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use forq::{Config, Forq, HookSet, JobError, JobHandler, RedisConfig};
use serde_json::Value;

pub fn redis_url() -> String {
    std::env::var("FORQ_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Build a client in a freshly-wiped namespace.
pub async fn client(namespace: &str) -> Forq {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let namespace = format!("forq-test-{}", namespace);
    flush_namespace(&namespace).await;
    Forq::connect(Config {
        redis_url: redis_url(),
        namespace,
        pool: RedisConfig::default(),
    })
    .await
    .expect("integration tests need a running Redis")
}

async fn flush_namespace(namespace: &str) {
    let client = redis::Client::open(redis_url()).expect("valid redis url");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("integration tests need a running Redis");
    let keys: Vec<String> = redis::cmd("KEYS")
        .arg(format!("{}:*", namespace))
        .query_async(&mut conn)
        .await
        .expect("KEYS");
    if !keys.is_empty() {
        let _: () = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .expect("DEL");
    }
}

/// Succeeds and counts its invocations.
#[derive(Default)]
pub struct GoodJob {
    pub performed: AtomicUsize,
}

#[async_trait]
impl JobHandler for GoodJob {
    fn queue(&self) -> Option<&str> {
        Some("jobs")
    }

    async fn perform(&self, _args: Vec<Value>) -> Result<(), JobError> {
        self.performed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails with a stable exception kind and message.
pub struct BadJob;

#[async_trait]
impl JobHandler for BadJob {
    fn queue(&self) -> Option<&str> {
        Some("jobs")
    }

    async fn perform(&self, _args: Vec<Value>) -> Result<(), JobError> {
        Err(JobError::new("BadJobError", "Bad job!"))
    }
}

/// Records the exception kind its on_failure hook saw.
#[derive(Default)]
pub struct FailureAware {
    pub seen: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl JobHandler for FailureAware {
    fn queue(&self) -> Option<&str> {
        Some("jobs")
    }

    fn hooks(&self) -> HookSet {
        let seen = Arc::clone(&self.seen);
        HookSet::new().on_failure("on_failure_record", move |err, _args| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                seen.lock().unwrap().push(err.exception_kind().to_string());
            })
        })
    }

    async fn perform(&self, _args: Vec<Value>) -> Result<(), JobError> {
        Ok(())
    }
}
