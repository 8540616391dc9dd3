//! Fan-out across several failure backends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use super::{FailureBackend, FailureRecord};
use crate::error::Error;

/// Delivers every failure to each composed backend in order.
///
/// One backend erroring must not suppress delivery to the others, so all
/// of them are attempted before the first error (if any) is returned.
/// Read and maintenance operations delegate to the first backend, which is
/// treated as the primary record of failures.
pub struct Multiple {
    backends: Vec<Arc<dyn FailureBackend>>,
}

impl Multiple {
    pub fn new(backends: Vec<Arc<dyn FailureBackend>>) -> Self {
        Self { backends }
    }

    fn primary(&self) -> Result<&Arc<dyn FailureBackend>, Error> {
        self.backends.first().ok_or(Error::Storage(
            crate::storage::StorageError::Configuration(
                "Multiple failure backend composed with no backends".into(),
            ),
        ))
    }
}

#[async_trait]
impl FailureBackend for Multiple {
    async fn record(&self, failure: FailureRecord) -> Result<(), Error> {
        let mut first_error = None;
        for backend in &self.backends {
            if let Err(e) = backend.record(failure.clone()).await {
                error!(error = %e, "failure backend rejected record; continuing fan-out");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn count(&self) -> Result<u64, Error> {
        self.primary()?.count().await
    }

    async fn all(&self, start: isize, count: usize) -> Result<Vec<FailureRecord>, Error> {
        self.primary()?.all(start, count).await
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut first_error = None;
        for backend in &self.backends {
            if let Err(e) = backend.clear().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn requeue(&self, index: isize) -> Result<(), Error> {
        self.primary()?.requeue(index).await
    }

    async fn remove(&self, index: isize) -> Result<(), Error> {
        self.primary()?.remove(index).await
    }

    async fn requeue_queue(&self, queue: &str) -> Result<u64, Error> {
        self.primary()?.requeue_queue(queue).await
    }

    async fn remove_queue(&self, queue: &str) -> Result<u64, Error> {
        self.primary()?.remove_queue(queue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::job::{Job, Payload};
    use std::sync::Mutex;

    struct Flaky;

    #[async_trait]
    impl FailureBackend for Flaky {
        async fn record(&self, _failure: FailureRecord) -> Result<(), Error> {
            Err(Error::Storage(crate::storage::StorageError::Unavailable(
                "notifier down".into(),
            )))
        }
        async fn count(&self) -> Result<u64, Error> {
            Ok(0)
        }
        async fn all(&self, _start: isize, _count: usize) -> Result<Vec<FailureRecord>, Error> {
            Ok(Vec::new())
        }
        async fn clear(&self) -> Result<(), Error> {
            Ok(())
        }
        async fn requeue(&self, _index: isize) -> Result<(), Error> {
            Ok(())
        }
        async fn remove(&self, _index: isize) -> Result<(), Error> {
            Ok(())
        }
        async fn requeue_queue(&self, _queue: &str) -> Result<u64, Error> {
            Ok(0)
        }
        async fn remove_queue(&self, _queue: &str) -> Result<u64, Error> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct Capturing {
        seen: Mutex<Vec<FailureRecord>>,
    }

    #[async_trait]
    impl FailureBackend for Capturing {
        async fn record(&self, failure: FailureRecord) -> Result<(), Error> {
            self.seen.lock().unwrap().push(failure);
            Ok(())
        }
        async fn count(&self) -> Result<u64, Error> {
            Ok(self.seen.lock().unwrap().len() as u64)
        }
        async fn all(&self, _start: isize, _count: usize) -> Result<Vec<FailureRecord>, Error> {
            Ok(self.seen.lock().unwrap().clone())
        }
        async fn clear(&self) -> Result<(), Error> {
            self.seen.lock().unwrap().clear();
            Ok(())
        }
        async fn requeue(&self, _index: isize) -> Result<(), Error> {
            Ok(())
        }
        async fn remove(&self, _index: isize) -> Result<(), Error> {
            Ok(())
        }
        async fn requeue_queue(&self, _queue: &str) -> Result<u64, Error> {
            Ok(0)
        }
        async fn remove_queue(&self, _queue: &str) -> Result<u64, Error> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn one_failing_backend_does_not_suppress_the_others() {
        let capturing = Arc::new(Capturing::default());
        let multiple = Multiple::new(vec![Arc::new(Flaky), capturing.clone()]);

        let job = Job::new("jobs", Payload::new("BadJob", vec![]));
        let record = FailureRecord::from_job(&job, &JobError::DirtyExit, "w");
        let result = multiple.record(record).await;

        // The flaky backend's error is reported, but delivery reached the
        // second backend anyway.
        assert!(result.is_err());
        assert_eq!(capturing.count().await.unwrap(), 1);
    }
}
