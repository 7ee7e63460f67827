//! Bounded fan-out of per-instance work

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::{FleetError, FleetResult};
use crate::shutdown::ShutdownListener;

use super::rate_limiter::ApiRateLimiter;

/// Bounded worker pool
///
/// Each item runs on its own tokio task, at most `concurrency` at a time,
/// with every task start paced by the shared [`ApiRateLimiter`]. Results come
/// back in input order regardless of completion order.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    rate_limiter: Arc<ApiRateLimiter>,
    concurrency: usize,
    shutdown: Option<ShutdownListener>,
}

impl WorkerPool {
    /// Create a pool
    pub fn new(concurrency: usize, rate_limiter: Arc<ApiRateLimiter>) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            rate_limiter,
            concurrency,
            shutdown: None,
        }
    }

    /// Skip items that have not started once `shutdown` fires. Items already
    /// running are never interrupted by the pool.
    pub fn with_shutdown(mut self, shutdown: ShutdownListener) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// A pool sharing this one's limits but ignoring cancellation
    pub fn uncancellable(&self) -> Self {
        Self {
            shutdown: None,
            ..self.clone()
        }
    }

    /// Maximum concurrent tasks
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Shared provider-call limiter
    pub fn rate_limiter(&self) -> Arc<ApiRateLimiter> {
        Arc::clone(&self.rate_limiter)
    }

    /// Run `work` over every item.
    ///
    /// An item skipped because of cancellation yields `Err(Cancelled)`; a
    /// panicking task yields `Err(Worker)`. Other items are unaffected.
    pub async fn run_all<I, T, F, Fut>(&self, items: Vec<I>, work: F) -> Vec<FleetResult<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let semaphore = Arc::clone(&self.semaphore);
            let rate_limiter = Arc::clone(&self.rate_limiter);
            let shutdown = self.shutdown.clone();
            let work = Arc::clone(&work);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| FleetError::Cancelled)?;
                if shutdown.as_ref().is_some_and(|s| s.is_triggered()) {
                    return Err(FleetError::Cancelled);
                }
                rate_limiter.wait().await;
                Ok(work(item).await)
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(idx, joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(task = idx, error = %e, "Pool task panicked");
                    Err(FleetError::worker(e.to_string()))
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .field("rate_limiter", &self.rate_limiter)
            .field("cancellable", &self.shutdown.is_some())
            .finish()
    }
}
