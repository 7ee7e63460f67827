//! Worker pool for per-instance work
//!
//! Launch, readiness waits, benchmark runs and cleanup touch independent
//! instances, so they fan out. The fan-out is bounded: a semaphore caps the
//! number of in-flight tasks and a shared token bucket paces provider calls so
//! a large fleet does not trip provider throttling.
//!
//! # Example
//!
//! ```ignore
//! use fleet_bench_core::worker::{ApiRateLimiter, WorkerPool};
//!
//! let pool = WorkerPool::new(8, Arc::new(ApiRateLimiter::new(Some(10.0))))
//!     .with_shutdown(shutdown.listener());
//!
//! let results = pool.run_all(instances, move |instance| {
//!     let runner = Arc::clone(&runner);
//!     async move { runner.run_on(&instance).await }
//! }).await;
//! ```

mod pool;
mod rate_limiter;

pub use pool::WorkerPool;
pub use rate_limiter::ApiRateLimiter;

#[cfg(test)]
mod tests;
