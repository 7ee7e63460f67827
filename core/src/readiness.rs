//! Readiness waits for launched instances
//!
//! Fixed-interval polling: every instance gets up to `retry_limit` polls,
//! `poll_interval` apart. A poll refreshes the instance from the provider and,
//! once it reports running, probes it through the remote executor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FleetError;
use crate::instance::{InstanceFilter, InstanceRecord, InstanceState};
use crate::shutdown::ShutdownListener;
use crate::traits::{ComputeProvider, RemoteExecutor};
use crate::worker::{ApiRateLimiter, WorkerPool};

/// Result of waiting on one instance
#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessOutcome {
    /// Running and reachable; carries the refreshed record
    Ready(InstanceRecord),
    /// Poll budget exhausted, or the instance went away
    TimedOut {
        /// State at the last successful poll
        last_state: InstanceState,
    },
    /// The run was cancelled before readiness was determined
    Cancelled,
}

impl ReadinessOutcome {
    /// Whether the instance is ready
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessOutcome::Ready(_))
    }
}

/// Polls instances until ready, timed out or cancelled
pub struct ReadinessWaiter {
    compute: Arc<dyn ComputeProvider>,
    executor: Arc<dyn RemoteExecutor>,
    pool: WorkerPool,
    poll_interval: Duration,
}

impl ReadinessWaiter {
    /// Create a waiter
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        executor: Arc<dyn RemoteExecutor>,
        pool: WorkerPool,
        poll_interval: Duration,
    ) -> Self {
        Self {
            compute,
            executor,
            pool,
            poll_interval,
        }
    }

    /// Wait for every instance, returning an outcome for each input id.
    ///
    /// Returns promptly after cancellation with whatever was determined so
    /// far; undetermined instances are reported as `Cancelled`.
    pub async fn await_ready(
        &self,
        instances: Vec<InstanceRecord>,
        retry_limit: u32,
        shutdown: Option<ShutdownListener>,
    ) -> BTreeMap<String, ReadinessOutcome> {
        let ids: Vec<String> = instances.iter().map(|r| r.id.clone()).collect();
        let poller = Poller {
            compute: Arc::clone(&self.compute),
            executor: Arc::clone(&self.executor),
            rate_limiter: self.pool.rate_limiter(),
            poll_interval: self.poll_interval,
            retry_limit: retry_limit.max(1),
            shutdown: shutdown.clone(),
        };

        let pool = match shutdown {
            Some(listener) => self.pool.clone().with_shutdown(listener),
            None => self.pool.uncancellable(),
        };

        let results = pool
            .run_all(instances, move |instance| {
                let poller = poller.clone();
                async move { poller.wait_for(instance).await }
            })
            .await;

        let mut outcomes = BTreeMap::new();
        for (id, result) in ids.into_iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(FleetError::Cancelled) => ReadinessOutcome::Cancelled,
                Err(e) => {
                    tracing::error!(instance_id = %id, error = %e, "Readiness wait failed");
                    ReadinessOutcome::TimedOut {
                        last_state: InstanceState::Pending,
                    }
                }
            };
            outcomes.insert(id, outcome);
        }

        let ready = outcomes.values().filter(|o| o.is_ready()).count();
        tracing::info!(
            total = outcomes.len(),
            ready,
            not_ready = outcomes.len() - ready,
            "Readiness wait finished"
        );
        outcomes
    }
}

impl std::fmt::Debug for ReadinessWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessWaiter")
            .field("provider", &self.compute.provider_name())
            .field("pool", &self.pool)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[derive(Clone)]
struct Poller {
    compute: Arc<dyn ComputeProvider>,
    executor: Arc<dyn RemoteExecutor>,
    rate_limiter: Arc<ApiRateLimiter>,
    poll_interval: Duration,
    retry_limit: u32,
    shutdown: Option<ShutdownListener>,
}

impl Poller {
    async fn wait_for(mut self, instance: InstanceRecord) -> ReadinessOutcome {
        let mut last_state = instance.state;

        for attempt in 1..=self.retry_limit {
            if self.is_cancelled() {
                return ReadinessOutcome::Cancelled;
            }

            self.rate_limiter.wait().await;
            let filter = InstanceFilter::by_ids(vec![instance.id.clone()]);
            match self.compute.list_instances(&filter).await {
                Ok(records) => match records.into_iter().find(|r| r.id == instance.id) {
                    Some(current) => {
                        last_state = current.state;
                        match current.state {
                            InstanceState::Running => {
                                if self.executor.probe(&current).await {
                                    tracing::info!(
                                        instance_id = %current.id,
                                        instance_type = %current.instance_type,
                                        attempt,
                                        "Instance ready"
                                    );
                                    return ReadinessOutcome::Ready(current);
                                }
                                tracing::debug!(instance_id = %current.id, attempt, "Probe failed");
                            }
                            InstanceState::Terminated => {
                                tracing::warn!(instance_id = %current.id, "Instance terminated while waiting");
                                return ReadinessOutcome::TimedOut { last_state };
                            }
                            state => {
                                tracing::debug!(instance_id = %current.id, %state, attempt, "Not running yet");
                            }
                        }
                    }
                    None => {
                        tracing::debug!(instance_id = %instance.id, attempt, "Instance not visible yet");
                    }
                },
                Err(e) => {
                    tracing::warn!(instance_id = %instance.id, attempt, error = %e, "Readiness poll failed");
                }
            }

            if attempt < self.retry_limit && !self.pause().await {
                return ReadinessOutcome::Cancelled;
            }
        }

        let error = FleetError::InstanceUnreachable {
            instance_id: instance.id.clone(),
            reason: format!("not ready after {} polls, last state {last_state}", self.retry_limit),
        };
        tracing::warn!(
            instance_id = %instance.id,
            instance_type = %instance.instance_type,
            error = %error,
            "Instance not ready within poll budget"
        );
        ReadinessOutcome::TimedOut { last_state }
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|s| s.is_triggered())
    }

    /// Sleep one interval; false if cancellation interrupted it
    async fn pause(&mut self) -> bool {
        match self.shutdown.as_mut() {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => true,
                    _ = shutdown.triggered() => false,
                }
            }
            None => {
                tokio::time::sleep(self.poll_interval).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use crate::tags::derive_run_tag;
    use crate::testing::{MockCloud, MockExecutor};
    use crate::traits::ProviderError;
    use std::time::Instant;

    fn waiter(cloud: &Arc<MockCloud>, executor: MockExecutor) -> ReadinessWaiter {
        ReadinessWaiter::new(
            Arc::clone(cloud) as Arc<dyn ComputeProvider>,
            Arc::new(executor),
            WorkerPool::new(4, Arc::new(ApiRateLimiter::unlimited())),
            Duration::from_millis(5),
        )
    }

    async fn launch(cloud: &Arc<MockCloud>, instance_type: &str, count: usize) -> Vec<InstanceRecord> {
        let spec = crate::instance::LaunchSpec {
            image_id: "ami-1".into(),
            instance_type: instance_type.into(),
            key_name: "k".into(),
            subnet_id: "s".into(),
            boot_volume: Default::default(),
            tags: crate::tags::RunTags::new(&derive_run_tag("t"), None).unwrap().to_vec(),
            client_token: format!("token-{instance_type}"),
        };
        cloud.create_instances(&spec, count, false).await.unwrap()
    }

    #[tokio::test]
    async fn test_pending_instances_become_ready() {
        let cloud = Arc::new(MockCloud::new().with_boot_polls(2));
        let instances = launch(&cloud, "t2.micro", 3).await;

        let outcomes = waiter(&cloud, MockExecutor::new())
            .await_ready(instances, 5, None)
            .await;

        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes.values() {
            match outcome {
                ReadinessOutcome::Ready(record) => assert_eq!(record.state, InstanceState::Running),
                other => panic!("expected ready, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_stuck_instance_times_out_within_budget() {
        let cloud = Arc::new(MockCloud::new().with_stuck_type("t2.nano"));
        let mut instances = launch(&cloud, "t2.nano", 1).await;
        instances.extend(launch(&cloud, "t2.micro", 1).await);
        let stuck_id = instances[0].id.clone();

        let start = Instant::now();
        let outcomes = waiter(&cloud, MockExecutor::new())
            .await_ready(instances, 3, None)
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[&stuck_id],
            ReadinessOutcome::TimedOut {
                last_state: InstanceState::Pending
            }
        );
        assert_eq!(outcomes.values().filter(|o| o.is_ready()).count(), 1);
        // Three polls, two intervals apart
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unreachable_instance_times_out() {
        let cloud = Arc::new(MockCloud::new());
        let instances = launch(&cloud, "c5.large", 2).await;

        let outcomes = waiter(&cloud, MockExecutor::new().with_unreachable_type("c5.large"))
            .await_ready(instances, 2, None)
            .await;

        assert!(outcomes.values().all(|o| matches!(
            o,
            ReadinessOutcome::TimedOut {
                last_state: InstanceState::Running
            }
        )));
    }

    #[tokio::test]
    async fn test_poll_errors_count_against_budget() {
        let cloud = Arc::new(MockCloud::new());
        let instances = launch(&cloud, "t2.micro", 1).await;
        for _ in 0..2 {
            cloud.fail_next("list_instances", ProviderError::Unavailable("reset".into()));
        }

        let outcomes = waiter(&cloud, MockExecutor::new())
            .await_ready(instances, 2, None)
            .await;
        assert!(matches!(
            outcomes.values().next(),
            Some(ReadinessOutcome::TimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminated_instance_stops_early() {
        let cloud = Arc::new(MockCloud::new());
        let instances = launch(&cloud, "t2.micro", 1).await;
        cloud.set_state(&instances[0].id, InstanceState::Terminated);

        let outcomes = waiter(&cloud, MockExecutor::new())
            .await_ready(instances, 10, None)
            .await;
        assert_eq!(
            outcomes.values().next(),
            Some(&ReadinessOutcome::TimedOut {
                last_state: InstanceState::Terminated
            })
        );
        assert_eq!(cloud.calls_starting_with("list").len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_returns_every_instance() {
        let cloud = Arc::new(MockCloud::new().with_stuck_type("t2.micro"));
        let instances = launch(&cloud, "t2.micro", 6).await;
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let waiter = ReadinessWaiter::new(
            Arc::clone(&cloud) as Arc<dyn ComputeProvider>,
            Arc::new(MockExecutor::new()),
            WorkerPool::new(2, Arc::new(ApiRateLimiter::unlimited())),
            Duration::from_secs(30),
        );

        let start = Instant::now();
        let outcomes = waiter
            .await_ready(instances, 1_000, Some(shutdown.listener()))
            .await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes
            .values()
            .all(|o| *o == ReadinessOutcome::Cancelled));
    }
}
