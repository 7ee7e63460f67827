//! Controller execution logic

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::benchmark::{BenchmarkResult, BenchmarkRunner, Workload};
use crate::cleaner::{CleanupReport, FleetCleaner};
use crate::config::{ControllerConfig, ProfileConfig, RunMode};
use crate::error::{FleetError, FleetResult};
use crate::instance::InstanceRecord;
use crate::readiness::{ReadinessOutcome, ReadinessWaiter};
use crate::reconciler::{FleetPlan, FleetReconciler};
use crate::retry::RetryPolicy;
use crate::shutdown::{Shutdown, ShutdownListener};
use crate::tags::RunTag;
use crate::traits::{ComputeProvider, RemoteExecutor, StorageProvider};
use crate::worker::{ApiRateLimiter, WorkerPool};

use super::aggregator::{aggregate_scores, order_results, RunSummary};

/// What one invocation produced
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// `run`: benchmark results and teardown
    Benchmark(RunSummary),
    /// `clean`: teardown only
    Cleanup(CleanupReport),
    /// `dryrun`: validated plan
    DryRun(FleetPlan),
}

impl RunOutcome {
    /// Whether the process should exit non-zero
    pub fn is_failure(&self) -> bool {
        match self {
            RunOutcome::Benchmark(summary) => summary.is_failure(),
            RunOutcome::Cleanup(report) => !report.is_clean(),
            RunOutcome::DryRun(plan) => plan.cancelled,
        }
    }
}

/// Drives one benchmark run against a resolved profile
///
/// Constructed once per invocation and holding every collaborator; nothing
/// here is process-global.
pub struct FleetController {
    pub(crate) profile: ProfileConfig,
    pub(crate) run_tag: RunTag,
    pub(crate) config: ControllerConfig,
    pub(crate) compute: Arc<dyn ComputeProvider>,
    pub(crate) storage: Arc<dyn StorageProvider>,
    pub(crate) executor: Arc<dyn RemoteExecutor>,
    pub(crate) workload: Workload,
    pub(crate) pool: WorkerPool,
    pub(crate) shutdown: Shutdown,
}

impl FleetController {
    /// Create a controller
    ///
    /// Use `ControllerBuilder` for validated construction.
    pub fn new(
        profile_name: &str,
        profile: ProfileConfig,
        config: ControllerConfig,
        compute: Arc<dyn ComputeProvider>,
        storage: Arc<dyn StorageProvider>,
        executor: Arc<dyn RemoteExecutor>,
        workload: Workload,
    ) -> Self {
        let shutdown = Shutdown::new();
        let rate_limiter = Arc::new(ApiRateLimiter::new(config.api_rate_limit));
        let pool = WorkerPool::new(config.concurrency, rate_limiter).with_shutdown(shutdown.listener());

        Self {
            run_tag: RunTag::derive(profile_name),
            profile,
            config,
            compute,
            storage,
            executor,
            workload,
            pool,
            shutdown,
        }
    }

    /// Run identifier
    pub fn run_tag(&self) -> &RunTag {
        &self.run_tag
    }

    /// Resolved profile
    pub fn profile(&self) -> &ProfileConfig {
        &self.profile
    }

    /// New cancellation listener
    pub fn shutdown_listener(&self) -> ShutdownListener {
        self.shutdown.listener()
    }

    /// Cancel the run
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.profile.retry_limit)
            .with_delays(self.config.retry_base_delay, self.config.retry_max_delay)
    }

    fn reconciler(&self) -> FleetReconciler {
        FleetReconciler::new(Arc::clone(&self.compute), self.retry_policy())
            .with_rate_limiter(self.pool.rate_limiter())
            .with_shutdown(self.shutdown.listener())
    }

    fn cleaner(&self, dry_run: bool) -> FleetCleaner {
        FleetCleaner::new(
            Arc::clone(&self.compute),
            Arc::clone(&self.storage),
            &self.pool,
            self.retry_policy(),
            dry_run,
        )
    }

    /// Execute `mode`. A profile with `dry_run` set turns `run` into `dryrun`.
    pub async fn execute(&self, mode: RunMode) -> FleetResult<RunOutcome> {
        match mode {
            RunMode::Run if self.profile.dry_run => self.dry_run().await.map(RunOutcome::DryRun),
            RunMode::Run => self.run().await.map(RunOutcome::Benchmark),
            RunMode::Clean => self.clean().await.map(RunOutcome::Cleanup),
            RunMode::DryRun => self.dry_run().await.map(RunOutcome::DryRun),
        }
    }

    /// Reconcile and terminate-excess in validation-only mode
    pub async fn dry_run(&self) -> FleetResult<FleetPlan> {
        let profile = ProfileConfig {
            dry_run: true,
            ..self.profile.clone()
        };
        let reconciler = self.reconciler();
        let plan = reconciler.reconcile(&profile, &self.run_tag).await?;
        reconciler.terminate_excess(&plan).await?;

        tracing::info!(
            run_tag = %self.run_tag,
            to_launch = plan.total_to_launch(),
            to_terminate = plan.total_to_terminate(),
            "Dry run validated"
        );
        Ok(plan)
    }

    /// Tear down everything tagged for this run
    pub async fn clean(&self) -> FleetResult<CleanupReport> {
        self.cleaner(self.profile.dry_run).teardown(&self.run_tag).await
    }

    /// Reconcile, wait for readiness, benchmark, tear down
    pub async fn run(&self) -> FleetResult<RunSummary> {
        let start = Instant::now();
        tracing::info!(
            run_tag = %self.run_tag,
            region = %self.profile.region,
            instance_types = ?self.profile.instance_types,
            desired = self.profile.total_desired(),
            concurrency = self.pool.concurrency(),
            "Starting run"
        );

        if self.config.preflight {
            // Authorization and parameter failures abort before anything exists
            if let Err(e) = self.dry_run().await {
                tracing::error!(run_tag = %self.run_tag, error = %e, "Preflight failed");
                return Err(e);
            }
        }

        let reconciler = self.reconciler();
        let mut plan = FleetPlan::new(self.run_tag.clone(), false);
        if let Err(e) = reconciler.reconcile_into(&self.profile, &mut plan).await {
            tracing::error!(run_tag = %self.run_tag, error = %e, "Reconciliation failed");
            let orphaned = if self.config.keep_fleet {
                plan.orphaned()
            } else {
                self.teardown_after_abort(&plan).await
            };
            if orphaned.is_empty() {
                return Err(e);
            }
            return Err(FleetError::Aborted {
                source: Box::new(e),
                orphaned,
            });
        }

        if let Err(e) = reconciler.terminate_excess(&plan).await {
            tracing::warn!(run_tag = %self.run_tag, error = %e, "Excess termination failed");
        }

        let waiter = ReadinessWaiter::new(
            Arc::clone(&self.compute),
            Arc::clone(&self.executor),
            self.pool.clone(),
            self.config.poll_interval,
        );
        let outcomes = waiter
            .await_ready(plan.fleet(), self.profile.retry_limit, Some(self.shutdown.listener()))
            .await;

        let mut ready = Vec::new();
        let mut timed_out = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                ReadinessOutcome::Ready(record) => ready.push(record),
                ReadinessOutcome::TimedOut { .. } => timed_out.push(id),
                ReadinessOutcome::Cancelled => {}
            }
        }

        let mut results = self.benchmark(ready).await;
        order_results(&mut results, &self.profile.instance_types);
        let type_scores = aggregate_scores(&results, &self.profile.instance_types);
        let cancelled = plan.cancelled || self.shutdown.is_triggered();

        let (cleanup, cleanup_error) = if self.config.keep_fleet {
            tracing::info!(run_tag = %self.run_tag, "Keeping fleet, skipping teardown");
            (None, None)
        } else {
            match self
                .cleaner(false)
                .teardown_with(&self.run_tag, &plan.orphaned_records())
                .await
            {
                Ok(report) => (Some(report), None),
                Err(e) => {
                    tracing::error!(run_tag = %self.run_tag, error = %e, "Teardown failed");
                    (None, Some(e.to_string()))
                }
            }
        };

        let summary = RunSummary {
            run_tag: self.run_tag.clone(),
            tag_orphans: plan.orphaned(),
            plan,
            results,
            timed_out,
            cleanup,
            cleanup_error,
            cancelled,
            type_scores,
        };

        tracing::info!(
            run_tag = %self.run_tag,
            elapsed_secs = start.elapsed().as_secs_f64(),
            results = summary.results.len(),
            timed_out = summary.timed_out.len(),
            orphaned = summary.orphaned().len(),
            cancelled,
            "Run completed"
        );
        Ok(summary)
    }

    async fn benchmark(&self, ready: Vec<InstanceRecord>) -> Vec<BenchmarkResult> {
        let runner = BenchmarkRunner::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.storage),
            self.workload.clone(),
        );

        // Fan-in: each task returns its result, nothing shared is mutated
        self.pool
            .run_all(ready, move |instance| {
                let runner = runner.clone();
                async move { runner.run_on(&instance).await }
            })
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(result) => Some(result),
                Err(FleetError::Cancelled) => None,
                Err(e) => {
                    tracing::error!(error = %e, "Benchmark task failed");
                    None
                }
            })
            .collect()
    }

    /// Tear down after a failed reconciliation, returning what is left behind.
    ///
    /// Untagged instances from the partial plan are passed in explicitly; a
    /// tag query cannot find them.
    async fn teardown_after_abort(&self, plan: &FleetPlan) -> Vec<String> {
        match self
            .cleaner(false)
            .teardown_with(&self.run_tag, &plan.orphaned_records())
            .await
        {
            Ok(report) => {
                if !report.is_clean() {
                    tracing::warn!(run_tag = %self.run_tag, orphaned = ?report.orphaned, "Teardown after abort left resources");
                }
                report.orphaned
            }
            Err(e) => {
                tracing::error!(run_tag = %self.run_tag, error = %e, "Teardown after abort failed");
                plan.orphaned()
            }
        }
    }

    /// Execute `mode` with Ctrl+C handling
    ///
    /// Ctrl+C cancels the run: no further launches, waits return promptly,
    /// and teardown still runs unless the fleet is kept.
    pub async fn run_with_signal_handling(&self, mode: RunMode) -> FleetResult<RunOutcome> {
        let shutdown = self.shutdown.clone();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, cancelling run...");
                    shutdown.trigger();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.execute(mode).await;
        signal_handle.abort();
        result
    }

    /// Execute `mode`, cancelling once `timeout` elapses
    pub async fn run_with_timeout(&self, mode: RunMode, timeout: Duration) -> FleetResult<RunOutcome> {
        let shutdown = self.shutdown.clone();

        let timeout_handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::info!("Timeout reached, cancelling run...");
            shutdown.trigger();
        });

        let result = self.execute(mode).await;
        timeout_handle.abort();
        result
    }
}

impl std::fmt::Debug for FleetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetController")
            .field("run_tag", &self.run_tag)
            .field("profile", &self.profile)
            .field("config", &self.config)
            .field("compute", &self.compute.provider_name())
            .field("storage", &self.storage.provider_name())
            .field("workload", &self.workload.name)
            .finish()
    }
}
