//! Benchmark execution on ready instances

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::instance::InstanceRecord;
use crate::tags::RunTag;
use crate::traits::{RemoteExecutor, StorageProvider};

/// Environment variable carrying the scratch bucket name
pub const SCRATCH_BUCKET_ENV: &str = "BENCH_SCRATCH_BUCKET";

const DEFAULT_COMMAND: &str = "python3 -c \"import math,time;n=2000000;t=time.perf_counter();\
s=sum(math.sqrt(i) for i in range(n));print(round(n/(time.perf_counter()-t),1))\"";

/// The command run on every instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Display name
    pub name: String,
    /// Shell command; its stdout must end with a number
    pub command: String,
    /// Create a per-instance scratch bucket before running
    #[serde(default)]
    pub needs_scratch: bool,
}

impl Default for Workload {
    /// CPU-bound square-root summation, printing operations per second
    fn default() -> Self {
        Self {
            name: "sqrt-sum".to_string(),
            command: DEFAULT_COMMAND.to_string(),
            needs_scratch: false,
        }
    }
}

impl Workload {
    /// Command line for one instance, with the scratch bucket exported if any
    pub fn command_for(&self, scratch_bucket: Option<&str>) -> String {
        match scratch_bucket {
            Some(bucket) => format!("{SCRATCH_BUCKET_ENV}={bucket} {}", self.command),
            None => self.command.clone(),
        }
    }
}

/// Extract the score: the last number on the last non-empty line
pub fn parse_score(stdout: &str) -> Option<f64> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    line.split_whitespace()
        .rev()
        .map(|token| token.trim_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-')))
        .find_map(|token| token.parse::<f64>().ok().filter(|v| v.is_finite()))
}

/// Per-instance benchmark status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    /// Score collected
    Success,
    /// Remote session could not be established
    Unreachable,
    /// Command failed or printed no score
    Failed,
}

impl BenchmarkStatus {
    /// Lowercase identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkStatus::Success => "success",
            BenchmarkStatus::Unreachable => "unreachable",
            BenchmarkStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BenchmarkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of the workload on one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Instance id
    pub instance_id: String,
    /// Instance type
    pub instance_type: String,
    /// Parsed score; 0.0 unless `status` is `Success`
    pub score: f64,
    /// Status
    pub status: BenchmarkStatus,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Wall-clock time spent on the instance
    pub duration_ms: u64,
}

impl BenchmarkResult {
    fn new(instance: &InstanceRecord, status: BenchmarkStatus, started: Instant) -> Self {
        Self {
            instance_id: instance.id.clone(),
            instance_type: instance.instance_type.clone(),
            score: 0.0,
            status,
            detail: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether a score was collected
    pub fn is_success(&self) -> bool {
        self.status == BenchmarkStatus::Success
    }
}

/// Runs the workload on one instance at a time
///
/// Failures are reported in the result, never raised, and nothing is retried
/// here: a flaky session should not silently extend billed uptime.
#[derive(Clone)]
pub struct BenchmarkRunner {
    executor: Arc<dyn RemoteExecutor>,
    storage: Arc<dyn StorageProvider>,
    workload: Workload,
}

impl BenchmarkRunner {
    /// Create a runner
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        storage: Arc<dyn StorageProvider>,
        workload: Workload,
    ) -> Self {
        Self {
            executor,
            storage,
            workload,
        }
    }

    /// The workload being run
    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    /// Run the workload on `instance`
    pub async fn run_on(&self, instance: &InstanceRecord) -> BenchmarkResult {
        let started = Instant::now();

        let session = match self.executor.connect(instance).await {
            Ok(session) => session,
            Err(e) => {
                return not_completed(instance, BenchmarkStatus::Unreachable, started, e.to_string())
            }
        };

        let scratch = if self.workload.needs_scratch {
            let bucket = RunTag::bucket_name(&instance.id);
            if let Err(e) = self.storage.create_bucket(&bucket).await {
                let reason = format!("scratch bucket {bucket}: {e}");
                return not_completed(instance, BenchmarkStatus::Failed, started, reason);
            }
            tracing::debug!(instance_id = %instance.id, bucket = %bucket, "Scratch bucket ready");
            Some(bucket)
        } else {
            None
        };

        let command = self.workload.command_for(scratch.as_deref());
        tracing::info!(
            instance_id = %instance.id,
            instance_type = %instance.instance_type,
            workload = %self.workload.name,
            "Running benchmark"
        );

        let output = match session.run(&command).await {
            Ok(output) => output,
            Err(e) => return not_completed(instance, BenchmarkStatus::Failed, started, e.to_string()),
        };

        if !output.success() {
            let reason = format!("exit code {}: {}", output.exit_code, output.stderr.trim());
            return not_completed(instance, BenchmarkStatus::Failed, started, reason);
        }

        match parse_score(&output.stdout) {
            Some(score) => {
                let mut result = BenchmarkResult::new(instance, BenchmarkStatus::Success, started);
                result.score = score;
                tracing::info!(
                    instance_id = %instance.id,
                    instance_type = %instance.instance_type,
                    score,
                    duration_ms = result.duration_ms,
                    "Benchmark finished"
                );
                result
            }
            None => not_completed(
                instance,
                BenchmarkStatus::Failed,
                started,
                "no numeric score in output".to_string(),
            ),
        }
    }
}

/// Log a per-instance failure and record it as a result
fn not_completed(
    instance: &InstanceRecord,
    status: BenchmarkStatus,
    started: Instant,
    reason: String,
) -> BenchmarkResult {
    let instance_id = instance.id.clone();
    let error = match status {
        BenchmarkStatus::Unreachable => FleetError::InstanceUnreachable {
            instance_id,
            reason: reason.clone(),
        },
        _ => FleetError::BenchmarkFailed {
            instance_id,
            reason: reason.clone(),
        },
    };
    tracing::warn!(
        instance_id = %instance.id,
        instance_type = %instance.instance_type,
        %status,
        error = %error,
        "Benchmark did not complete"
    );
    BenchmarkResult::new(instance, status, started).with_detail(reason)
}

impl std::fmt::Debug for BenchmarkRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkRunner")
            .field("storage", &self.storage.provider_name())
            .field("workload", &self.workload.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceState;
    use crate::testing::{MockCloud, MockExecutor};
    use crate::traits::ProviderError;

    fn instance(id: &str, instance_type: &str) -> InstanceRecord {
        InstanceRecord::new(id, instance_type, InstanceState::Running).with_public_address("10.0.0.1")
    }

    fn runner(executor: &Arc<MockExecutor>, cloud: &Arc<MockCloud>, workload: Workload) -> BenchmarkRunner {
        BenchmarkRunner::new(
            Arc::clone(executor) as Arc<dyn RemoteExecutor>,
            Arc::clone(cloud) as Arc<dyn StorageProvider>,
            workload,
        )
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("warming up\n1234.5\n"), Some(1234.5));
        assert_eq!(parse_score("Pystone(1.1) benchmark\nThis machine benchmarks at 52631.6 pystones/second\n\n"), Some(52631.6));
        assert_eq!(parse_score("ops/sec: 900,\n"), Some(900.0));
        assert_eq!(parse_score("42\nno number here\n"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("inf\n"), None);
    }

    #[test]
    fn test_command_exports_scratch_bucket() {
        let workload = Workload {
            name: "io".into(),
            command: "./bench.sh".into(),
            needs_scratch: true,
        };
        assert_eq!(
            workload.command_for(Some("benchmark-i-1")),
            "BENCH_SCRATCH_BUCKET=benchmark-i-1 ./bench.sh"
        );
        assert_eq!(workload.command_for(None), "./bench.sh");
    }

    #[test]
    fn test_default_workload_prints_rate() {
        let workload = Workload::default();
        assert!(workload.command.contains("math.sqrt"));
        assert!(!workload.needs_scratch);
    }

    #[tokio::test]
    async fn test_success_collects_score() {
        let executor = Arc::new(MockExecutor::new());
        let cloud = Arc::new(MockCloud::new());
        let result = runner(&executor, &cloud, Workload::default())
            .run_on(&instance("i-1", "t2.micro"))
            .await;

        assert_eq!(result.status, BenchmarkStatus::Success);
        assert_eq!(result.score, 1234.5);
        assert_eq!(result.instance_type, "t2.micro");
        assert!(result.detail.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_session() {
        let executor = Arc::new(MockExecutor::new().with_unreachable_type("c5.large"));
        let cloud = Arc::new(MockCloud::new());
        let result = runner(&executor, &cloud, Workload::default())
            .run_on(&instance("i-2", "c5.large"))
            .await;

        assert_eq!(result.status, BenchmarkStatus::Unreachable);
        assert_eq!(result.score, 0.0);
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let executor = Arc::new(MockExecutor::new().with_failing_type("t2.micro"));
        let cloud = Arc::new(MockCloud::new());
        let result = runner(&executor, &cloud, Workload::default())
            .run_on(&instance("i-3", "t2.micro"))
            .await;

        assert_eq!(result.status, BenchmarkStatus::Failed);
        assert!(result.detail.unwrap().contains("exit code 1"));
    }

    #[tokio::test]
    async fn test_malformed_output_fails() {
        let executor = Arc::new(MockExecutor::new().with_garbage_type("t2.micro"));
        let cloud = Arc::new(MockCloud::new());
        let result = runner(&executor, &cloud, Workload::default())
            .run_on(&instance("i-4", "t2.micro"))
            .await;
        assert_eq!(result.status, BenchmarkStatus::Failed);
    }

    #[tokio::test]
    async fn test_scratch_bucket_created_lazily() {
        let executor = Arc::new(MockExecutor::new());
        let cloud = Arc::new(MockCloud::new());
        let workload = Workload {
            needs_scratch: true,
            ..Workload::default()
        };

        let result = runner(&executor, &cloud, workload)
            .run_on(&instance("i-5", "t2.micro"))
            .await;

        assert!(result.is_success());
        assert!(cloud.bucket_exists("benchmark-i-5"));
        assert!(executor.commands()[0].starts_with("i-5: BENCH_SCRATCH_BUCKET=benchmark-i-5 "));
    }

    #[tokio::test]
    async fn test_no_scratch_bucket_by_default() {
        let executor = Arc::new(MockExecutor::new());
        let cloud = Arc::new(MockCloud::new());
        runner(&executor, &cloud, Workload::default())
            .run_on(&instance("i-6", "t2.micro"))
            .await;
        assert!(!cloud.bucket_exists("benchmark-i-6"));
    }

    #[tokio::test]
    async fn test_scratch_failure_is_not_retried() {
        let executor = Arc::new(MockExecutor::new());
        let cloud = Arc::new(MockCloud::new());
        cloud.fail_next("create_bucket", ProviderError::Unavailable("503".into()));
        let workload = Workload {
            needs_scratch: true,
            ..Workload::default()
        };

        let result = runner(&executor, &cloud, workload)
            .run_on(&instance("i-7", "t2.micro"))
            .await;
        assert_eq!(result.status, BenchmarkStatus::Failed);
        assert!(executor.commands().is_empty());
        assert_eq!(cloud.calls_starting_with("create_bucket").len(), 1);
    }
}
