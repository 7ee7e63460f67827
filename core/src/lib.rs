//! fleet-bench-core: fleet reconciliation and lifecycle controller
//!
//! This crate provides everything between a resolved benchmark profile and
//! the provider capabilities, including:
//!
//! - Run tags and the instance/plan data model
//! - Capability traits (ComputeProvider, StorageProvider, RemoteExecutor)
//! - Reconciliation, readiness waits, benchmark runs and teardown
//! - The bounded worker pool, retry policy and cancellation signal
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod benchmark;
pub mod cleaner;
pub mod config;
pub mod controller;
pub mod error;
pub mod instance;
pub mod inventory;
pub mod readiness;
pub mod reconciler;
pub mod retry;
pub mod shutdown;
pub mod tags;
pub mod traits;
pub mod worker;

#[cfg(test)]
mod testing;

pub use benchmark::{parse_score, BenchmarkResult, BenchmarkRunner, BenchmarkStatus, Workload};
pub use cleaner::{BucketCleanup, CleanupOutcome, CleanupReport, FleetCleaner, InstanceCleanup};
pub use config::{ConfigError, ControllerConfig, ProfileConfig, RunMode};
pub use controller::{ControllerBuilder, FleetController, RunOutcome, RunSummary, TypeScore};
pub use error::*;
pub use instance::{BootVolume, InstanceFilter, InstanceRecord, InstanceState, LaunchSpec};
pub use inventory::InstanceInventory;
pub use readiness::{ReadinessOutcome, ReadinessWaiter};
pub use reconciler::{FleetPlan, FleetReconciler, TypePlan};
pub use retry::RetryPolicy;
pub use shutdown::{Shutdown, ShutdownListener};
pub use tags::{derive_run_tag, matches_run, RunTag, RunTags, Tag, TagKey};
pub use traits::*;
pub use worker::{ApiRateLimiter, WorkerPool};

#[cfg(test)]
mod integration_tests {
    use super::*;

    // =========================================================================
    // JSON export format
    // =========================================================================

    #[test]
    fn test_benchmark_result_json_format() {
        let result = BenchmarkResult {
            instance_id: "i-0abc".into(),
            instance_type: "t2.micro".into(),
            score: 52631.6,
            status: BenchmarkStatus::Success,
            detail: None,
            duration_ms: 4200,
        };
        let json = serde_json::to_string(&result).unwrap();

        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("\"score\":52631.6"));
        assert!(!json.contains("detail"));
    }

    #[test]
    fn test_plan_json_format() {
        let mut plan = FleetPlan::new(derive_run_tag("t_series"), true);
        plan.entries.push(TypePlan::compute(
            "t2.micro",
            1,
            vec![
                InstanceRecord::new("i-1", "t2.micro", InstanceState::Running),
                InstanceRecord::new("i-2", "t2.micro", InstanceState::Running),
            ],
        ));
        let json = serde_json::to_value(&plan).unwrap();

        assert_eq!(json["run_tag"], "benchmark-t_series");
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["entries"][0]["to_terminate"][0]["id"], "i-1");
        assert_eq!(json["entries"][0]["to_terminate"][0]["state"], "running");
    }

    #[test]
    fn test_summary_roundtrip_keeps_cleanup_optional() {
        let summary = RunSummary {
            run_tag: derive_run_tag("t_series"),
            plan: FleetPlan::new(derive_run_tag("t_series"), false),
            results: Vec::new(),
            timed_out: vec!["i-9".into()],
            tag_orphans: Vec::new(),
            cleanup: None,
            cleanup_error: None,
            cancelled: false,
            type_scores: Vec::new(),
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("cleanup"));

        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_outcome_enums_snake_case() {
        assert_eq!(
            serde_json::to_string(&CleanupOutcome::AlreadyAbsent).unwrap(),
            "\"already_absent\""
        );
        assert_eq!(
            serde_json::to_string(&BenchmarkStatus::Unreachable).unwrap(),
            "\"unreachable\""
        );
        assert_eq!(serde_json::to_string(&RunMode::DryRun).unwrap(), "\"dryrun\"");
    }
}
