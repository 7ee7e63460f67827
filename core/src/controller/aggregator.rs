//! Run summary aggregation

use serde::{Deserialize, Serialize};

use crate::benchmark::{BenchmarkResult, BenchmarkStatus};
use crate::cleaner::CleanupReport;
use crate::reconciler::FleetPlan;
use crate::tags::RunTag;

/// Score statistics for one instance type, over successful results only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeScore {
    /// Instance type
    pub instance_type: String,
    /// Successful results
    pub count: usize,
    /// Mean score
    pub mean: f64,
    /// Lowest score
    pub min: f64,
    /// Highest score
    pub max: f64,
}

/// Everything a `run` produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_tag: RunTag,

    /// Reconciliation plan that was applied
    pub plan: FleetPlan,

    /// Results, ordered by profile type order then instance id
    pub results: Vec<BenchmarkResult>,

    /// Instances that never became ready
    pub timed_out: Vec<String>,

    /// Launched instances whose run tag could not be written
    pub tag_orphans: Vec<String>,

    /// Teardown report; absent with `--keep` or when teardown could not list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupReport>,

    /// Why teardown did not produce a report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,

    /// The run was cancelled
    pub cancelled: bool,

    /// Per-type statistics, in profile order
    pub type_scores: Vec<TypeScore>,
}

impl RunSummary {
    /// Results with `status`
    pub fn with_status(&self, status: BenchmarkStatus) -> impl Iterator<Item = &BenchmarkResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    /// Whether any instance failed its benchmark
    pub fn has_failures(&self) -> bool {
        self.with_status(BenchmarkStatus::Failed).next().is_some()
    }

    /// Resources that are left behind after this run
    ///
    /// With a teardown report, those it could not remove. Without one, the
    /// tag orphans, since nothing will find them by tag later.
    pub fn orphaned(&self) -> Vec<String> {
        match &self.cleanup {
            Some(report) => report.orphaned.clone(),
            None => self.tag_orphans.clone(),
        }
    }

    /// Whether the operator must treat the run as unsuccessful
    pub fn is_failure(&self) -> bool {
        self.has_failures()
            || !self.orphaned().is_empty()
            || self.cleanup_error.is_some()
            || self.cancelled
    }
}

/// Sort results by `type_order`, then instance id
pub fn order_results(results: &mut [BenchmarkResult], type_order: &[String]) {
    let rank = |t: &str| {
        type_order
            .iter()
            .position(|o| o == t)
            .unwrap_or(type_order.len())
    };
    results.sort_by(|a, b| {
        rank(&a.instance_type)
            .cmp(&rank(&b.instance_type))
            .then_with(|| a.instance_id.cmp(&b.instance_id))
    });
}

/// Per-type score statistics, in `type_order`; types without a successful
/// result are omitted
pub fn aggregate_scores(results: &[BenchmarkResult], type_order: &[String]) -> Vec<TypeScore> {
    type_order
        .iter()
        .filter_map(|instance_type| {
            let scores: Vec<f64> = results
                .iter()
                .filter(|r| r.is_success() && &r.instance_type == instance_type)
                .map(|r| r.score)
                .collect();
            if scores.is_empty() {
                return None;
            }

            let count = scores.len();
            let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Some(TypeScore {
                instance_type: instance_type.clone(),
                count,
                mean: scores.iter().sum::<f64>() / count as f64,
                min,
                max,
            })
        })
        .collect()
}
