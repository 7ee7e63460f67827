//! Terminal rendering

use std::fmt::{self, Display, Formatter};

use fleet_bench_core::{CleanupReport, FleetPlan, RunOutcome, RunSummary};

/// Render whatever a command produced
pub fn render_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Benchmark(summary) => render_summary(summary),
        RunOutcome::Cleanup(report) => render_cleanup(report),
        RunOutcome::DryRun(plan) => render_plan(plan),
    }
}

/// Render a run summary: plan, results, per-type statistics and teardown
pub fn render_summary(summary: &RunSummary) -> String {
    SummaryView(summary).to_string()
}

/// Render a teardown report
pub fn render_cleanup(report: &CleanupReport) -> String {
    CleanupView(report).to_string()
}

/// Render a reconciliation plan
pub fn render_plan(plan: &FleetPlan) -> String {
    PlanView(plan).to_string()
}

struct PlanView<'a>(&'a FleetPlan);

impl Display for PlanView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let plan = self.0;
        let mode = if plan.dry_run { " (dry run)" } else { "" };
        writeln!(f, "Plan for {}{mode}", plan.run_tag)?;
        writeln!(
            f,
            "  {:<14} {:>7} {:>7} {:>7} {:>9}",
            "TYPE", "RUNNING", "DESIRED", "LAUNCH", "TERMINATE"
        )?;
        for entry in &plan.entries {
            writeln!(
                f,
                "  {:<14} {:>7} {:>7} {:>7} {:>9}",
                entry.instance_type,
                entry.running,
                entry.desired,
                entry.to_launch,
                entry.to_terminate.len()
            )?;
            for record in &entry.to_terminate {
                writeln!(f, "    terminate {}", record.id)?;
            }
        }
        if plan.cancelled {
            writeln!(f, "  cancelled before every type was reconciled")?;
        }
        Ok(())
    }
}

struct CleanupView<'a>(&'a CleanupReport);

impl Display for CleanupView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let mode = if report.dry_run { " (dry run)" } else { "" };
        writeln!(f, "Cleanup for {}{mode}", report.run_tag)?;
        for c in &report.instances {
            write!(
                f,
                "  {:<20} {:<12} instance {:<14} bucket {}",
                c.instance_id, c.instance_type, c.termination, c.bucket.outcome
            )?;
            if c.bucket.objects_deleted > 0 {
                write!(f, " ({} objects)", c.bucket.objects_deleted)?;
            }
            writeln!(f)?;
            if let Some(e) = &c.termination_error {
                writeln!(f, "    termination error: {e}")?;
            }
            if let Some(e) = &c.bucket.error {
                writeln!(f, "    bucket error: {e}")?;
            }
        }
        writeln!(
            f,
            "  terminated {}, already gone {}, buckets removed {}, objects deleted {}",
            report.terminated(),
            report.already_terminated(),
            report.buckets_removed(),
            report.objects_deleted()
        )?;
        write_orphans(f, &report.orphaned)
    }
}

struct SummaryView<'a>(&'a RunSummary);

impl Display for SummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let summary = self.0;
        write!(f, "{}", PlanView(&summary.plan))?;

        writeln!(f, "Results")?;
        if summary.results.is_empty() {
            writeln!(f, "  none")?;
        }
        for r in &summary.results {
            write!(
                f,
                "  {:<20} {:<12} {:<11} {:>12.1} {:>8}ms",
                r.instance_id, r.instance_type, r.status, r.score, r.duration_ms
            )?;
            match &r.detail {
                Some(detail) => writeln!(f, "  {detail}")?,
                None => writeln!(f)?,
            }
        }

        if !summary.type_scores.is_empty() {
            writeln!(f, "Scores by type")?;
            for s in &summary.type_scores {
                writeln!(
                    f,
                    "  {:<14} n={:<3} mean={:.1} min={:.1} max={:.1}",
                    s.instance_type, s.count, s.mean, s.min, s.max
                )?;
            }
        }

        if !summary.timed_out.is_empty() {
            writeln!(f, "Never ready: {}", summary.timed_out.join(", "))?;
        }

        match (&summary.cleanup, &summary.cleanup_error) {
            (Some(report), _) => write!(f, "{}", CleanupView(report))?,
            (None, Some(e)) => {
                writeln!(f, "Teardown failed: {e}")?;
                write_orphans(f, &summary.orphaned())?;
            }
            (None, None) => {
                writeln!(f, "Fleet kept running")?;
                write_orphans(f, &summary.orphaned())?;
            }
        }

        if summary.cancelled {
            writeln!(f, "Run was cancelled")?;
        }
        Ok(())
    }
}

fn write_orphans(f: &mut Formatter<'_>, orphaned: &[String]) -> fmt::Result {
    if orphaned.is_empty() {
        return Ok(());
    }
    writeln!(f, "ORPHANED (remove manually): {}", orphaned.join(", "))
}
