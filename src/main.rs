//! fleet-bench - Provision a tagged cloud fleet, benchmark every instance, tear it all down

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fleet_bench_core::{ControllerBuilder, ControllerConfig, RunMode, RunOutcome};
use fleet_bench_providers::{load_sdk_config, Ec2Compute, S3Storage, SshExecutor};
use fleet_bench_report::{render_outcome, write_json};
use tracing_subscriber::EnvFilter;

mod cli;
mod profile;

use cli::{Cli, Commands};
use profile::ProfileFile;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` raises this workspace's crates from info
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,fleet_bench={level},fleet_bench_core={level},fleet_bench_providers={level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let file = ProfileFile::load(&cli.config)?;
    let mut profile = file.resolve(&cli.profile)?;
    if let Some(retry) = cli.retry {
        profile.retry_limit = retry;
    }
    if cli.dryrun {
        profile.dry_run = true;
    }

    let mode = match &cli.command {
        Commands::Validate => {
            profile
                .validate()
                .with_context(|| format!("Invalid profile {}", cli.profile))?;
            println!(
                "Profile {} is valid: {} instance(s) across {} type(s) in {}",
                cli.profile,
                profile.total_desired(),
                profile.instance_types.len(),
                profile.region
            );
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Run { .. } => RunMode::Run,
        Commands::Clean { .. } => RunMode::Clean,
        Commands::Dryrun => RunMode::DryRun,
    };

    let mut config = ControllerConfig::default();
    file.controller.apply(&mut config);
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    config.keep_fleet = matches!(cli.command, Commands::Run { keep: true, .. });

    let sdk_config = load_sdk_config(&profile.region).await;
    let mut builder = ControllerBuilder::new()
        .profile(cli.profile.clone(), profile)
        .config(config)
        .compute(Arc::new(Ec2Compute::new(&sdk_config)))
        .storage(Arc::new(S3Storage::new(&sdk_config)))
        .executor(Arc::new(SshExecutor::new(file.ssh.clone())));
    if let Some(workload) = file.workload.clone() {
        builder = builder.workload(workload);
    }
    let controller = builder.build()?;

    let outcome = controller.run_with_signal_handling(mode).await?;
    println!("{}", render_outcome(&outcome));

    if let Some(path) = cli.command.json_path() {
        match &outcome {
            RunOutcome::Benchmark(summary) => write_json(path, summary)?,
            RunOutcome::Cleanup(report) => write_json(path, report)?,
            RunOutcome::DryRun(plan) => write_json(path, plan)?,
        }
        tracing::info!(path = %path.display(), "Wrote JSON report");
    }

    Ok(if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
