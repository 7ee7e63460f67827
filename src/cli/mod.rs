//! CLI argument parsing

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "fleet-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Profile file (YAML, or JSON by extension)
    #[arg(long, global = true, env = "FLEET_BENCH_CONFIG", default_value = "ec2_benchmark.yaml")]
    pub config: PathBuf,

    /// Benchmark profile; also names the run tag
    #[arg(long, global = true, env = "FLEET_BENCH_PROFILE", default_value = "t_series")]
    pub profile: String,

    /// Retry budget for provider calls, tag writes and readiness polls
    #[arg(long, global = true, value_name = "NUM")]
    pub retry: Option<u32>,

    /// Validate against the provider without creating or deleting anything
    #[arg(long, global = true)]
    pub dryrun: bool,

    /// Parallel per-instance operations
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Reconcile the fleet, benchmark every instance, then tear down
    Run {
        /// Leave the fleet running for a later run
        #[arg(long)]
        keep: bool,

        /// Also write the run summary as JSON
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,
    },
    /// Tear down every instance and bucket tagged for the profile
    Clean {
        /// Also write the cleanup report as JSON
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,
    },
    /// Reconcile in validation-only mode and print the plan
    Dryrun,
    /// Load and validate the profile without contacting the provider
    Validate,
}

impl Commands {
    /// JSON export path, if requested
    pub fn json_path(&self) -> Option<&PathBuf> {
        match self {
            Commands::Run { json, .. } | Commands::Clean { json } => json.as_ref(),
            Commands::Dryrun | Commands::Validate => None,
        }
    }
}
