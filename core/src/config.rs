//! Profile and controller configuration types

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resolved benchmark profile
///
/// The controller receives this fully resolved; reading it from a file is
/// the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Provider region
    pub region: String,

    /// Machine image
    pub image_id: String,

    /// SSH key pair name
    pub key_name: String,

    /// Subnet to launch into
    pub subnet_id: String,

    /// Instance types, in reconciliation order
    pub instance_types: Vec<String>,

    /// Desired count per instance type; absent types default to 0
    #[serde(default)]
    pub desired_count_per_type: BTreeMap<String, usize>,

    /// Retry budget for provider calls, tag writes and readiness polls
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Validate against the provider without materializing resources
    #[serde(default)]
    pub dry_run: bool,
}

fn default_retry_limit() -> u32 {
    3
}

impl ProfileConfig {
    /// Desired count for `instance_type`, 0 when unset
    pub fn desired_count(&self, instance_type: &str) -> usize {
        self.desired_count_per_type
            .get(instance_type)
            .copied()
            .unwrap_or(0)
    }

    /// Total desired instances across all types
    pub fn total_desired(&self) -> usize {
        self.instance_types
            .iter()
            .map(|t| self.desired_count(t))
            .sum()
    }

    /// Set the desired count for a type
    pub fn with_desired(mut self, instance_type: impl Into<String>, count: usize) -> Self {
        let instance_type = instance_type.into();
        if !self.instance_types.contains(&instance_type) {
            self.instance_types.push(instance_type.clone());
        }
        self.desired_count_per_type.insert(instance_type, count);
        self
    }

    /// Validate the profile
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::MissingField("region"));
        }
        if self.image_id.trim().is_empty() {
            return Err(ConfigError::MissingField("image_id"));
        }
        if self.instance_types.is_empty() {
            return Err(ConfigError::MissingField("instance_types"));
        }

        let mut seen = BTreeSet::new();
        for instance_type in &self.instance_types {
            if instance_type.trim().is_empty() {
                return Err(ConfigError::InvalidInstanceType(instance_type.clone()));
            }
            if !seen.insert(instance_type.as_str()) {
                return Err(ConfigError::DuplicateInstanceType(instance_type.clone()));
            }
        }

        if let Some(unknown) = self
            .desired_count_per_type
            .keys()
            .find(|t| !seen.contains(t.as_str()))
        {
            return Err(ConfigError::UnlistedInstanceType(unknown.clone()));
        }

        if self.retry_limit == 0 {
            return Err(ConfigError::InvalidRetryLimit(
                "retry limit must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Profile validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required field is empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Blank instance type
    #[error("invalid instance type: {0:?}")]
    InvalidInstanceType(String),

    /// Instance type listed twice
    #[error("duplicate instance type: {0}")]
    DuplicateInstanceType(String),

    /// Count given for a type not in `instance_types`
    #[error("desired count given for unlisted instance type: {0}")]
    UnlistedInstanceType(String),

    /// Retry budget out of range
    #[error("invalid retry limit: {0}")]
    InvalidRetryLimit(String),

    /// Controller tuning out of range
    #[error("invalid controller setting: {0}")]
    InvalidSetting(String),
}

/// Operator-selected mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Reconcile, benchmark, tear down
    Run,
    /// Tear down everything tagged for the run
    Clean,
    /// Reconcile in validation-only mode
    DryRun,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Run => "run",
            RunMode::Clean => "clean",
            RunMode::DryRun => "dryrun",
        })
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "run" => Ok(RunMode::Run),
            "clean" => Ok(RunMode::Clean),
            "dryrun" | "dry-run" | "dry_run" => Ok(RunMode::DryRun),
            _ => Err(format!("Unknown mode: {}", s)),
        }
    }
}

/// Controller tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Worker-pool size for per-instance work
    pub concurrency: usize,

    /// Provider calls per second across the pool; `None` disables pacing
    pub api_rate_limit: Option<f64>,

    /// Fixed interval between readiness polls
    pub poll_interval: Duration,

    /// First retry delay for transient provider errors
    pub retry_base_delay: Duration,

    /// Retry delay ceiling
    pub retry_max_delay: Duration,

    /// Validate permissions with a dry-run pass before creating anything
    pub preflight: bool,

    /// Leave the fleet running after `run`
    pub keep_fleet: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            api_rate_limit: Some(10.0),
            poll_interval: Duration::from_secs(10),
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            preflight: true,
            keep_fleet: false,
        }
    }
}

impl ControllerConfig {
    /// Validate the tuning
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidSetting(
                "concurrency must be at least 1".into(),
            ));
        }
        if let Some(rps) = self.api_rate_limit {
            if rps <= 0.0 {
                return Err(ConfigError::InvalidSetting(
                    "api rate limit must be positive".into(),
                ));
            }
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(ConfigError::InvalidSetting(
                "retry base delay exceeds max delay".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_profile() -> ProfileConfig {
    ProfileConfig {
        region: "us-east-1".into(),
        image_id: "ami-12345678".into(),
        key_name: "bench-key".into(),
        subnet_id: "subnet-1".into(),
        instance_types: Vec::new(),
        desired_count_per_type: BTreeMap::new(),
        retry_limit: 3,
        dry_run: false,
    }
}
