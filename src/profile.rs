//! Profile file loading
//!
//! A profile file holds a `defaults` block and named `profiles`; a profile's
//! keys override the defaults. SSH settings, the workload and controller
//! tuning sit beside them and apply to every profile.
//!
//! ```yaml
//! defaults:
//!   region: us-east-1
//!   image_id: ami-0abcdef1234567890
//!   key_name: bench
//!   subnet_id: subnet-0123
//! profiles:
//!   t_series:
//!     instance_types: t2.micro,t3.micro
//!     desired_count_per_type: { t2.micro: 2, t3.micro: 1 }
//! ssh:
//!   user: ec2-user
//!   key_path: ~/.ssh/bench.pem
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_bench_core::{ControllerConfig, ProfileConfig, Workload};
use fleet_bench_providers::SshConfig;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// Keys whose value may be written as a comma-separated string
const LIST_KEYS: &[&str] = &["instance_types"];

/// Parsed profile file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfileFile {
    /// Values shared by every profile
    pub defaults: Mapping,
    /// Named profiles
    pub profiles: BTreeMap<String, Mapping>,
    /// SSH connection settings
    pub ssh: SshConfig,
    /// Workload override
    pub workload: Option<Workload>,
    /// Controller tuning
    pub controller: ControllerSettings,
}

/// Controller tuning from the profile file
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Worker-pool size
    pub concurrency: Option<usize>,
    /// Provider calls per second
    pub api_rate_limit: Option<f64>,
    /// Readiness poll interval in seconds
    pub poll_interval_secs: Option<u64>,
}

impl ControllerSettings {
    /// Overlay the file's settings onto `config`
    pub fn apply(&self, config: &mut ControllerConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(rate) = self.api_rate_limit {
            config.api_rate_limit = Some(rate);
        }
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }
    }
}

impl ProfileFile {
    /// Load a YAML file, or JSON when the extension is `.json`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile file: {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let file = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse profile file: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse profile file: {}", path.display()))?
        };

        tracing::info!(path = %path.display(), "Loaded profile file");
        Ok(file)
    }

    /// Merge `name` over the defaults and validate the result
    ///
    /// A missing profile is not an error: the defaults alone are used.
    pub fn resolve(&self, name: &str) -> Result<ProfileConfig> {
        let mut merged = self.defaults.clone();
        match self.profiles.get(name) {
            Some(profile) => {
                for (key, value) in profile {
                    merged.insert(key.clone(), value.clone());
                }
            }
            None => {
                tracing::warn!(profile = name, "Profile not found, using defaults only");
            }
        }

        for key in LIST_KEYS {
            split_list(&mut merged, key);
        }

        let profile: ProfileConfig = serde_yaml::from_value(Value::Mapping(merged))
            .with_context(|| format!("Invalid profile {name}"))?;
        profile
            .validate()
            .with_context(|| format!("Invalid profile {name}"))?;

        tracing::debug!(profile = name, resolved = ?profile, "Resolved profile");
        Ok(profile)
    }
}

/// Turn `"a, b"` into `["a", "b"]`
fn split_list(map: &mut Mapping, key: &str) {
    if let Some(Value::String(joined)) = map.get(key) {
        let items = joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        map.insert(Value::String(key.to_string()), Value::Sequence(items));
    }
}
