//! Builder pattern for FleetController construction

use std::sync::Arc;
use std::time::Duration;

use crate::benchmark::Workload;
use crate::config::{ControllerConfig, ProfileConfig};
use crate::error::{FleetError, FleetResult};
use crate::traits::{ComputeProvider, RemoteExecutor, StorageProvider};

use super::executor::FleetController;

/// Builder for creating a FleetController with validated configuration
///
/// # Example
///
/// ```ignore
/// let controller = ControllerBuilder::new()
///     .profile("t_series", profile)
///     .compute(ec2)
///     .storage(s3)
///     .executor(ssh)
///     .concurrency(8)
///     .build()?;
///
/// let outcome = controller.run_with_signal_handling(RunMode::Run).await?;
/// ```
pub struct ControllerBuilder {
    profile_name: Option<String>,
    profile: Option<ProfileConfig>,
    config: ControllerConfig,
    compute: Option<Arc<dyn ComputeProvider>>,
    storage: Option<Arc<dyn StorageProvider>>,
    executor: Option<Arc<dyn RemoteExecutor>>,
    workload: Workload,
}

impl ControllerBuilder {
    /// Create a new builder with default tuning
    pub fn new() -> Self {
        Self {
            profile_name: None,
            profile: None,
            config: ControllerConfig::default(),
            compute: None,
            storage: None,
            executor: None,
            workload: Workload::default(),
        }
    }

    /// Set the profile and the name the run tag derives from
    pub fn profile(mut self, name: impl Into<String>, profile: ProfileConfig) -> Self {
        self.profile_name = Some(name.into());
        self.profile = Some(profile);
        self
    }

    /// Set the full controller tuning
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the worker-pool size
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the provider call rate (calls per second)
    pub fn api_rate_limit(mut self, rate: Option<f64>) -> Self {
        self.config.api_rate_limit = rate;
        self
    }

    /// Set the readiness poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Leave the fleet running after `run`
    pub fn keep_fleet(mut self, keep: bool) -> Self {
        self.config.keep_fleet = keep;
        self
    }

    /// Set the compute provider
    pub fn compute(mut self, compute: Arc<dyn ComputeProvider>) -> Self {
        self.compute = Some(compute);
        self
    }

    /// Set the storage provider
    pub fn storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set compute and storage from one provider
    pub fn cloud<C>(self, cloud: Arc<C>) -> Self
    where
        C: ComputeProvider + StorageProvider + 'static,
    {
        self.compute(Arc::clone(&cloud) as Arc<dyn ComputeProvider>)
            .storage(cloud as Arc<dyn StorageProvider>)
    }

    /// Set the remote executor
    pub fn executor(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the workload
    pub fn workload(mut self, workload: Workload) -> Self {
        self.workload = workload;
        self
    }

    /// Build the controller
    ///
    /// # Errors
    ///
    /// Returns an error if a collaborator or the profile is missing, or if
    /// the profile or tuning fails validation.
    pub fn build(self) -> FleetResult<FleetController> {
        let profile_name = self
            .profile_name
            .ok_or_else(|| FleetError::missing_config("profile"))?;
        let profile = self
            .profile
            .ok_or_else(|| FleetError::missing_config("profile"))?;
        let compute = self
            .compute
            .ok_or_else(|| FleetError::missing_config("compute"))?;
        let storage = self
            .storage
            .ok_or_else(|| FleetError::missing_config("storage"))?;
        let executor = self
            .executor
            .ok_or_else(|| FleetError::missing_config("executor"))?;

        profile
            .validate()
            .map_err(|e| FleetError::config(e.to_string()))?;
        self.config
            .validate()
            .map_err(|e| FleetError::config(e.to_string()))?;
        if self.workload.command.trim().is_empty() {
            return Err(FleetError::config("workload command is empty"));
        }

        Ok(FleetController::new(
            &profile_name,
            profile,
            self.config,
            compute,
            storage,
            executor,
            self.workload,
        ))
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
