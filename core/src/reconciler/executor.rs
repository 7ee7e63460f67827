//! Reconciliation against the provider

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::ProfileConfig;
use crate::error::{FleetError, FleetResult};
use crate::instance::{BootVolume, InstanceRecord, LaunchSpec};
use crate::inventory::InstanceInventory;
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownListener;
use crate::tags::{matches_run, RunTag, RunTags, Tag};
use crate::traits::{ComputeProvider, ProviderError};
use crate::worker::ApiRateLimiter;

use super::plan::{FleetPlan, TypePlan};

/// Provider limit on client token length
pub(super) const MAX_CLIENT_TOKEN_LEN: usize = 64;

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Computes and applies the desired-versus-actual delta per instance type
///
/// Types are handled sequentially in profile order. Shortfalls are launched
/// in a single create call per type, tagged at creation; excess instances are
/// only marked, and [`terminate_excess`](Self::terminate_excess) applies them.
pub struct FleetReconciler {
    compute: Arc<dyn ComputeProvider>,
    inventory: InstanceInventory,
    retry: RetryPolicy,
    rate_limiter: Arc<ApiRateLimiter>,
    boot_volume: BootVolume,
    shutdown: Option<ShutdownListener>,
}

impl FleetReconciler {
    /// Create a reconciler
    pub fn new(compute: Arc<dyn ComputeProvider>, retry: RetryPolicy) -> Self {
        Self {
            inventory: InstanceInventory::new(Arc::clone(&compute)),
            compute,
            retry,
            rate_limiter: Arc::new(ApiRateLimiter::unlimited()),
            boot_volume: BootVolume::default(),
            shutdown: None,
        }
    }

    /// Pace provider calls with a shared limiter
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<ApiRateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Stop issuing launches once `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: ShutdownListener) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|s| s.is_triggered())
    }

    /// Reconcile every instance type of `profile`.
    ///
    /// With `profile.dry_run` set, provider calls are validation-only and the
    /// returned plan holds no launched instances. Cancellation is checked
    /// before each type; a cancelled plan covers only the types handled so far.
    pub async fn reconcile(&self, profile: &ProfileConfig, run_tag: &RunTag) -> FleetResult<FleetPlan> {
        let mut plan = FleetPlan::new(run_tag.clone(), profile.dry_run);
        self.reconcile_into(profile, &mut plan).await?;
        Ok(plan)
    }

    /// Reconcile into a caller-owned plan.
    ///
    /// Entries are pushed as each type completes, so on error `plan` still
    /// holds the types launched before the failure, orphans included.
    pub async fn reconcile_into(&self, profile: &ProfileConfig, plan: &mut FleetPlan) -> FleetResult<()> {
        let run_tag = &plan.run_tag.clone();

        for instance_type in &profile.instance_types {
            if self.cancelled() {
                tracing::warn!(
                    run_tag = %run_tag,
                    instance_type = %instance_type,
                    "Cancellation observed, no further launches"
                );
                plan.cancelled = true;
                break;
            }

            let running = self.running_of_type(run_tag, instance_type).await?;
            let mut entry = TypePlan::compute(
                instance_type.as_str(),
                profile.desired_count(instance_type),
                running,
            );

            tracing::info!(
                run_tag = %run_tag,
                instance_type = %instance_type,
                running = entry.running,
                desired = entry.desired,
                to_launch = entry.to_launch,
                to_terminate = entry.to_terminate.len(),
                dry_run = profile.dry_run,
                "Reconciled instance type"
            );

            if entry.to_launch > 0 {
                let (launched, orphaned) = self
                    .launch(profile, run_tag, instance_type, entry.to_launch)
                    .await?;
                entry.launched = launched;
                entry.orphaned = orphaned;
            }

            plan.entries.push(entry);
        }

        Ok(())
    }

    /// Terminate the excess instances marked in `plan`, returning their ids
    pub async fn terminate_excess(&self, plan: &FleetPlan) -> FleetResult<Vec<String>> {
        let ids = plan.termination_ids();
        if ids.is_empty() {
            return Ok(ids);
        }

        tracing::info!(
            run_tag = %plan.run_tag,
            count = ids.len(),
            dry_run = plan.dry_run,
            "Terminating excess instances"
        );

        self.rate_limiter.wait().await;
        let batch = self
            .retry
            .run("terminate_instances", || {
                self.compute.terminate_instances(&ids, plan.dry_run)
            })
            .await;

        match batch {
            Ok(()) => Ok(ids),
            // One stale id fails the whole batch; retry each on its own
            Err(ProviderError::NotFound(missing)) => {
                tracing::debug!(missing = %missing, "Batch termination hit a missing id");
                let mut terminated = Vec::with_capacity(ids.len());
                for id in &ids {
                    let single = [id.clone()];
                    match self
                        .retry
                        .run("terminate_instances", || {
                            self.compute.terminate_instances(&single, plan.dry_run)
                        })
                        .await
                    {
                        Ok(()) => terminated.push(id.clone()),
                        Err(e) if e.is_not_found() => {
                            tracing::debug!(instance_id = %id, "Excess instance already gone")
                        }
                        Err(e) => return Err(FleetError::provider("terminate_instances", e)),
                    }
                }
                Ok(terminated)
            }
            Err(e) => Err(FleetError::provider("terminate_instances", e)),
        }
    }

    async fn running_of_type(
        &self,
        run_tag: &RunTag,
        instance_type: &str,
    ) -> FleetResult<Vec<InstanceRecord>> {
        let only = [instance_type.to_string()];
        self.rate_limiter.wait().await;
        self.retry
            .run("list_instances", || {
                self.inventory.list_running(run_tag, Some(&only))
            })
            .await
            .map_err(|e| FleetError::provider("list_instances", e))
    }

    async fn launch(
        &self,
        profile: &ProfileConfig,
        run_tag: &RunTag,
        instance_type: &str,
        count: usize,
    ) -> FleetResult<(Vec<InstanceRecord>, Vec<String>)> {
        let tags = RunTags::new(run_tag, Some(instance_type))
            .map_err(|e| FleetError::config(e.to_string()))?
            .to_vec();

        let spec = LaunchSpec {
            image_id: profile.image_id.clone(),
            instance_type: instance_type.to_string(),
            key_name: profile.key_name.clone(),
            subnet_id: profile.subnet_id.clone(),
            boot_volume: self.boot_volume.clone(),
            tags: tags.clone(),
            client_token: client_token(run_tag, instance_type),
        };

        self.rate_limiter.wait().await;
        let mut created = self
            .retry
            .run("create_instances", || {
                self.compute.create_instances(&spec, count, profile.dry_run)
            })
            .await
            .map_err(|e| FleetError::provider("create_instances", e))?;

        if profile.dry_run {
            tracing::info!(
                instance_type = %instance_type,
                count,
                "Launch validated (dry run)"
            );
            return Ok((Vec::new(), Vec::new()));
        }

        if created.len() != count {
            tracing::warn!(
                instance_type = %instance_type,
                requested = count,
                created = created.len(),
                "Provider created a different number of instances"
            );
        }
        tracing::info!(
            instance_type = %instance_type,
            count = created.len(),
            client_token = %spec.client_token,
            "Launched instances"
        );

        let untagged: Vec<String> = created
            .iter()
            .filter(|r| !matches_run(r, run_tag))
            .map(|r| r.id.clone())
            .collect();
        if untagged.is_empty() {
            return Ok((created, Vec::new()));
        }

        tracing::warn!(
            instance_type = %instance_type,
            count = untagged.len(),
            "Launched instances are missing the run tag, re-tagging"
        );
        let orphaned = match self.retag(&untagged, &tags, profile.retry_limit).await {
            Ok(()) => {
                for record in created.iter_mut().filter(|r| untagged.contains(&r.id)) {
                    for tag in &tags {
                        record
                            .tags
                            .insert(tag.key().as_str().to_string(), tag.value().to_string());
                    }
                }
                Vec::new()
            }
            Err(e) => {
                for id in &untagged {
                    let orphan = FleetError::ResourceOrphaned {
                        resource_id: id.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(
                        instance_id = %id,
                        run_tag = %run_tag,
                        error = %orphan,
                        "Instance needs manual cleanup if teardown cannot reach it"
                    );
                }
                untagged
            }
        };

        Ok((created, orphaned))
    }

    /// Write the run tags onto `ids`, up to `attempts` times
    async fn retag(&self, ids: &[String], tags: &[Tag], attempts: u32) -> Result<(), ProviderError> {
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.wait().await;
            match self.compute.tag_resources(ids, tags, false).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Tag write failed"
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Idempotency token for one launch batch.
///
/// Fixed for the retries of a single create call; a later reconciliation
/// pass gets a new token since it computes a new delta. The readable prefix
/// is cut to fit the provider limit, the `-<millis>-<seq>` suffix never is.
pub(super) fn client_token(run_tag: &RunTag, instance_type: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix = format!("-{millis}-{seq}");
    let room = MAX_CLIENT_TOKEN_LEN.saturating_sub(suffix.len());

    let mut token: String = format!("{run_tag}-{instance_type}").chars().take(room).collect();
    token.push_str(&suffix);
    token
}

impl std::fmt::Debug for FleetReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetReconciler")
            .field("provider", &self.compute.provider_name())
            .field("retry", &self.retry)
            .field("boot_volume", &self.boot_volume)
            .finish()
    }
}
