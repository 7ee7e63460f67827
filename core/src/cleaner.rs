//! Teardown of everything a run created
//!
//! Every instance carrying the run tag is terminated, in any state, and its
//! scratch bucket is emptied and deleted. Absent resources count as success,
//! so teardown can be re-run until the report comes back clean. Termination
//! and bucket deletion are attempted independently of each other and of every
//! other instance.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, FleetResult};
use crate::instance::{InstanceRecord, InstanceState};
use crate::inventory::InstanceInventory;
use crate::retry::RetryPolicy;
use crate::tags::RunTag;
use crate::traits::{ComputeProvider, ProviderError, StorageProvider};
use crate::worker::WorkerPool;

/// Outcome of removing one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// Deleted by this teardown
    Removed,
    /// Already gone
    AlreadyAbsent,
    /// Validated only (dry run)
    Simulated,
    /// Could not be removed; needs follow-up
    Failed,
}

impl CleanupOutcome {
    /// Lowercase identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupOutcome::Removed => "removed",
            CleanupOutcome::AlreadyAbsent => "already_absent",
            CleanupOutcome::Simulated => "simulated",
            CleanupOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Bucket half of an instance's cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCleanup {
    /// Bucket name
    pub name: String,
    /// Outcome
    pub outcome: CleanupOutcome,
    /// Objects deleted before the bucket
    pub objects_deleted: usize,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cleanup of one instance and its bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCleanup {
    /// Instance id
    pub instance_id: String,
    /// Instance type
    pub instance_type: String,
    /// Termination outcome
    pub termination: CleanupOutcome,
    /// Termination failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_error: Option<String>,
    /// Bucket outcome
    pub bucket: BucketCleanup,
}

impl InstanceCleanup {
    /// Whether either half failed
    pub fn has_failure(&self) -> bool {
        self.termination == CleanupOutcome::Failed || self.bucket.outcome == CleanupOutcome::Failed
    }
}

/// Result of a teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Run that was torn down
    pub run_tag: RunTag,
    /// Provider calls were validation-only
    pub dry_run: bool,
    /// Per-instance outcomes
    pub instances: Vec<InstanceCleanup>,
    /// Instances and buckets that could not be removed
    pub orphaned: Vec<String>,
}

impl CleanupReport {
    fn new(run_tag: RunTag, dry_run: bool, instances: Vec<InstanceCleanup>) -> Self {
        let orphaned = instances
            .iter()
            .flat_map(|c| {
                let instance = (c.termination == CleanupOutcome::Failed).then(|| c.instance_id.clone());
                let bucket = (c.bucket.outcome == CleanupOutcome::Failed).then(|| c.bucket.name.clone());
                instance.into_iter().chain(bucket)
            })
            .collect();
        Self {
            run_tag,
            dry_run,
            instances,
            orphaned,
        }
    }

    /// Whether everything is accounted for
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
    }

    /// Instances terminated by this teardown
    pub fn terminated(&self) -> usize {
        self.count(|c| c.termination == CleanupOutcome::Removed)
    }

    /// Instances that were already terminated
    pub fn already_terminated(&self) -> usize {
        self.count(|c| c.termination == CleanupOutcome::AlreadyAbsent)
    }

    /// Buckets deleted by this teardown
    pub fn buckets_removed(&self) -> usize {
        self.count(|c| c.bucket.outcome == CleanupOutcome::Removed)
    }

    /// Objects deleted across all buckets
    pub fn objects_deleted(&self) -> usize {
        self.instances.iter().map(|c| c.bucket.objects_deleted).sum()
    }

    fn count(&self, pred: impl Fn(&InstanceCleanup) -> bool) -> usize {
        self.instances.iter().filter(|c| pred(c)).count()
    }
}

/// Tears down every resource of a run
pub struct FleetCleaner {
    inventory: InstanceInventory,
    worker: CleanupWorker,
    pool: WorkerPool,
}

impl FleetCleaner {
    /// Create a cleaner. The pool's cancellation is ignored: teardown always
    /// runs to completion.
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        storage: Arc<dyn StorageProvider>,
        pool: &WorkerPool,
        retry: RetryPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            inventory: InstanceInventory::new(Arc::clone(&compute)),
            worker: CleanupWorker {
                compute,
                storage,
                retry,
                dry_run,
            },
            pool: pool.uncancellable(),
        }
    }

    /// Tear down everything tagged for `run_tag`
    pub async fn teardown(&self, run_tag: &RunTag) -> FleetResult<CleanupReport> {
        self.teardown_with(run_tag, &[]).await
    }

    /// Tear down everything tagged for `run_tag` plus `extra`, instances the
    /// caller knows belong to the run but which a tag query cannot find
    pub async fn teardown_with(
        &self,
        run_tag: &RunTag,
        extra: &[InstanceRecord],
    ) -> FleetResult<CleanupReport> {
        let mut targets = self
            .worker
            .retry
            .run("list_instances", || self.inventory.list_tagged(run_tag))
            .await
            .map_err(|e| FleetError::provider("list_instances", e))?;

        let mut known: BTreeSet<String> = targets.iter().map(|r| r.id.clone()).collect();
        for record in extra {
            if known.insert(record.id.clone()) {
                targets.push(record.clone());
            }
        }

        tracing::info!(
            run_tag = %run_tag,
            instances = targets.len(),
            untagged = extra.len(),
            dry_run = self.worker.dry_run,
            "Starting teardown"
        );

        let fallback: Vec<(String, String)> = targets
            .iter()
            .map(|r| (r.id.clone(), r.instance_type.clone()))
            .collect();
        let worker = self.worker.clone();
        let results = self
            .pool
            .run_all(targets, move |record| {
                let worker = worker.clone();
                async move { worker.clean(record).await }
            })
            .await;

        let instances: Vec<InstanceCleanup> = results
            .into_iter()
            .zip(fallback)
            .map(|(result, (id, instance_type))| {
                result.unwrap_or_else(|e| {
                    tracing::error!(instance_id = %id, error = %e, "Cleanup task failed");
                    InstanceCleanup {
                        bucket: BucketCleanup {
                            name: RunTag::bucket_name(&id),
                            outcome: CleanupOutcome::Failed,
                            objects_deleted: 0,
                            error: Some(e.to_string()),
                        },
                        instance_id: id,
                        instance_type,
                        termination: CleanupOutcome::Failed,
                        termination_error: Some(e.to_string()),
                    }
                })
            })
            .collect();

        let report = CleanupReport::new(run_tag.clone(), self.worker.dry_run, instances);
        if report.is_clean() {
            tracing::info!(
                run_tag = %run_tag,
                terminated = report.terminated(),
                already_terminated = report.already_terminated(),
                buckets_removed = report.buckets_removed(),
                "Teardown complete"
            );
        } else {
            for id in &report.orphaned {
                let orphan = FleetError::ResourceOrphaned {
                    resource_id: id.clone(),
                    reason: "teardown could not remove it".to_string(),
                };
                tracing::warn!(run_tag = %run_tag, error = %orphan, "Manual cleanup required");
            }
        }
        Ok(report)
    }
}

impl std::fmt::Debug for FleetCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetCleaner")
            .field("compute", &self.worker.compute.provider_name())
            .field("storage", &self.worker.storage.provider_name())
            .field("dry_run", &self.worker.dry_run)
            .field("pool", &self.pool)
            .finish()
    }
}

#[derive(Clone)]
struct CleanupWorker {
    compute: Arc<dyn ComputeProvider>,
    storage: Arc<dyn StorageProvider>,
    retry: RetryPolicy,
    dry_run: bool,
}

impl CleanupWorker {
    async fn clean(&self, record: InstanceRecord) -> InstanceCleanup {
        // Termination is requested first; the bucket is attempted either way
        let (termination, termination_error) = self.terminate(&record).await;
        let bucket = self.delete_bucket(&RunTag::bucket_name(&record.id)).await;

        InstanceCleanup {
            instance_id: record.id,
            instance_type: record.instance_type,
            termination,
            termination_error,
            bucket,
        }
    }

    async fn terminate(&self, record: &InstanceRecord) -> (CleanupOutcome, Option<String>) {
        if record.state == InstanceState::Terminated {
            tracing::debug!(instance_id = %record.id, "Already terminated");
            return (CleanupOutcome::AlreadyAbsent, None);
        }

        let ids = [record.id.clone()];
        let result = self
            .retry
            .run("terminate_instances", || {
                self.compute.terminate_instances(&ids, self.dry_run)
            })
            .await;

        match result {
            Ok(()) if self.dry_run => (CleanupOutcome::Simulated, None),
            Ok(()) => {
                tracing::info!(instance_id = %record.id, instance_type = %record.instance_type, "Terminated");
                (CleanupOutcome::Removed, None)
            }
            Err(e) if e.is_not_found() => (CleanupOutcome::AlreadyAbsent, None),
            Err(e) => {
                tracing::warn!(instance_id = %record.id, error = %e, "Termination failed");
                (CleanupOutcome::Failed, Some(e.to_string()))
            }
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> BucketCleanup {
        let mut cleanup = BucketCleanup {
            name: bucket.to_string(),
            outcome: CleanupOutcome::Removed,
            objects_deleted: 0,
            error: None,
        };

        let keys = match self
            .retry
            .run("list_objects", || self.storage.list_objects(bucket))
            .await
        {
            Ok(keys) => keys,
            Err(e) if e.is_not_found() => {
                cleanup.outcome = CleanupOutcome::AlreadyAbsent;
                return cleanup;
            }
            Err(e) => return self.bucket_failed(cleanup, e),
        };

        if self.dry_run {
            tracing::debug!(bucket, objects = keys.len(), "Bucket would be deleted");
            cleanup.outcome = CleanupOutcome::Simulated;
            return cleanup;
        }

        // Non-empty buckets cannot be deleted
        for key in &keys {
            match self
                .retry
                .run("delete_object", || self.storage.delete_object(bucket, key))
                .await
            {
                Ok(()) => cleanup.objects_deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return self.bucket_failed(cleanup, e),
            }
        }

        match self
            .retry
            .run("delete_bucket", || self.storage.delete_bucket(bucket))
            .await
        {
            Ok(()) => {
                tracing::info!(bucket, objects = cleanup.objects_deleted, "Bucket deleted");
            }
            Err(e) if e.is_not_found() => cleanup.outcome = CleanupOutcome::AlreadyAbsent,
            Err(e) => return self.bucket_failed(cleanup, e),
        }
        cleanup
    }

    fn bucket_failed(&self, mut cleanup: BucketCleanup, e: ProviderError) -> BucketCleanup {
        tracing::warn!(bucket = %cleanup.name, error = %e, "Bucket cleanup failed");
        cleanup.outcome = CleanupOutcome::Failed;
        cleanup.error = Some(e.to_string());
        cleanup
    }
}
