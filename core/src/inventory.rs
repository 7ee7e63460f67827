//! Read-only view of the instances belonging to a run

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::instance::{InstanceFilter, InstanceRecord, InstanceState};
use crate::tags::{matches_run, RunTag, TagKey};
use crate::traits::{ComputeProvider, ProviderError};

/// Queries the compute provider for run-tagged instances.
///
/// Results are deduplicated by id and sorted oldest-first, so callers see a
/// stable order regardless of how the provider pages its response. The
/// inventory never retries: errors come back as the raw [`ProviderError`] so
/// a caller's retry policy can classify them.
#[derive(Clone)]
pub struct InstanceInventory {
    compute: Arc<dyn ComputeProvider>,
}

impl InstanceInventory {
    /// Create an inventory over `compute`
    pub fn new(compute: Arc<dyn ComputeProvider>) -> Self {
        Self { compute }
    }

    /// Running instances of the run, optionally restricted to `instance_types`
    pub async fn list_running(
        &self,
        run_tag: &RunTag,
        instance_types: Option<&[String]>,
    ) -> Result<Vec<InstanceRecord>, ProviderError> {
        let records = self.query(run_tag, &[InstanceState::Running]).await?;

        Ok(match instance_types {
            Some(types) => records
                .into_iter()
                .filter(|r| types.iter().any(|t| t == &r.instance_type))
                .collect(),
            None => records,
        })
    }

    /// Every instance of the run in any state, terminated ones included
    pub async fn list_tagged(&self, run_tag: &RunTag) -> Result<Vec<InstanceRecord>, ProviderError> {
        self.query(run_tag, &InstanceState::ALL).await
    }

    async fn query(
        &self,
        run_tag: &RunTag,
        states: &[InstanceState],
    ) -> Result<Vec<InstanceRecord>, ProviderError> {
        let filter = InstanceFilter::tagged(TagKey::Environment.as_str(), run_tag.as_str())
            .with_states(states);
        let raw = self.compute.list_instances(&filter).await?;
        let total = raw.len();

        let mut seen = BTreeSet::new();
        let mut records: Vec<InstanceRecord> = raw
            .into_iter()
            .filter(|r| matches_run(r, run_tag) && states.contains(&r.state))
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        records.sort_by(|a, b| a.age_key().cmp(&b.age_key()));

        tracing::debug!(
            run_tag = %run_tag,
            returned = total,
            kept = records.len(),
            "Listed run instances"
        );
        Ok(records)
    }
}

impl std::fmt::Debug for InstanceInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceInventory")
            .field("provider", &self.compute.provider_name())
            .finish()
    }
}
