//! Reconciliation plan types

use serde::{Deserialize, Serialize};

use crate::instance::InstanceRecord;
use crate::tags::RunTag;

/// Desired-versus-actual outcome for one instance type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypePlan {
    /// Instance type
    pub instance_type: String,

    /// Running instances observed before acting
    pub running: usize,

    /// Desired count from the profile
    pub desired: usize,

    /// Instances requested from the provider
    pub to_launch: usize,

    /// Excess running instances, oldest first, marked for termination
    pub to_terminate: Vec<InstanceRecord>,

    /// Running instances that stay in the fleet
    pub kept: Vec<InstanceRecord>,

    /// Instances created by this pass
    #[serde(default)]
    pub launched: Vec<InstanceRecord>,

    /// Ids of launched instances whose run tag could not be written
    #[serde(default)]
    pub orphaned: Vec<String>,
}

impl TypePlan {
    /// Compute the delta for one type.
    ///
    /// `running` is sorted oldest-first here, so the instances marked for
    /// termination do not depend on provider listing order.
    pub fn compute(
        instance_type: impl Into<String>,
        desired: usize,
        mut running: Vec<InstanceRecord>,
    ) -> Self {
        running.sort_by(|a, b| a.age_key().cmp(&b.age_key()));
        let observed = running.len();
        let excess = observed.saturating_sub(desired);
        let kept = running.split_off(excess);

        Self {
            instance_type: instance_type.into(),
            running: observed,
            desired,
            to_launch: desired.saturating_sub(observed),
            to_terminate: running,
            kept,
            launched: Vec::new(),
            orphaned: Vec::new(),
        }
    }

    /// Whether this type needs no provider action
    pub fn is_balanced(&self) -> bool {
        self.to_launch == 0 && self.to_terminate.is_empty()
    }
}

/// Reconciliation result for a whole profile
///
/// Transient: recomputed on every pass, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetPlan {
    /// Run the plan belongs to
    pub run_tag: RunTag,

    /// Per-type entries, in profile order
    pub entries: Vec<TypePlan>,

    /// Provider calls were validation-only
    pub dry_run: bool,

    /// Cancellation stopped the pass before every type was handled
    pub cancelled: bool,
}

impl FleetPlan {
    /// Empty plan for `run_tag`
    pub fn new(run_tag: RunTag, dry_run: bool) -> Self {
        Self {
            run_tag,
            entries: Vec::new(),
            dry_run,
            cancelled: false,
        }
    }

    /// Entry for `instance_type`
    pub fn entry(&self, instance_type: &str) -> Option<&TypePlan> {
        self.entries
            .iter()
            .find(|e| e.instance_type == instance_type)
    }

    /// Instances requested across all types
    pub fn total_to_launch(&self) -> usize {
        self.entries.iter().map(|e| e.to_launch).sum()
    }

    /// Instances marked for termination across all types
    pub fn total_to_terminate(&self) -> usize {
        self.entries.iter().map(|e| e.to_terminate.len()).sum()
    }

    /// Ids marked for termination, in plan order
    pub fn termination_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|e| e.to_terminate.iter().map(|r| r.id.clone()))
            .collect()
    }

    /// Kept and newly launched instances, in plan order
    pub fn fleet(&self) -> Vec<InstanceRecord> {
        self.entries
            .iter()
            .flat_map(|e| e.kept.iter().chain(e.launched.iter()).cloned())
            .collect()
    }

    /// Launched instances whose tag write failed
    pub fn orphaned_records(&self) -> Vec<InstanceRecord> {
        self.entries
            .iter()
            .flat_map(|e| {
                e.launched
                    .iter()
                    .filter(|r| e.orphaned.contains(&r.id))
                    .cloned()
            })
            .collect()
    }

    /// Orphaned ids across all types
    pub fn orphaned(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|e| e.orphaned.iter().cloned())
            .collect()
    }
}
