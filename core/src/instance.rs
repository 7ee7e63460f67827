//! Instance records and launch specifications

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tags::Tag;

/// Lifecycle state of an instance as last reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Requested, not yet running
    Pending,
    /// Running
    Running,
    /// Running according to the provider but failing health checks, or
    /// stopping/stopped
    Unreachable,
    /// Shutting down or gone
    Terminated,
}

impl InstanceState {
    /// Every state, including terminated instances still visible to the provider
    pub const ALL: [InstanceState; 4] = [
        InstanceState::Pending,
        InstanceState::Running,
        InstanceState::Unreachable,
        InstanceState::Terminated,
    ];

    /// Lowercase identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Unreachable => "unreachable",
            InstanceState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Local, non-authoritative view of a provider instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Provider instance id
    pub id: String,
    /// Instance type, e.g. `t2.micro`
    pub instance_type: String,
    /// Last observed state
    pub state: InstanceState,
    /// Provider tags (key -> value)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Launch timestamp, used for oldest-first ordering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,
    /// Address used for remote execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
}

impl InstanceRecord {
    /// Create a record with no tags, launch time or address
    pub fn new(id: impl Into<String>, instance_type: impl Into<String>, state: InstanceState) -> Self {
        Self {
            id: id.into(),
            instance_type: instance_type.into(),
            state,
            tags: BTreeMap::new(),
            launched_at: None,
            public_address: None,
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the launch time
    pub fn with_launched_at(mut self, at: DateTime<Utc>) -> Self {
        self.launched_at = Some(at);
        self
    }

    /// Set the public address
    pub fn with_public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    /// Whether the tag set contains exactly `(key, value)`
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).map(|v| v == value).unwrap_or(false)
    }

    /// Oldest-first ordering key. Records without a launch time sort last,
    /// ties break on id.
    pub fn age_key(&self) -> (bool, Option<DateTime<Utc>>, &str) {
        (self.launched_at.is_none(), self.launched_at, self.id.as_str())
    }
}

/// Filter passed to `ComputeProvider::list_instances`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    /// Restrict to these instance ids
    pub ids: Vec<String>,
    /// Tag `(key, value)` pairs that must all be present
    pub tags: Vec<(String, String)>,
    /// Accepted states; empty means any state
    pub states: Vec<InstanceState>,
}

impl InstanceFilter {
    /// Match instances carrying `(key, value)`
    pub fn tagged(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tags: vec![(key.into(), value.into())],
            ..Default::default()
        }
    }

    /// Match instances by id
    pub fn by_ids(ids: Vec<String>) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }

    /// Restrict states
    pub fn with_states(mut self, states: &[InstanceState]) -> Self {
        self.states = states.to_vec();
        self
    }

    /// Client-side evaluation of the filter
    pub fn matches(&self, record: &InstanceRecord) -> bool {
        (self.ids.is_empty() || self.ids.iter().any(|id| id == &record.id))
            && self.tags.iter().all(|(k, v)| record.has_tag(k, v))
            && (self.states.is_empty() || self.states.contains(&record.state))
    }
}

/// Boot volume attached to every launched instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootVolume {
    /// Root device name
    pub device_name: String,
    /// Size in GiB
    pub size_gib: i32,
    /// Delete the volume with the instance
    pub delete_on_termination: bool,
    /// Volume type, e.g. `gp3`
    pub volume_type: String,
}

impl Default for BootVolume {
    fn default() -> Self {
        Self {
            device_name: "/dev/xvda".to_string(),
            size_gib: 8,
            delete_on_termination: true,
            volume_type: "gp3".to_string(),
        }
    }
}

/// Everything a provider needs to launch one batch of a single instance type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Machine image
    pub image_id: String,
    /// Instance type
    pub instance_type: String,
    /// SSH key pair name
    pub key_name: String,
    /// Subnet to launch into
    pub subnet_id: String,
    /// Boot volume policy
    pub boot_volume: BootVolume,
    /// Tags applied at creation
    pub tags: Vec<Tag>,
    /// Idempotency token; a retried create with the same token does not
    /// launch twice
    pub client_token: String,
}
