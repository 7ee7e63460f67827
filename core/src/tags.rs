//! Run tags: deterministic correlation of every resource created by one run
//!
//! A run is identified by its profile name. The derived [`RunTag`] is written
//! to the `environment` tag of each instance and prefixes each per-instance
//! storage bucket, so two runs with different profiles never collide while two
//! runs of the same profile reconcile against each other.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instance::InstanceRecord;

/// Prefix shared by run tags and bucket names
pub const RUN_TAG_PREFIX: &str = "benchmark-";

/// Provider limit on tag value length
pub const MAX_TAG_VALUE_LEN: usize = 256;

/// Tag validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    /// Unknown tag key
    #[error("unknown tag key: {0}")]
    UnknownKey(String),

    /// Empty tag value
    #[error("empty value for tag {0}")]
    EmptyValue(&'static str),

    /// Value exceeds provider limit
    #[error("value for tag {key} is {len} chars, limit is {MAX_TAG_VALUE_LEN}")]
    ValueTooLong {
        /// Tag key
        key: &'static str,
        /// Actual length
        len: usize,
    },
}

/// Identifier shared by all resources of one run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTag(String);

impl RunTag {
    /// Derive the run tag for a profile. Pure; an empty profile name yields
    /// the degenerate tag `"benchmark-"`.
    pub fn derive(profile_name: &str) -> Self {
        RunTag(format!("{RUN_TAG_PREFIX}{profile_name}"))
    }

    /// Tag value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the scratch bucket owned by `instance_id`
    pub fn bucket_name(instance_id: &str) -> String {
        format!("{RUN_TAG_PREFIX}{instance_id}")
    }
}

impl fmt::Display for RunTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the run tag for `profile_name`
pub fn derive_run_tag(profile_name: &str) -> RunTag {
    RunTag::derive(profile_name)
}

/// Whether `instance` belongs to the run identified by `run_tag`
pub fn matches_run(instance: &InstanceRecord, run_tag: &RunTag) -> bool {
    instance.has_tag(TagKey::Environment.as_str(), run_tag.as_str())
}

/// Tag keys the controller writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagKey {
    /// Run correlation tag
    #[serde(rename = "environment")]
    Environment,
    /// Instance type, informational
    #[serde(rename = "instanceType")]
    InstanceType,
}

impl TagKey {
    /// Provider-side key string
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKey::Environment => "environment",
            TagKey::InstanceType => "instanceType",
        }
    }
}

impl FromStr for TagKey {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "environment" => Ok(TagKey::Environment),
            "instanceType" => Ok(TagKey::InstanceType),
            other => Err(TagError::UnknownKey(other.to_string())),
        }
    }
}

/// A validated key/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    key: TagKey,
    value: String,
}

impl Tag {
    /// Build a tag, rejecting empty or oversized values
    pub fn new(key: TagKey, value: impl Into<String>) -> Result<Self, TagError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TagError::EmptyValue(key.as_str()));
        }
        if value.len() > MAX_TAG_VALUE_LEN {
            return Err(TagError::ValueTooLong {
                key: key.as_str(),
                len: value.len(),
            });
        }
        Ok(Self { key, value })
    }

    /// Key
    pub fn key(&self) -> TagKey {
        self.key
    }

    /// Value
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// The tags written onto every instance of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTags {
    environment: Tag,
    instance_type: Option<Tag>,
}

impl RunTags {
    /// Build the tag set for `run_tag`, optionally recording the instance type
    pub fn new(run_tag: &RunTag, instance_type: Option<&str>) -> Result<Self, TagError> {
        let environment = Tag::new(TagKey::Environment, run_tag.as_str())?;
        let instance_type = instance_type
            .map(|t| Tag::new(TagKey::InstanceType, t))
            .transpose()?;
        Ok(Self {
            environment,
            instance_type,
        })
    }

    /// Tags in write order, environment first
    pub fn to_vec(&self) -> Vec<Tag> {
        let mut tags = vec![self.environment.clone()];
        tags.extend(self.instance_type.clone());
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceState;

    #[test]
    fn test_derive_run_tag() {
        assert_eq!(derive_run_tag("t_series").as_str(), "benchmark-t_series");
        assert_eq!(derive_run_tag("").as_str(), "benchmark-");
    }

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(derive_run_tag("c_series"), derive_run_tag("c_series"));
        assert_ne!(derive_run_tag("c_series"), derive_run_tag("t_series"));
    }

    #[test]
    fn test_bucket_name() {
        assert_eq!(RunTag::bucket_name("i-0abc"), "benchmark-i-0abc");
    }

    #[test]
    fn test_matches_run() {
        let tag = derive_run_tag("t_series");
        let ours = InstanceRecord::new("i-1", "t2.micro", InstanceState::Running)
            .with_tag("environment", "benchmark-t_series");
        let theirs = InstanceRecord::new("i-2", "t2.micro", InstanceState::Running)
            .with_tag("environment", "benchmark-c_series");
        let untagged = InstanceRecord::new("i-3", "t2.micro", InstanceState::Running);

        assert!(matches_run(&ours, &tag));
        assert!(!matches_run(&theirs, &tag));
        assert!(!matches_run(&untagged, &tag));
    }

    #[test]
    fn test_tag_validation() {
        assert_eq!(
            Tag::new(TagKey::InstanceType, ""),
            Err(TagError::EmptyValue("instanceType"))
        );
        let long = "x".repeat(MAX_TAG_VALUE_LEN + 1);
        assert!(matches!(
            Tag::new(TagKey::Environment, long),
            Err(TagError::ValueTooLong { .. })
        ));
    }

    #[test]
    fn test_tag_key_parse() {
        assert_eq!("environment".parse::<TagKey>(), Ok(TagKey::Environment));
        assert!("owner".parse::<TagKey>().is_err());
    }

    #[test]
    fn test_run_tags_order() {
        let tags = RunTags::new(&derive_run_tag("t_series"), Some("t2.micro")).unwrap();
        let tags = tags.to_vec();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].key(), TagKey::Environment);
        assert_eq!(tags[1].value(), "t2.micro");
    }

    #[test]
    fn test_run_tag_serializes_transparent() {
        let json = serde_json::to_string(&derive_run_tag("x")).unwrap();
        assert_eq!(json, "\"benchmark-x\"");
    }
}
