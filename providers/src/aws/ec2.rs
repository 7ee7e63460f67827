//! EC2 compute provider

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, Instance, InstanceStateName, InstanceType,
    ResourceType, Tag as Ec2Tag, TagSpecification, VolumeType,
};
use aws_sdk_ec2::Client;
use chrono::{DateTime, Utc};
use fleet_bench_core::{
    ComputeProvider, InstanceFilter, InstanceRecord, InstanceState, LaunchSpec, ProviderError, Tag,
};

use super::error::{from_sdk, is_dry_run_ok};

/// `ComputeProvider` backed by the EC2 API
#[derive(Clone)]
pub struct Ec2Compute {
    client: Client,
}

impl Ec2Compute {
    /// Create a provider from a loaded SDK configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    /// Create a provider from an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for Ec2Compute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Compute")
            .field("region", &self.client.config().region())
            .finish()
    }
}

#[async_trait]
impl ComputeProvider for Ec2Compute {
    fn provider_name(&self) -> &str {
        "ec2"
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, ProviderError> {
        let filters = server_filters(filter);
        let ids = (!filter.ids.is_empty()).then(|| filter.ids.clone());

        let mut records = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let resp = self
                .client
                .describe_instances()
                .set_filters(Some(filters.clone()))
                .set_instance_ids(ids.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| from_sdk("describe_instances", e))?;

            records.extend(
                resp.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .filter_map(to_record),
            );

            match resp.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::debug!(count = records.len(), "Described instances");
        Ok(records)
    }

    async fn create_instances(
        &self,
        spec: &LaunchSpec,
        count: usize,
        dry_run: bool,
    ) -> Result<Vec<InstanceRecord>, ProviderError> {
        let count = i32::try_from(count)
            .map_err(|_| ProviderError::InvalidParameter(format!("count {count} too large")))?;

        let volume = &spec.boot_volume;
        let mapping = BlockDeviceMapping::builder()
            .device_name(&volume.device_name)
            .ebs(
                EbsBlockDevice::builder()
                    .volume_size(volume.size_gib)
                    .delete_on_termination(volume.delete_on_termination)
                    .volume_type(VolumeType::from(volume.volume_type.as_str()))
                    .build(),
            )
            .build();

        let tag_spec = TagSpecification::builder()
            .resource_type(ResourceType::Instance)
            .set_tags(Some(to_ec2_tags(&spec.tags)))
            .build();

        let result = self
            .client
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .key_name(&spec.key_name)
            .subnet_id(&spec.subnet_id)
            .min_count(count)
            .max_count(count)
            .client_token(&spec.client_token)
            .block_device_mappings(mapping)
            .tag_specifications(tag_spec)
            .dry_run(dry_run)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let records: Vec<_> = resp.instances().iter().filter_map(to_record).collect();
                tracing::info!(
                    instance_type = %spec.instance_type,
                    launched = records.len(),
                    "Instances launched"
                );
                Ok(records)
            }
            Err(e) if dry_run && is_dry_run_ok(&e) => Ok(Vec::new()),
            Err(e) => Err(from_sdk("run_instances", e)),
        }
    }

    async fn tag_resources(
        &self,
        ids: &[String],
        tags: &[Tag],
        dry_run: bool,
    ) -> Result<(), ProviderError> {
        let result = self
            .client
            .create_tags()
            .set_resources(Some(ids.to_vec()))
            .set_tags(Some(to_ec2_tags(tags)))
            .dry_run(dry_run)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if dry_run && is_dry_run_ok(&e) => Ok(()),
            Err(e) => Err(from_sdk("create_tags", e)),
        }
    }

    async fn terminate_instances(
        &self,
        ids: &[String],
        dry_run: bool,
    ) -> Result<(), ProviderError> {
        let result = self
            .client
            .terminate_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await;

        match result {
            Ok(resp) => {
                for change in resp.terminating_instances() {
                    tracing::debug!(
                        instance_id = change.instance_id().unwrap_or_default(),
                        previous = ?change.previous_state().and_then(|s| s.name()),
                        current = ?change.current_state().and_then(|s| s.name()),
                        "Termination requested"
                    );
                }
                Ok(())
            }
            Err(e) if dry_run && is_dry_run_ok(&e) => Ok(()),
            Err(e) => Err(from_sdk("terminate_instances", e)),
        }
    }
}

/// Translate the tag and state parts of `filter` into EC2 filters
fn server_filters(filter: &InstanceFilter) -> Vec<Filter> {
    let mut filters: Vec<Filter> = filter
        .tags
        .iter()
        .map(|(key, value)| {
            Filter::builder()
                .name(format!("tag:{key}"))
                .values(value)
                .build()
        })
        .collect();

    if !filter.states.is_empty() {
        let names = filter
            .states
            .iter()
            .flat_map(|s| state_names(*s))
            .map(|n| n.to_string())
            .collect();
        filters.push(
            Filter::builder()
                .name("instance-state-name")
                .set_values(Some(names))
                .build(),
        );
    }
    filters
}

/// EC2 state names folded into `state`
fn state_names(state: InstanceState) -> &'static [&'static str] {
    match state {
        InstanceState::Pending => &["pending"],
        InstanceState::Running => &["running"],
        InstanceState::Unreachable => &["stopping", "stopped"],
        InstanceState::Terminated => &["shutting-down", "terminated"],
    }
}

fn map_state(name: &InstanceStateName) -> InstanceState {
    match name {
        InstanceStateName::Pending => InstanceState::Pending,
        InstanceStateName::Running => InstanceState::Running,
        InstanceStateName::ShuttingDown | InstanceStateName::Terminated => {
            InstanceState::Terminated
        }
        _ => InstanceState::Unreachable,
    }
}

fn to_launched_at(time: &aws_sdk_ec2::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

fn to_record(instance: &Instance) -> Option<InstanceRecord> {
    let id = instance.instance_id()?;
    let instance_type = instance
        .instance_type()
        .map(|t| t.as_str())
        .unwrap_or_default();
    let state = instance
        .state()
        .and_then(|s| s.name())
        .map(map_state)
        .unwrap_or(InstanceState::Pending);

    let mut record = InstanceRecord::new(id, instance_type, state);
    for tag in instance.tags() {
        if let (Some(key), Some(value)) = (tag.key(), tag.value()) {
            record = record.with_tag(key, value);
        }
    }
    record.launched_at = instance.launch_time().and_then(to_launched_at);
    record.public_address = instance
        .public_ip_address()
        .or(instance.public_dns_name().filter(|d| !d.is_empty()))
        .map(str::to_string);
    Some(record)
}

fn to_ec2_tags(tags: &[Tag]) -> Vec<Ec2Tag> {
    tags.iter()
        .map(|t| Ec2Tag::builder().key(t.key().as_str()).value(t.value()).build())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::InstanceState as Ec2State;
    use fleet_bench_core::{derive_run_tag, RunTags, TagKey};

    #[test]
    fn test_map_state() {
        assert_eq!(map_state(&InstanceStateName::Pending), InstanceState::Pending);
        assert_eq!(map_state(&InstanceStateName::Running), InstanceState::Running);
        assert_eq!(map_state(&InstanceStateName::Stopped), InstanceState::Unreachable);
        assert_eq!(
            map_state(&InstanceStateName::ShuttingDown),
            InstanceState::Terminated
        );
    }

    #[test]
    fn test_state_names_round_trip_through_map_state() {
        for state in InstanceState::ALL {
            for name in state_names(state) {
                assert_eq!(map_state(&InstanceStateName::from(*name)), state, "{name}");
            }
        }
    }

    #[test]
    fn test_server_filters() {
        let filter = InstanceFilter::tagged("environment", "benchmark-t_series")
            .with_states(&[InstanceState::Running, InstanceState::Terminated]);
        let filters = server_filters(&filter);

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].name(), Some("tag:environment"));
        assert_eq!(filters[0].values(), ["benchmark-t_series".to_string()]);
        assert_eq!(filters[1].name(), Some("instance-state-name"));
        assert_eq!(
            filters[1].values(),
            ["running", "shutting-down", "terminated"].map(String::from)
        );
    }

    #[test]
    fn test_server_filters_without_states() {
        let filters = server_filters(&InstanceFilter::by_ids(vec!["i-1".into()]));
        assert!(filters.is_empty());
    }

    #[test]
    fn test_to_record() {
        let instance = Instance::builder()
            .instance_id("i-0abc")
            .instance_type(InstanceType::T2Micro)
            .state(Ec2State::builder().name(InstanceStateName::Running).build())
            .tags(Ec2Tag::builder().key("environment").value("benchmark-t_series").build())
            .launch_time(aws_sdk_ec2::primitives::DateTime::from_secs(1_700_000_000))
            .public_ip_address("203.0.113.7")
            .build();

        let record = to_record(&instance).unwrap();
        assert_eq!(record.id, "i-0abc");
        assert_eq!(record.instance_type, "t2.micro");
        assert_eq!(record.state, InstanceState::Running);
        assert!(record.has_tag("environment", "benchmark-t_series"));
        assert_eq!(record.launched_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(record.public_address.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_to_record_requires_id() {
        assert!(to_record(&Instance::builder().build()).is_none());
    }

    #[test]
    fn test_to_ec2_tags() {
        let tags = RunTags::new(&derive_run_tag("t_series"), Some("t2.micro"))
            .unwrap()
            .to_vec();
        let ec2_tags = to_ec2_tags(&tags);

        assert!(ec2_tags.iter().any(|t| t.key() == Some(TagKey::Environment.as_str())
            && t.value() == Some("benchmark-t_series")));
        assert!(ec2_tags
            .iter()
            .any(|t| t.key() == Some(TagKey::InstanceType.as_str()) && t.value() == Some("t2.micro")));
    }
}
