//! In-memory provider mocks shared by the unit tests

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::instance::{InstanceFilter, InstanceRecord, InstanceState, LaunchSpec};
use crate::retry::RetryPolicy;
use crate::tags::{RunTag, Tag, TagKey};
use crate::traits::{
    CommandOutput, ComputeProvider, ProviderError, RemoteError, RemoteExecutor, RemoteSession,
    StorageProvider,
};

pub(crate) fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries).with_delays(Duration::from_millis(1), Duration::from_millis(2))
}

// ============================================================================
// Mock cloud (compute + storage)
// ============================================================================

#[derive(Default)]
struct CloudState {
    instances: BTreeMap<String, InstanceRecord>,
    boot_countdown: HashMap<String, u32>,
    buckets: BTreeMap<String, BTreeSet<String>>,
    failures: HashMap<&'static str, VecDeque<ProviderError>>,
    calls: Vec<String>,
    client_tokens: HashMap<String, Vec<String>>,
    next_id: u32,
    clock: i64,
}

pub(crate) struct MockCloud {
    state: Mutex<CloudState>,
    boot_polls: u32,
    stuck_types: BTreeSet<String>,
    rejected_types: BTreeSet<String>,
    drop_creation_tags: bool,
    deny_mutations: bool,
}

impl MockCloud {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CloudState::default()),
            boot_polls: 1,
            stuck_types: BTreeSet::new(),
            rejected_types: BTreeSet::new(),
            drop_creation_tags: false,
            deny_mutations: false,
        }
    }

    /// Number of observations before a new instance reports running
    pub(crate) fn with_boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls;
        self
    }

    /// Instances of this type never leave pending
    pub(crate) fn with_stuck_type(mut self, instance_type: &str) -> Self {
        self.stuck_types.insert(instance_type.to_string());
        self
    }

    /// Launches of this type fail with an invalid-parameter error
    pub(crate) fn with_rejected_type(mut self, instance_type: &str) -> Self {
        self.rejected_types.insert(instance_type.to_string());
        self
    }

    /// Ignore tags passed at creation
    pub(crate) fn with_dropped_creation_tags(mut self) -> Self {
        self.drop_creation_tags = true;
        self
    }

    /// Reject every mutating call, dry-run included
    pub(crate) fn with_denied_mutations(mut self) -> Self {
        self.deny_mutations = true;
        self
    }

    /// Queue an error for the next call of `op`
    pub(crate) fn fail_next(&self, op: &'static str, err: ProviderError) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(op).or_default().push_back(err);
    }

    /// Seed `count` running instances tagged for `run_tag`
    pub(crate) fn seed_running(&self, run_tag: &RunTag, instance_type: &str, count: usize) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        (0..count)
            .map(|_| {
                let record = Self::new_record(&mut state, instance_type, InstanceState::Running)
                    .with_tag(TagKey::Environment.as_str(), run_tag.as_str());
                let id = record.id.clone();
                state.instances.insert(id.clone(), record);
                id
            })
            .collect()
    }

    pub(crate) fn set_state(&self, id: &str, new_state: InstanceState) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.instances.get_mut(id) {
            record.state = new_state;
        }
    }

    pub(crate) fn put_object(&self, bucket: &str, key: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub(crate) fn bucket_exists(&self, bucket: &str) -> bool {
        self.state.lock().unwrap().buckets.contains_key(bucket)
    }

    /// Live (non-terminated) instances of `instance_type` tagged for `run_tag`
    pub(crate) fn live_count(&self, run_tag: &RunTag, instance_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .instances
            .values()
            .filter(|r| r.instance_type == instance_type)
            .filter(|r| r.state != InstanceState::Terminated)
            .filter(|r| r.has_tag(TagKey::Environment.as_str(), run_tag.as_str()))
            .count()
    }

    pub(crate) fn total_live(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .instances
            .values()
            .filter(|r| r.state != InstanceState::Terminated)
            .count()
    }

    /// Recorded calls, e.g. `create t2.micro x2`
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn new_record(state: &mut CloudState, instance_type: &str, st: InstanceState) -> InstanceRecord {
        state.next_id += 1;
        state.clock += 60;
        let id = format!("i-{:04}", state.next_id);
        let launched_at = Utc
            .timestamp_opt(1_700_000_000 + state.clock, 0)
            .single()
            .unwrap();
        InstanceRecord::new(&id, instance_type, st)
            .with_launched_at(launched_at)
            .with_public_address(format!("10.0.0.{}", state.next_id))
    }

    fn take_failure(state: &mut CloudState, op: &'static str) -> Option<ProviderError> {
        state.failures.get_mut(op).and_then(|q| q.pop_front())
    }

    fn check_mutation(&self, state: &mut CloudState, op: &'static str) -> Result<(), ProviderError> {
        if let Some(err) = Self::take_failure(state, op) {
            return Err(err);
        }
        if self.deny_mutations {
            return Err(ProviderError::PermissionDenied(format!(
                "not authorized to perform {op}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeProvider for MockCloud {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list".to_string());
        if let Some(err) = Self::take_failure(&mut state, "list_instances") {
            return Err(err);
        }

        // Boot progression happens on observation
        let ids: Vec<String> = state.instances.keys().cloned().collect();
        for id in ids {
            let matches_ids = filter.ids.is_empty() || filter.ids.contains(&id);
            if !matches_ids {
                continue;
            }
            let stuck = state
                .instances
                .get(&id)
                .map(|r| self.stuck_types.contains(&r.instance_type))
                .unwrap_or(false);
            if stuck {
                continue;
            }
            if let Some(remaining) = state.boot_countdown.get_mut(&id) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    state.boot_countdown.remove(&id);
                    if let Some(record) = state.instances.get_mut(&id) {
                        if record.state == InstanceState::Pending {
                            record.state = InstanceState::Running;
                        }
                    }
                }
            }
        }

        Ok(state
            .instances
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn create_instances(
        &self,
        spec: &LaunchSpec,
        count: usize,
        dry_run: bool,
    ) -> Result<Vec<InstanceRecord>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!(
            "create {} x{}{}",
            spec.instance_type,
            count,
            if dry_run { " (dry-run)" } else { "" }
        ));
        self.check_mutation(&mut state, "create_instances")?;
        if self.rejected_types.contains(&spec.instance_type) {
            return Err(ProviderError::InvalidParameter(format!(
                "unsupported instance type {}",
                spec.instance_type
            )));
        }
        if dry_run {
            return Ok(Vec::new());
        }

        // Same client token returns the original batch
        if let Some(ids) = state.client_tokens.get(&spec.client_token).cloned() {
            return Ok(ids
                .iter()
                .filter_map(|id| state.instances.get(id).cloned())
                .collect());
        }

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let mut record = Self::new_record(&mut state, &spec.instance_type, InstanceState::Pending);
            if !self.drop_creation_tags {
                for tag in &spec.tags {
                    record = record.with_tag(tag.key().as_str(), tag.value());
                }
            }
            state.boot_countdown.insert(record.id.clone(), self.boot_polls);
            state.instances.insert(record.id.clone(), record.clone());
            created.push(record);
        }
        let ids = created.iter().map(|r| r.id.clone()).collect();
        state.client_tokens.insert(spec.client_token.clone(), ids);
        Ok(created)
    }

    async fn tag_resources(
        &self,
        ids: &[String],
        tags: &[Tag],
        dry_run: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("tag {}", ids.join(",")));
        self.check_mutation(&mut state, "tag_resources")?;
        if dry_run {
            return Ok(());
        }
        for id in ids {
            let record = state
                .instances
                .get_mut(id)
                .ok_or_else(|| ProviderError::NotFound(id.clone()))?;
            for tag in tags {
                record
                    .tags
                    .insert(tag.key().as_str().to_string(), tag.value().to_string());
            }
        }
        Ok(())
    }

    async fn terminate_instances(
        &self,
        ids: &[String],
        dry_run: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!(
            "terminate {}{}",
            ids.join(","),
            if dry_run { " (dry-run)" } else { "" }
        ));
        self.check_mutation(&mut state, "terminate_instances")?;
        if let Some(missing) = ids.iter().find(|id| !state.instances.contains_key(*id)) {
            return Err(ProviderError::NotFound(missing.clone()));
        }
        if dry_run {
            return Ok(());
        }
        for id in ids {
            if let Some(record) = state.instances.get_mut(id) {
                record.state = InstanceState::Terminated;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MockCloud {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_bucket {bucket}"));
        if let Some(err) = Self::take_failure(&mut state, "create_bucket") {
            return Err(err);
        }
        state.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = Self::take_failure(&mut state, "list_objects") {
            return Err(err);
        }
        state
            .buckets
            .get(bucket)
            .map(|keys| keys.iter().cloned().collect())
            .ok_or_else(|| ProviderError::NotFound(bucket.to_string()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = Self::take_failure(&mut state, "delete_object") {
            return Err(err);
        }
        let keys = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ProviderError::NotFound(bucket.to_string()))?;
        if keys.remove(key) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("{bucket}/{key}")))
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_bucket {bucket}"));
        if let Some(err) = Self::take_failure(&mut state, "delete_bucket") {
            return Err(err);
        }
        match state.buckets.get(bucket) {
            None => Err(ProviderError::NotFound(bucket.to_string())),
            Some(keys) if !keys.is_empty() => Err(ProviderError::InvalidParameter(format!(
                "bucket {bucket} is not empty"
            ))),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }
}

// ============================================================================
// Mock remote executor
// ============================================================================

pub(crate) struct MockExecutor {
    unreachable_types: BTreeSet<String>,
    failing_types: BTreeSet<String>,
    garbage_types: BTreeSet<String>,
    score: f64,
    connects: AtomicUsize,
    commands: Arc<Mutex<Vec<String>>>,
}

impl MockExecutor {
    pub(crate) fn new() -> Self {
        Self {
            unreachable_types: BTreeSet::new(),
            failing_types: BTreeSet::new(),
            garbage_types: BTreeSet::new(),
            score: 1234.5,
            connects: AtomicUsize::new(0),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sessions to this type always fail
    pub(crate) fn with_unreachable_type(mut self, instance_type: &str) -> Self {
        self.unreachable_types.insert(instance_type.to_string());
        self
    }

    /// Commands on this type exit non-zero
    pub(crate) fn with_failing_type(mut self, instance_type: &str) -> Self {
        self.failing_types.insert(instance_type.to_string());
        self
    }

    /// Commands on this type print no number
    pub(crate) fn with_garbage_type(mut self, instance_type: &str) -> Self {
        self.garbage_types.insert(instance_type.to_string());
        self
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every command run, prefixed with the instance id
    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

struct MockSession {
    instance_id: String,
    exit_code: i32,
    stdout: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}: {}", self.instance_id, command));
        Ok(CommandOutput {
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: if self.exit_code == 0 {
                String::new()
            } else {
                "workload crashed".to_string()
            },
        })
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn connect(
        &self,
        instance: &InstanceRecord,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if instance.public_address.is_none() {
            return Err(RemoteError::Unreachable(format!(
                "{} has no address",
                instance.id
            )));
        }
        if self.unreachable_types.contains(&instance.instance_type) {
            return Err(RemoteError::Unreachable(format!(
                "connection to {} timed out",
                instance.id
            )));
        }
        let (exit_code, stdout) = if self.failing_types.contains(&instance.instance_type) {
            (1, String::new())
        } else if self.garbage_types.contains(&instance.instance_type) {
            (0, "Segmentation fault\n".to_string())
        } else {
            (0, format!("warming up\n{}\n", self.score))
        };

        Ok(Box::new(MockSession {
            instance_id: instance.id.clone(),
            exit_code,
            stdout,
            log: Arc::clone(&self.commands),
        }))
    }
}
