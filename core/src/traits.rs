//! Provider capability traits
//!
//! The controller never talks to a cloud SDK or an SSH library directly. It
//! consumes these traits; implementations live in `fleet-bench-providers`, and
//! tests use in-memory mocks.

use std::time::Duration;

use async_trait::async_trait;

use crate::instance::{InstanceFilter, InstanceRecord, LaunchSpec};
use crate::tags::Tag;

// ============================================================================
// Compute
// ============================================================================

/// Compute-provider capability
///
/// Every mutating call takes `dry_run`. In dry-run mode the provider validates
/// permissions and request shape without materializing anything; a successful
/// validation returns `Ok` (with no records for `create_instances`).
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Provider identifier (e.g., "ec2")
    fn provider_name(&self) -> &str;

    /// List instances matching `filter`
    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, ProviderError>;

    /// Launch exactly `count` instances of `spec` in one call
    async fn create_instances(
        &self,
        spec: &LaunchSpec,
        count: usize,
        dry_run: bool,
    ) -> Result<Vec<InstanceRecord>, ProviderError>;

    /// Write `tags` onto the resources `ids`
    async fn tag_resources(
        &self,
        ids: &[String],
        tags: &[Tag],
        dry_run: bool,
    ) -> Result<(), ProviderError>;

    /// Request termination of `ids`. Already-terminated instances are not an
    /// error; unknown ids surface `ProviderError::NotFound`.
    async fn terminate_instances(&self, ids: &[String], dry_run: bool)
        -> Result<(), ProviderError>;
}

// ============================================================================
// Storage
// ============================================================================

/// Object-storage capability
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider identifier (e.g., "s3")
    fn provider_name(&self) -> &str;

    /// Create a bucket. Creating a bucket this account already owns succeeds.
    async fn create_bucket(&self, bucket: &str) -> Result<(), ProviderError>;

    /// List every object key in `bucket`
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, ProviderError>;

    /// Delete one object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ProviderError>;

    /// Delete an empty bucket
    async fn delete_bucket(&self, bucket: &str) -> Result<(), ProviderError>;
}

/// Provider-call errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network, timeout or 5xx
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Request rate exceeded
    #[error("throttled: retry after {retry_after:?}")]
    Throttled {
        /// Provider hint
        retry_after: Option<Duration>,
    },

    /// Credentials or policy rejected the call
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed or unsatisfiable request
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Resource does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    /// Whether retrying the same call can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::Throttled { .. }
        )
    }

    /// Provider-suggested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the resource was already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

// ============================================================================
// Remote execution
// ============================================================================

/// Output of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An established remote session
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run `command` to completion
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError>;
}

/// Remote-execution capability
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Open a session to `instance`
    async fn connect(&self, instance: &InstanceRecord)
        -> Result<Box<dyn RemoteSession>, RemoteError>;

    /// Lightweight reachability probe
    async fn probe(&self, instance: &InstanceRecord) -> bool {
        self.connect(instance).await.is_ok()
    }
}

/// Remote-execution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Session could not be established
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Session established but the command could not run
    #[error("command error: {0}")]
    Command(String),
}
