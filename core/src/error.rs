//! Error types for fleet-bench-core

use thiserror::Error;

use crate::traits::ProviderError;

/// Controller error taxonomy
///
/// Per-instance variants (`InstanceUnreachable`, `BenchmarkFailed`,
/// `ResourceOrphaned`) are logged where they occur and carried in results as
/// a `BenchmarkStatus` or orphan list; they never abort a run.
/// Fatal variants abort before any further resource is created.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Transient provider failure that outlived the retry budget
    #[error("provider unavailable during {operation}: {message}")]
    ProviderUnavailable {
        /// Provider operation that failed
        operation: String,
        /// Last error message
        message: String,
    },

    /// Credentials or IAM policy rejected the call
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Provider rejected the request shape (bad AMI, unknown type, ...)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A created resource could not be tagged or tracked
    #[error("resource {resource_id} orphaned: {reason}")]
    ResourceOrphaned {
        /// Provider id of the orphaned resource
        resource_id: String,
        /// Why tracking failed
        reason: String,
    },

    /// Instance never became reachable
    #[error("instance {instance_id} unreachable: {reason}")]
    InstanceUnreachable {
        /// Instance id
        instance_id: String,
        /// Last probe failure
        reason: String,
    },

    /// Workload failed on an instance
    #[error("benchmark failed on {instance_id}: {reason}")]
    BenchmarkFailed {
        /// Instance id
        instance_id: String,
        /// Failure detail
        reason: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Required builder field not set
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Pool task panicked or was aborted
    #[error("worker error: {0}")]
    Worker(String),

    /// Run-level cancellation was observed
    #[error("run cancelled")]
    Cancelled,

    /// A run aborted and its teardown could not remove everything it created
    #[error("{source}; left behind: {}", .orphaned.join(", "))]
    Aborted {
        /// Error that aborted the run
        source: Box<FleetError>,
        /// Resources needing manual cleanup
        orphaned: Vec<String>,
    },
}

impl FleetError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        FleetError::Config(msg.into())
    }

    /// Create a missing-configuration error
    pub fn missing_config(field: &'static str) -> Self {
        FleetError::MissingConfig(field)
    }

    /// Create a worker error
    pub fn worker(msg: impl Into<String>) -> Self {
        FleetError::Worker(msg.into())
    }

    /// Wrap a provider error raised by `operation`
    pub fn provider(operation: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::PermissionDenied(msg) => {
                FleetError::PermissionDenied(format!("{operation}: {msg}"))
            }
            ProviderError::InvalidParameter(msg) => {
                FleetError::InvalidRequest(format!("{operation}: {msg}"))
            }
            other => FleetError::ProviderUnavailable {
                operation: operation.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        match self {
            FleetError::Aborted { source, .. } => source.is_fatal(),
            other => matches!(
                other,
                FleetError::PermissionDenied(_)
                    | FleetError::InvalidRequest(_)
                    | FleetError::Config(_)
                    | FleetError::MissingConfig(_)
            ),
        }
    }

    /// Resources an aborted run left behind
    pub fn orphaned(&self) -> &[String] {
        match self {
            FleetError::Aborted { orphaned, .. } => orphaned,
            _ => &[],
        }
    }

    /// Whether the failure is scoped to a single instance
    pub fn is_per_instance(&self) -> bool {
        matches!(
            self,
            FleetError::ResourceOrphaned { .. }
                | FleetError::InstanceUnreachable { .. }
                | FleetError::BenchmarkFailed { .. }
        )
    }
}

/// Result type alias
pub type FleetResult<T> = std::result::Result<T, FleetError>;
