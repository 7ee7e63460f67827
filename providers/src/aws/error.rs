//! Mapping of AWS SDK failures onto `ProviderError`

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use fleet_bench_core::ProviderError;

/// Error code EC2 returns when a dry-run request would have succeeded
pub(crate) const DRY_RUN_OK: &str = "DryRunOperation";

/// Whether `err` is EC2's "would have succeeded" answer to a dry run
pub(crate) fn is_dry_run_ok<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    err.code() == Some(DRY_RUN_OK)
}

/// Classify an SDK failure
pub(crate) fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let classified = match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            classify_code(
                inner.code().unwrap_or_default(),
                inner.message().unwrap_or_default(),
            )
        }
        SdkError::ConstructionFailure(_) => {
            ProviderError::InvalidParameter(DisplayErrorContext(&err).to_string())
        }
        _ => ProviderError::Unavailable(DisplayErrorContext(&err).to_string()),
    };

    tracing::debug!(operation, error = %classified, "AWS call failed");
    classified
}

/// Classify a service error code
pub(crate) fn classify_code(code: &str, message: &str) -> ProviderError {
    let detail = if message.is_empty() {
        code.to_string()
    } else {
        format!("{code}: {message}")
    };

    match code {
        "UnauthorizedOperation" | "AuthFailure" | "AccessDenied" | "AccessDeniedException"
        | "InvalidClientTokenId" | "SignatureDoesNotMatch" | "ExpiredToken"
        | "OptInRequired" => ProviderError::PermissionDenied(detail),

        "RequestLimitExceeded" | "Throttling" | "ThrottlingException" | "SlowDown"
        | "TooManyRequestsException" => ProviderError::Throttled { retry_after: None },

        "NoSuchBucket" | "NoSuchKey" | "NotFound" => ProviderError::NotFound(detail),
        c if c.ends_with(".NotFound") => ProviderError::NotFound(detail),

        "InternalError" | "InternalFailure" | "ServiceUnavailable" | "Unavailable"
        | "InsufficientInstanceCapacity" => ProviderError::Unavailable(detail),

        "BucketNotEmpty" | "BucketAlreadyExists" | "IdempotentParameterMismatch" => {
            ProviderError::InvalidParameter(detail)
        }
        c if c.starts_with("Invalid")
            || c.starts_with("Missing")
            || c.starts_with("Unsupported") =>
        {
            ProviderError::InvalidParameter(detail)
        }

        _ => ProviderError::Unavailable(detail),
    }
}
