//! S3 storage provider

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use fleet_bench_core::{ProviderError, StorageProvider};

use super::error::from_sdk;

/// Region where buckets are created without a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// `StorageProvider` backed by the S3 API
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: Option<String>,
}

impl S3Storage {
    /// Create a provider from a loaded SDK configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
            region: config.region().map(|r| r.to_string()),
        }
    }

    fn bucket_configuration(&self) -> Option<CreateBucketConfiguration> {
        location_constraint(self.region.as_deref()).map(|region| {
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build()
        })
    }
}

/// Location constraint required for a bucket in `region`
fn location_constraint(region: Option<&str>) -> Option<&str> {
    region.filter(|r| !r.is_empty() && *r != DEFAULT_REGION)
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("region", &self.region)
            .finish()
    }
}

#[async_trait]
impl StorageProvider for S3Storage {
    fn provider_name(&self) -> &str {
        "s3"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ProviderError> {
        let result = self
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(self.bucket_configuration())
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(bucket, "Bucket created");
                Ok(())
            }
            Err(e) => match e.as_service_error() {
                Some(service) if service.is_bucket_already_owned_by_you() => Ok(()),
                _ => Err(from_sdk("create_bucket", e)),
            },
        }
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, ProviderError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| from_sdk("list_objects_v2", e))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(str::to_string),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ProviderError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| from_sdk("delete_object", e))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ProviderError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| from_sdk("delete_bucket", e))?;
        tracing::debug!(bucket, "Bucket deleted");
        Ok(())
    }
}
