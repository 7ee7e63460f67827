//! AWS implementations of the compute and storage capabilities

mod ec2;
mod error;
mod s3;

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};

pub use ec2::Ec2Compute;
pub use s3::S3Storage;

/// Load the shared SDK configuration for `region`
///
/// Credentials come from the default provider chain (environment, profile,
/// instance metadata). The region falls back to the default chain when
/// `region` is empty.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    let explicit = (!region.is_empty()).then(|| Region::new(region.to_string()));
    let region_provider = RegionProviderChain::first_try(explicit).or_default_provider();

    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;

    tracing::debug!(region = ?config.region(), "Loaded AWS configuration");
    config
}
