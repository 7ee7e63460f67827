//! fleet-bench-providers: concrete capability implementations
//!
//! - [`aws::Ec2Compute`]: `ComputeProvider` over the EC2 API
//! - [`aws::S3Storage`]: `StorageProvider` over the S3 API
//! - [`ssh::SshExecutor`]: `RemoteExecutor` over SSH
//!
//! Both AWS clients share one `SdkConfig`, loaded once per invocation with
//! [`aws::load_sdk_config`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aws;
pub mod ssh;

pub use aws::{load_sdk_config, Ec2Compute, S3Storage};
pub use ssh::{SshConfig, SshExecutor};
