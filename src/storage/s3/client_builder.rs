use std::time::Duration;

use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::retry::RetryConfig as SdkRetryConfig;
use aws_config::stalled_stream_protection::StalledStreamProtectionConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;

use crate::config::ClientConfig;
use crate::types::S3Credentials;

const CREDENTIALS_PROVIDER_NAME: &str = "s3objects";

impl ClientConfig {
    /// Build an `aws_sdk_s3::Client` from this configuration.
    pub async fn create_client(&self) -> Client {
        let sdk_config = self.load_sdk_config().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.force_path_style)
            .accelerate(self.accelerate)
            .request_checksum_calculation(self.request_checksum_calculation);

        if let Some(endpoint_url) = &self.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        Client::from_conf(builder.build())
    }

    async fn load_sdk_config(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(self.build_retry_config())
            .timeout_config(self.build_timeout_config());

        if let Some(profile_files) = self.build_profile_files() {
            loader = loader.profile_files(profile_files);
        }

        loader = match &self.credential {
            S3Credentials::Profile(profile_name) => loader.profile_name(profile_name),
            S3Credentials::Credentials { access_keys } => {
                loader.credentials_provider(Credentials::new(
                    access_keys.access_key.clone(),
                    access_keys.secret_access_key.clone(),
                    access_keys.session_token.clone(),
                    None,
                    CREDENTIALS_PROVIDER_NAME,
                ))
            }
            S3Credentials::FromEnvironment => loader,
        };

        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }

        if self.disable_stalled_stream_protection {
            loader = loader.stalled_stream_protection(StalledStreamProtectionConfig::disabled());
        }

        loader.load().await
    }

    fn build_retry_config(&self) -> SdkRetryConfig {
        SdkRetryConfig::standard()
            .with_max_attempts(self.retry_config.aws_max_attempts)
            .with_initial_backoff(Duration::from_millis(
                self.retry_config.initial_backoff_milliseconds,
            ))
    }

    fn build_timeout_config(&self) -> TimeoutConfig {
        let timeouts = &self.cli_timeout_config;
        let mut builder = TimeoutConfig::builder();

        if let Some(ms) = timeouts.operation_timeout_milliseconds {
            builder = builder.operation_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.operation_attempt_timeout_milliseconds {
            builder = builder.operation_attempt_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.connect_timeout_milliseconds {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.read_timeout_milliseconds {
            builder = builder.read_timeout(Duration::from_millis(ms));
        }

        builder.build()
    }

    fn build_profile_files(&self) -> Option<ProfileFiles> {
        let location = &self.client_config_location;
        if location.aws_config_file.is_none() && location.aws_shared_credentials_file.is_none() {
            return None;
        }

        let mut builder = ProfileFiles::builder();
        builder = match &location.aws_config_file {
            Some(path) => builder.with_file(ProfileFileKind::Config, path),
            None => builder.include_default_config_file(true),
        };
        builder = match &location.aws_shared_credentials_file {
            Some(path) => builder.with_file(ProfileFileKind::Credentials, path),
            None => builder.include_default_credentials_file(true),
        };

        Some(builder.build())
    }
}
