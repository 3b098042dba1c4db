pub mod args;

use aws_sdk_s3::types::RequestPayer;
use aws_smithy_types::checksum_config::RequestChecksumCalculation;

use crate::types::{ClientConfigLocation, S3Credentials};

pub const DEFAULT_LISTING_TIMEOUT_MILLISECONDS: u64 = 20_000;
pub const DEFAULT_OBJECT_LISTING_QUEUE_SIZE: u32 = 1000;
pub const DEFAULT_MAX_KEYS: i32 = 1000;
pub const DEFAULT_BATCH_SIZE: u16 = 1000;

/// Main configuration for listing and deletion.
///
/// # Quick Start
///
/// ```
/// use s3objects_rs::Config;
///
/// let config = Config::for_endpoint("http://localhost:9000", "us-east-1");
/// assert_eq!(config.listing_timeout_milliseconds, 20_000);
/// assert!(config.client_config.as_ref().unwrap().force_path_style);
/// ```
///
/// [`Config::default()`] leaves `client_config` unset. A storage created from
/// such a config has no S3 client, which is only useful with a custom
/// [`StorageTrait`](crate::storage::StorageTrait) implementation.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_config: Option<ClientConfig>,
    pub force_retry_config: ForceRetryConfig,
    pub tracing_config: Option<TracingConfig>,
    pub listing_timeout_milliseconds: u64,
    pub object_listing_queue_size: u32,
    pub max_keys: i32,
    pub batch_size: u16,
    pub rate_limit_api_calls: Option<u32>,
    pub bypass_governance_retention: bool,
    pub warn_as_error: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` that talks to an S3 compatible endpoint with
    /// path-style addressing and credentials from the environment.
    pub fn for_endpoint(endpoint_url: &str, region: &str) -> Self {
        Config {
            client_config: Some(ClientConfig {
                region: Some(region.to_string()),
                endpoint_url: Some(endpoint_url.to_string()),
                force_path_style: true,
                ..ClientConfig::default()
            }),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_config: None,
            force_retry_config: ForceRetryConfig::default(),
            tracing_config: None,
            listing_timeout_milliseconds: DEFAULT_LISTING_TIMEOUT_MILLISECONDS,
            object_listing_queue_size: DEFAULT_OBJECT_LISTING_QUEUE_SIZE,
            max_keys: DEFAULT_MAX_KEYS,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit_api_calls: None,
            bypass_governance_retention: false,
            warn_as_error: false,
            auto_complete_shell: None,
        }
    }
}

/// AWS S3 client configuration.
///
/// Converted into an `aws_sdk_s3::Client` by
/// [`ClientConfig::create_client`](crate::config::ClientConfig::create_client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub accelerate: bool,
    pub request_payer: Option<RequestPayer>,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            client_config_location: ClientConfigLocation::default(),
            credential: S3Credentials::FromEnvironment,
            region: None,
            endpoint_url: None,
            force_path_style: false,
            accelerate: false,
            request_payer: None,
            retry_config: RetryConfig::default(),
            cli_timeout_config: CLITimeoutConfig::default(),
            disable_stalled_stream_protection: false,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }
}

/// Retry configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            aws_max_attempts: 10,
            initial_backoff_milliseconds: 100,
        }
    }
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone, Default)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

/// Application-level retries of single deletes after a retryable batch
/// failure, on top of the AWS SDK retries.
#[derive(Debug, Clone, Copy)]
pub struct ForceRetryConfig {
    pub force_retry_count: u32,
    pub force_retry_interval_milliseconds: u64,
}

impl Default for ForceRetryConfig {
    fn default() -> Self {
        ForceRetryConfig {
            force_retry_count: 0,
            force_retry_interval_milliseconds: 1000,
        }
    }
}
