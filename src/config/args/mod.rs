use crate::config::{
    CLITimeoutConfig, ClientConfig, Config, ForceRetryConfig, RetryConfig, TracingConfig,
};
use crate::types::{AccessKeys, ClientConfigLocation, ListObjectsRequest, S3Credentials};
use aws_sdk_s3::types::RequestPayer;
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;
use std::path::PathBuf;

mod value_parser;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_BATCH_SIZE: u16 = super::DEFAULT_BATCH_SIZE;
const DEFAULT_MAX_KEYS: i32 = super::DEFAULT_MAX_KEYS;
const DEFAULT_OBJECT_LISTING_QUEUE_SIZE: u32 = super::DEFAULT_OBJECT_LISTING_QUEUE_SIZE;
const DEFAULT_LISTING_TIMEOUT_MILLISECONDS: u64 = super::DEFAULT_LISTING_TIMEOUT_MILLISECONDS;
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_FORCE_RETRY_COUNT: u32 = 5;
const DEFAULT_FORCE_RETRY_INTERVAL_MILLISECONDS: u64 = 1000;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_WARN_AS_ERROR: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;
const DEFAULT_ACCELERATE: bool = false;
const DEFAULT_REQUEST_PAYER: bool = false;
const DEFAULT_BYPASS_GOVERNANCE_RETENTION: bool = false;

const S3_SCHEME: &str = "s3://";
const MAX_BATCH_SIZE: u16 = 1000;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_INVALID_TARGET: &str =
    "Target must be an S3 path starting with 's3://' (e.g., s3://bucket/prefix).";
const ERROR_MESSAGE_MISSING_COMMAND: &str =
    "A subcommand is required (ls or rm). Run with --help for usage.";
const ERROR_MESSAGE_MISSING_OBJECT_KEY: &str =
    "rm requires an object key (s3://bucket/key) unless --recursive is given.";
const ERROR_MESSAGE_BATCH_SIZE_ZERO: &str = "Batch size must be at least 1.";
const ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE: &str = "Batch size must be at most 1000 (S3 API limit).";
const ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO: &str =
    "Object listing queue size must be at least 1.";
const ERROR_MESSAGE_LISTING_TIMEOUT_ZERO: &str = "Listing timeout must be at least 1 millisecond.";

// ---------------------------------------------------------------------------
// Value parser helpers
// ---------------------------------------------------------------------------

fn check_s3_target(s: &str) -> Result<String, String> {
    match s.strip_prefix(S3_SCHEME) {
        Some(rest) if !rest.is_empty() && !rest.starts_with('/') => Ok(s.to_string()),
        _ => Err(ERROR_MESSAGE_INVALID_TARGET.to_string()),
    }
}

/// Split an `s3://bucket/path` target into its bucket and path.
fn split_s3_target(target: &str) -> Result<(String, String), String> {
    let without_scheme = target
        .strip_prefix(S3_SCHEME)
        .ok_or_else(|| ERROR_MESSAGE_INVALID_TARGET.to_string())?;

    let (bucket, path) = without_scheme
        .split_once('/')
        .unwrap_or((without_scheme, ""));
    if bucket.is_empty() {
        return Err(ERROR_MESSAGE_INVALID_TARGET.to_string());
    }

    Ok((bucket.to_string(), path.to_string()))
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// s3objects - List and delete objects in S3 compatible storage.
///
/// Listing reports the legal hold and retention settings of every object.
/// Deletion skips objects it has no permission to delete.
///
/// Example:
///   s3objects ls s3://my-bucket/logs/ --recursive
///   s3objects rm s3://my-bucket/logs/2023/ --recursive -v
///   s3objects rm s3://my-bucket/report.pdf --version-id 3HL4kqtJlcpXroDTDmJ
#[derive(Parser, Clone, Debug)]
#[command(name = "s3objects", version, about, long_about = None)]
pub struct CLIArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Number of objects per DeleteObjects request (1-1000). 1 uses DeleteObject.
    #[arg(long, env, global = true, default_value_t = DEFAULT_BATCH_SIZE, help_heading = "Performance")]
    pub batch_size: u16,

    /// Maximum S3 API calls per second.
    #[arg(long, env, global = true, value_parser = clap::value_parser!(u32).range(1..), help_heading = "Performance")]
    pub rate_limit_api_calls: Option<u32>,

    /// Object listing channel queue size.
    #[arg(long, env, global = true, default_value_t = DEFAULT_OBJECT_LISTING_QUEUE_SIZE, help_heading = "Performance")]
    pub object_listing_queue_size: u32,

    /// Max keys per listing request.
    #[arg(long, env, global = true, default_value_t = DEFAULT_MAX_KEYS,
        value_parser = clap::value_parser!(i32).range(1..=1000), help_heading = "Performance")]
    pub max_keys: i32,

    /// Time limit for collecting a whole `ls` result, in milliseconds.
    #[arg(long, env, global = true, default_value_t = DEFAULT_LISTING_TIMEOUT_MILLISECONDS, help_heading = "Performance")]
    pub listing_timeout_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (warn), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, global = true, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, global = true, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum retry attempts for AWS SDK operations.
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial backoff in milliseconds for retries.
    #[arg(long, env, global = true, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    /// Number of single-object retries after a retryable DeleteObjects failure.
    #[arg(long, env, global = true, default_value_t = DEFAULT_FORCE_RETRY_COUNT, help_heading = "Retry")]
    pub force_retry_count: u32,

    /// Interval in ms between force retries.
    #[arg(long, env, global = true, default_value_t = DEFAULT_FORCE_RETRY_INTERVAL_MILLISECONDS, help_heading = "Retry")]
    pub force_retry_interval_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Overall operation timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    /// AWS config file path.
    #[arg(long, env, global = true, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    /// AWS shared credentials file path.
    #[arg(long, env, global = true, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    /// AWS profile for the target. If not set, uses the default profile.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_profile: Option<String>,

    /// AWS access key ID for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_access_key: Option<String>,

    /// AWS secret access key for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_secret_key: Option<String>,

    /// AWS session token for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_session_token: Option<String>,

    /// AWS region for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_region: Option<String>,

    /// Custom S3-compatible endpoint URL (e.g. MinIO). Must be http:// or https://.
    #[arg(long, env, global = true, value_parser = value_parser::url::check_endpoint_url, help_heading = "AWS")]
    pub target_endpoint_url: Option<String>,

    /// Force path-style access (required for most S3-compatible services).
    #[arg(long, env, global = true, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub target_force_path_style: bool,

    /// Enable S3 Transfer Acceleration.
    #[arg(long, env, global = true, default_value_t = DEFAULT_ACCELERATE, help_heading = "AWS")]
    pub target_accelerate: bool,

    /// Enable requester-pays for the target bucket.
    #[arg(long, env, global = true, default_value_t = DEFAULT_REQUEST_PAYER, help_heading = "AWS")]
    pub target_request_payer: bool,

    /// Disable stalled stream protection.
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Treat warnings as errors (exit code 1 instead of 3).
    #[arg(long, env, global = true, default_value_t = DEFAULT_WARN_AS_ERROR, help_heading = "Advanced")]
    pub warn_as_error: bool,

    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// List objects together with their legal hold and retention settings.
    Ls(ListArgs),
    /// Delete an object, or every object under a prefix.
    Rm(RemoveArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    /// S3 target path: s3://<BUCKET_NAME>[/prefix]
    #[arg(value_parser = check_s3_target)]
    pub target: String,

    /// List every object under the prefix instead of one level.
    #[arg(long, short)]
    pub recursive: bool,

    /// List all object versions and delete markers.
    #[arg(long)]
    pub with_versions: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RemoveArgs {
    /// S3 target path: s3://<BUCKET_NAME>/<key or prefix>
    #[arg(value_parser = check_s3_target)]
    pub target: String,

    /// Delete every object under the prefix.
    #[arg(long, short)]
    pub recursive: bool,

    /// Delete this version of the object. Ignored with --recursive.
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub version_id: Option<String>,

    /// Delete objects protected by governance mode retention.
    #[arg(long, env, default_value_t = DEFAULT_BYPASS_GOVERNANCE_RETENTION,
        long_help = r#"Delete objects protected by governance mode retention.
Requires the s3:BypassGovernanceRetention permission."#)]
    pub bypass_governance_retention: bool,
}

/// The operation selected on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    List(ListObjectsRequest),
    Remove {
        bucket: String,
        path: String,
        version_id: Option<String>,
        recursive: bool,
    },
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use s3objects_rs::config::args::{Command, parse_from_args};
///
/// let args = vec!["s3objects", "ls", "s3://my-bucket/prefix/", "--recursive"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(matches!(cli_args.command, Some(Command::Ls(ref ls)) if ls.recursive));
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.command.is_none() && self.auto_complete_shell.is_none() {
            return Err(ERROR_MESSAGE_MISSING_COMMAND.to_string());
        }
        if self.batch_size == 0 {
            return Err(ERROR_MESSAGE_BATCH_SIZE_ZERO.to_string());
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE.to_string());
        }
        if self.object_listing_queue_size == 0 {
            return Err(ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO.to_string());
        }
        if self.listing_timeout_milliseconds == 0 {
            return Err(ERROR_MESSAGE_LISTING_TIMEOUT_ZERO.to_string());
        }
        if let Some(Command::Rm(rm)) = &self.command {
            let (_, path) = split_s3_target(&rm.target)?;
            if path.is_empty() && !rm.recursive {
                return Err(ERROR_MESSAGE_MISSING_OBJECT_KEY.to_string());
            }
        }
        Ok(())
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.target_profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.target_access_key {
            let secret_key = self.target_secret_key.clone().unwrap_or_default();
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: secret_key,
                    session_token: self.target_session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        let request_payer = if self.target_request_payer {
            Some(RequestPayer::Requester)
        } else {
            None
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.target_region.clone(),
            endpoint_url: self.target_endpoint_url.clone(),
            force_path_style: self.target_force_path_style,
            accelerate: self.target_accelerate,
            request_payer,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }

    fn bypass_governance_retention(&self) -> bool {
        matches!(&self.command, Some(Command::Rm(rm)) if rm.bypass_governance_retention)
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        Ok(Config {
            client_config: Some(args.build_client_config()),
            force_retry_config: ForceRetryConfig {
                force_retry_count: args.force_retry_count,
                force_retry_interval_milliseconds: args.force_retry_interval_milliseconds,
            },
            tracing_config: args.build_tracing_config(),
            listing_timeout_milliseconds: args.listing_timeout_milliseconds,
            object_listing_queue_size: args.object_listing_queue_size,
            max_keys: args.max_keys,
            batch_size: args.batch_size,
            rate_limit_api_calls: args.rate_limit_api_calls,
            bypass_governance_retention: args.bypass_governance_retention(),
            warn_as_error: args.warn_as_error,
            auto_complete_shell: args.auto_complete_shell,
        })
    }
}

impl TryFrom<&CLIArgs> for Operation {
    type Error = String;

    fn try_from(args: &CLIArgs) -> Result<Self, Self::Error> {
        match &args.command {
            Some(Command::Ls(ls)) => {
                let (bucket_name, prefix) = split_s3_target(&ls.target)?;
                Ok(Operation::List(ListObjectsRequest {
                    bucket_name,
                    prefix: Some(prefix).filter(|p| !p.is_empty()),
                    recursive: ls.recursive,
                    with_versions: ls.with_versions,
                }))
            }
            Some(Command::Rm(rm)) => {
                let (bucket, path) = split_s3_target(&rm.target)?;
                Ok(Operation::Remove {
                    bucket,
                    path,
                    version_id: rm.version_id.clone(),
                    recursive: rm.recursive,
                })
            }
            None => Err(ERROR_MESSAGE_MISSING_COMMAND.to_string()),
        }
    }
}
