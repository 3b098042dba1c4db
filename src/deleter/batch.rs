//! Batch deletion using the S3 DeleteObjects API.
//!
//! Groups objects into batches of up to 1000 and calls the S3 batch
//! delete API for high-throughput deletion.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::types::ObjectIdentifier;
use tracing::{debug, warn};

use crate::config::Config;
use crate::storage::Storage;
use crate::types::error::{S3ObjectsError, is_insufficient_permission};

use super::{DeleteResult, DeletedKey, Deleter, FailedKey, TargetKey};

/// Maximum objects per batch DeleteObjects API call (S3 limit).
pub const MAX_BATCH_SIZE: usize = 1000;

/// Determines whether an S3 batch deletion error code is retryable.
///
/// Retryable errors are transient server-side issues that may succeed
/// on a subsequent attempt. `AccessDenied` or `NoSuchBucket` are permanent
/// and are not retried.
pub(crate) fn is_retryable_error_code(code: &str) -> bool {
    matches!(
        code,
        "InternalError" | "SlowDown" | "ServiceUnavailable" | "RequestTimeout"
    )
}

/// Deletes objects in batches using the S3 DeleteObjects API.
///
/// Partial failures are classified per key. Keys that failed with a
/// retryable code are retried one at a time with DeleteObject, up to
/// `force_retry_count` additional attempts.
pub struct BatchDeleter {
    target: Storage,
    bucket: String,
    bypass_governance: bool,
}

impl BatchDeleter {
    pub fn new(target: Storage, bucket: &str, bypass_governance: bool) -> Self {
        Self {
            target,
            bucket: bucket.to_string(),
            bypass_governance,
        }
    }

    async fn delete_single_with_retry(
        &self,
        key: &str,
        version_id: Option<String>,
        config: &Config,
    ) -> Result<()> {
        let force_retry_count = config.force_retry_config.force_retry_count;
        let force_retry_interval = config.force_retry_config.force_retry_interval_milliseconds;

        let mut last_error = anyhow!(S3ObjectsError::Pipeline(format!(
            "no delete attempt was made for '{key}'"
        )));

        for attempt in 0..=force_retry_count {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(force_retry_interval)).await;
            }

            match self
                .target
                .delete_object(
                    &self.bucket,
                    key,
                    version_id.clone(),
                    self.bypass_governance,
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        key = key,
                        version_id = version_id,
                        attempt = attempt + 1,
                        max_attempts = force_retry_count + 1,
                        error = %e,
                        "S3 DeleteObject fallback attempt {}/{} failed for key '{}'.",
                        attempt + 1, force_retry_count + 1, key,
                    );
                    // Retrying a permission failure will not change its result.
                    if is_insufficient_permission(&e) {
                        return Err(e);
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl Deleter for BatchDeleter {
    async fn delete(&self, objects: &[TargetKey], config: &Config) -> Result<DeleteResult> {
        let mut result = DeleteResult::default();

        if objects.is_empty() {
            return Ok(result);
        }

        let batch_size = (config.batch_size as usize).clamp(1, MAX_BATCH_SIZE);

        for chunk in objects.chunks(batch_size) {
            let identifiers = chunk
                .iter()
                .map(|object| {
                    ObjectIdentifier::builder()
                        .key(&object.key)
                        .set_version_id(object.version_id.clone())
                        .build()
                        .context("Failed to build ObjectIdentifier")
                })
                .collect::<Result<Vec<_>>>()?;

            debug!(
                bucket = self.bucket,
                batch_size = identifiers.len(),
                "sending DeleteObjects batch request."
            );

            let response = self
                .target
                .delete_objects(&self.bucket, identifiers, self.bypass_governance)
                .await?;

            for deleted in response.deleted() {
                result.deleted.push(DeletedKey {
                    key: deleted.key().unwrap_or_default().to_string(),
                    version_id: deleted.version_id().map(|v| v.to_string()),
                });
            }

            for err in response.errors() {
                let key = err.key().unwrap_or_default().to_string();
                let version_id = err.version_id().map(|v| v.to_string());
                let code = err.code().unwrap_or("unknown").to_string();
                let message = err.message().unwrap_or("no message").to_string();

                if is_retryable_error_code(&code) {
                    match self
                        .delete_single_with_retry(&key, version_id.clone(), config)
                        .await
                    {
                        Ok(()) => result.deleted.push(DeletedKey { key, version_id }),
                        Err(error) => {
                            warn!(
                                key = key,
                                version_id = version_id,
                                code = code,
                                message = message,
                                "S3 DeleteObject fallback exhausted all {} retries for key '{}': {} ({}).",
                                config.force_retry_config.force_retry_count + 1,
                                key,
                                code,
                                message,
                            );
                            result.failed.push(FailedKey {
                                key,
                                version_id,
                                error,
                            });
                        }
                    }
                    continue;
                }

                let error = S3ObjectsError::from_removal_code(
                    &code,
                    &format!("{}/{}", self.bucket, key),
                    &message,
                );
                if error.is_ignorable() {
                    debug!(
                        key = key,
                        version_id = version_id,
                        code = code,
                        "S3 DeleteObjects denied access to key '{}'.",
                        key,
                    );
                } else {
                    warn!(
                        key = key,
                        version_id = version_id,
                        code = code,
                        message = message,
                        "S3 DeleteObjects partial failure for key '{}': {} ({}).",
                        key,
                        code,
                        message,
                    );
                }

                result.failed.push(FailedKey {
                    key,
                    version_id,
                    error: anyhow!(error),
                });
            }

            debug!(
                deleted = result.deleted.len(),
                failed = result.failed.len(),
                "DeleteObjects batch completed."
            );
        }

        Ok(result)
    }
}
