//! Single-object deletion using the S3 DeleteObject API.
//!
//! Deletes objects one at a time. Used when batch_size is 1.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::storage::Storage;
use crate::types::error::is_insufficient_permission;

use super::{DeleteResult, DeletedKey, Deleter, FailedKey, TargetKey};

/// Deletes objects one at a time using the S3 DeleteObject API.
pub struct SingleDeleter {
    target: Storage,
    bucket: String,
    bypass_governance: bool,
}

impl SingleDeleter {
    pub fn new(target: Storage, bucket: &str, bypass_governance: bool) -> Self {
        Self {
            target,
            bucket: bucket.to_string(),
            bypass_governance,
        }
    }
}

#[async_trait]
impl Deleter for SingleDeleter {
    async fn delete(&self, objects: &[TargetKey], _config: &Config) -> Result<DeleteResult> {
        let mut result = DeleteResult::default();

        for object in objects {
            let key = object.key.as_str();
            let version_id = object.version_id.clone();

            debug!(
                bucket = self.bucket,
                key = key,
                version_id = version_id,
                "sending DeleteObject request."
            );

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
                Ok(_) => {
                    debug!(key = key, "DeleteObject succeeded.");
                    result.deleted.push(DeletedKey {
                        key: key.to_string(),
                        version_id,
                    });
                }
                Err(e) => {
                    if !is_insufficient_permission(&e) {
                        warn!(
                            key = key,
                            version_id = version_id,
                            error = %e,
                            "S3 DeleteObject API call failed for key '{}'.",
                            key,
                        );
                    }
                    result.failed.push(FailedKey {
                        key: key.to_string(),
                        version_id,
                        error: e,
                    });
                }
            }
        }

        Ok(result)
    }
}
