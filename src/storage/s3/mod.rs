pub mod client_builder;

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::delete_object::DeleteObjectOutput;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::types::{Delete, ObjectIdentifier, RequestPayer};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::{DateTime, Utc};
use leaky_bucket::RateLimiter;
use std::sync::Arc;

use crate::config::{ClientConfig, Config};
use crate::deleter::spawn_remover;
use crate::storage::{Storage, StorageFactory, StorageTrait};
use crate::types::error::S3ObjectsError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{
    DeleteCandidate, DeleteOutcome, ListObjectsOptions, ObjectRetention, RawObjectEntry,
    RemoveOptions, ShowDir, TraversalOptions,
};

const DELIMITER: &str = "/";

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors, returns the S3 error code (e.g. "AccessDenied") and
/// the message from the response. For other errors (network, timeout,
/// construction failure), returns "N/A" and the full error description.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

pub struct S3StorageFactory;

#[async_trait]
impl StorageFactory for S3StorageFactory {
    async fn create(
        config: Config,
        cancellation_token: PipelineCancellationToken,
        client_config: Option<ClientConfig>,
        rate_limit_api_calls: Option<Arc<RateLimiter>>,
    ) -> Storage {
        let client = if let Some(ref client_config) = client_config {
            Some(Arc::new(client_config.create_client().await))
        } else {
            None
        };

        let request_payer = client_config.and_then(|c| c.request_payer);

        Box::new(S3Storage {
            config,
            cancellation_token,
            client,
            request_payer,
            rate_limit_api_calls,
        })
    }
}

#[derive(Clone)]
struct S3Storage {
    config: Config,
    cancellation_token: PipelineCancellationToken,
    client: Option<Arc<Client>>,
    request_payer: Option<RequestPayer>,
    rate_limit_api_calls: Option<Arc<RateLimiter>>,
}

#[async_trait]
impl StorageTrait for S3Storage {
    async fn list_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        sender: &Sender<Result<RawObjectEntry>>,
    ) -> Result<()> {
        if options.with_versions {
            self.list_object_versions(bucket, options, sender).await
        } else {
            self.list_current_objects(bucket, options, sender).await
        }
    }

    async fn get_object_legal_hold(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<String>> {
        self.exec_rate_limit_api_calls().await;

        let output = self
            .client()?
            .get_object_legal_hold()
            .set_request_payer(self.request_payer.clone())
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(String::from))
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                anyhow!(S3ObjectsError::from_legal_hold_code(
                    &s3_error_code,
                    &s3_error_message
                ))
                .context("aws_sdk_s3::client::get_object_legal_hold() failed.")
            })?;

        Ok(output
            .legal_hold()
            .and_then(|legal_hold| legal_hold.status())
            .map(|status| status.as_str().to_string()))
    }

    async fn get_object_retention(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<ObjectRetention>> {
        self.exec_rate_limit_api_calls().await;

        let output = self
            .client()?
            .get_object_retention()
            .set_request_payer(self.request_payer.clone())
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(String::from))
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                anyhow!(S3ObjectsError::from_retention_code(
                    &s3_error_code,
                    &s3_error_message
                ))
                .context("aws_sdk_s3::client::get_object_retention() failed.")
            })?;

        Ok(output.retention().map(|retention| ObjectRetention {
            mode: retention.mode().map(|mode| mode.as_str().to_string()),
            retain_until: retention.retain_until_date().and_then(to_chrono),
        }))
    }

    async fn list_for_delete(
        &self,
        bucket: &str,
        prefix: &str,
        options: &TraversalOptions,
        sender: &Sender<Result<DeleteCandidate>>,
    ) -> Result<()> {
        let delimiter = (!options.recursive).then(|| DELIMITER.to_string());
        let mut directories = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            if self.cancellation_token.is_cancelled() {
                tracing::info!("Listing cancelled");
                return Ok(());
            }

            self.exec_rate_limit_api_calls().await;

            let output = self
                .client()?
                .list_objects_v2()
                .set_request_payer(self.request_payer.clone())
                .bucket(bucket)
                .prefix(prefix)
                .set_delimiter(delimiter.clone())
                .set_continuation_token(continuation_token.clone())
                .max_keys(self.config.max_keys)
                .send()
                .await
                .map_err(|e| self.listing_error(e, bucket, prefix, "ListObjectsV2"))?;

            let page_directories = output
                .common_prefixes()
                .iter()
                .filter_map(|common_prefix| common_prefix.prefix())
                .map(|dir| DeleteCandidate::from_key(bucket, dir, None));
            let page_objects = output
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .map(|key| DeleteCandidate::from_key(bucket, key, None));

            let candidates = order_page_candidates(
                options.show_dir,
                page_directories,
                page_objects,
                &mut directories,
            );

            for candidate in candidates {
                if !self.send_or_stop(sender, candidate).await? {
                    return Ok(());
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        for directory in directories {
            if !self.send_or_stop(sender, directory).await? {
                return Ok(());
            }
        }

        if options.include_incomplete {
            self.list_incomplete_uploads(bucket, prefix, sender).await?;
        }

        Ok(())
    }

    fn remove(
        &self,
        bucket: &str,
        options: RemoveOptions,
        candidates: Receiver<DeleteCandidate>,
    ) -> Receiver<DeleteOutcome> {
        spawn_remover(
            Box::new(self.clone()),
            self.config.clone(),
            self.cancellation_token.clone(),
            bucket,
            options,
            candidates,
        )
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<String>,
        bypass_governance: bool,
    ) -> Result<DeleteObjectOutput> {
        self.exec_rate_limit_api_calls().await;

        self.client()?
            .delete_object()
            .set_request_payer(self.request_payer.clone())
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.clone())
            .set_bypass_governance_retention(bypass_governance.then_some(true))
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::warn!(
                    bucket = bucket,
                    key = key,
                    version_id = version_id,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObject API call failed for s3://{}/{}: {} ({}).",
                    bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(S3ObjectsError::from_removal_code(
                    &s3_error_code,
                    &format!("{bucket}/{key}"),
                    &s3_error_message,
                ))
                .context("aws_sdk_s3::client::delete_object() failed.")
            })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
        bypass_governance: bool,
    ) -> Result<DeleteObjectsOutput> {
        self.exec_rate_limit_api_calls_n(objects.len()).await;

        let object_count = objects.len();

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(false)
            .build()
            .context("Failed to build Delete request")?;

        self.client()?
            .delete_objects()
            .set_request_payer(self.request_payer.clone())
            .bucket(bucket)
            .delete(delete)
            .set_bypass_governance_retention(bypass_governance.then_some(true))
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    object_count = object_count,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObjects API call failed for {} objects in s3://{}: {} ({}).",
                    object_count,
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(S3ObjectsError::from_removal_code(
                    &s3_error_code,
                    bucket,
                    &s3_error_message,
                ))
                .context("aws_sdk_s3::client::delete_objects() failed.")
            })
    }

    async fn abort_incomplete_uploads(&self, bucket: &str, key: &str) -> Result<()> {
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            self.exec_rate_limit_api_calls().await;

            let output = self
                .client()?
                .list_multipart_uploads()
                .set_request_payer(self.request_payer.clone())
                .bucket(bucket)
                .prefix(key)
                .set_key_marker(key_marker.clone())
                .set_upload_id_marker(upload_id_marker.clone())
                .send()
                .await
                .map_err(|e| self.listing_error(e, bucket, key, "ListMultipartUploads"))?;

            for upload in output.uploads() {
                if upload.key() != Some(key) {
                    continue;
                }
                let Some(upload_id) = upload.upload_id() else {
                    continue;
                };

                self.exec_rate_limit_api_calls().await;

                self.client()?
                    .abort_multipart_upload()
                    .set_request_payer(self.request_payer.clone())
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                    .map_err(|e| {
                        let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                        tracing::warn!(
                            bucket = bucket,
                            key = key,
                            upload_id = upload_id,
                            s3_error_code = s3_error_code,
                            s3_error_message = s3_error_message,
                            "S3 AbortMultipartUpload API call failed for s3://{}/{}: {} ({}).",
                            bucket,
                            key,
                            s3_error_code,
                            s3_error_message,
                        );
                        anyhow!(S3ObjectsError::from_removal_code(
                            &s3_error_code,
                            &format!("{bucket}/{key}"),
                            &s3_error_message,
                        ))
                        .context("aws_sdk_s3::client::abort_multipart_upload() failed.")
                    })?;

                tracing::debug!(
                    bucket = bucket,
                    key = key,
                    upload_id = upload_id,
                    "incomplete upload aborted."
                );
            }

            if output.is_truncated() == Some(true) {
                key_marker = output.next_key_marker().map(String::from);
                upload_id_marker = output.next_upload_id_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.exec_rate_limit_api_calls().await;

        self.client()?
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteBucket API call failed for bucket '{}': {} ({}).",
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!(S3ObjectsError::from_removal_code(
                    &s3_error_code,
                    bucket,
                    &s3_error_message,
                ))
                .context("aws_sdk_s3::client::delete_bucket() failed.")
            })?;

        Ok(())
    }
}

impl S3Storage {
    fn client(&self) -> Result<&Client> {
        self.client.as_deref().ok_or_else(|| {
            anyhow!(S3ObjectsError::InvalidConfig(
                "no S3 client has been configured.".to_string()
            ))
        })
    }

    async fn exec_rate_limit_api_calls(&self) {
        if let Some(ref rate_limiter) = self.rate_limit_api_calls {
            rate_limiter.acquire_one().await;
        }
    }

    /// Acquires `count` tokens for requests that act on several objects.
    async fn exec_rate_limit_api_calls_n(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(ref rate_limiter) = self.rate_limit_api_calls {
            rate_limiter.acquire(count).await;
        }
    }

    fn listing_error<E: std::fmt::Display + ProvideErrorMetadata>(
        &self,
        e: SdkError<E>,
        bucket: &str,
        prefix: &str,
        api: &str,
    ) -> anyhow::Error {
        let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
        tracing::error!(
            bucket = bucket,
            prefix = prefix,
            s3_error_code = s3_error_code,
            s3_error_message = s3_error_message,
            "S3 {} API call failed for s3://{}/{}: {} ({}).",
            api,
            bucket,
            prefix,
            s3_error_code,
            s3_error_message,
        );
        anyhow!(S3ObjectsError::from_listing_code(
            &s3_error_code,
            &format!("{bucket}/{prefix}"),
            &s3_error_message,
        ))
        .context(format!("aws_sdk_s3::client::{api} failed."))
    }

    /// Returns `Ok(false)` when listing should stop because the receiver is
    /// gone or the pipeline has been cancelled.
    async fn send_or_stop<T>(&self, sender: &Sender<Result<T>>, item: T) -> Result<bool> {
        if self.cancellation_token.is_cancelled() {
            return Ok(false);
        }

        if let Err(e) = sender
            .send(Ok(item))
            .await
            .map_err(|_| anyhow!("async_channel::Sender::send() failed."))
        {
            return if !sender.is_closed() { Err(e) } else { Ok(false) };
        }

        Ok(true)
    }

    async fn list_current_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        sender: &Sender<Result<RawObjectEntry>>,
    ) -> Result<()> {
        let delimiter = (!options.recursive).then(|| DELIMITER.to_string());
        let mut continuation_token: Option<String> = None;

        loop {
            if self.cancellation_token.is_cancelled() {
                tracing::info!("Listing cancelled");
                break;
            }

            self.exec_rate_limit_api_calls().await;

            let output = self
                .client()?
                .list_objects_v2()
                .set_request_payer(self.request_payer.clone())
                .bucket(bucket)
                .prefix(&options.prefix)
                .set_delimiter(delimiter.clone())
                .set_continuation_token(continuation_token.clone())
                .max_keys(self.config.max_keys)
                .send()
                .await
                .map_err(|e| self.listing_error(e, bucket, &options.prefix, "ListObjectsV2"))?;

            let directories = output
                .common_prefixes()
                .iter()
                .filter_map(|common_prefix| common_prefix.prefix())
                .map(|dir| RawObjectEntry {
                    key: dir.to_string(),
                    ..RawObjectEntry::default()
                });

            let objects = output.contents().iter().map(|object| RawObjectEntry {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().unwrap_or_default(),
                last_modified: object.last_modified().and_then(to_chrono),
                ..RawObjectEntry::default()
            });

            for entry in directories.chain(objects) {
                if !self.send_or_stop(sender, entry).await? {
                    return Ok(());
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(())
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        sender: &Sender<Result<RawObjectEntry>>,
    ) -> Result<()> {
        let delimiter = (!options.recursive).then(|| DELIMITER.to_string());
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            if self.cancellation_token.is_cancelled() {
                tracing::info!("Version listing cancelled");
                break;
            }

            self.exec_rate_limit_api_calls().await;

            let output = self
                .client()?
                .list_object_versions()
                .set_request_payer(self.request_payer.clone())
                .bucket(bucket)
                .prefix(&options.prefix)
                .set_delimiter(delimiter.clone())
                .set_key_marker(key_marker.clone())
                .set_version_id_marker(version_id_marker.clone())
                .max_keys(self.config.max_keys)
                .send()
                .await
                .map_err(|e| {
                    self.listing_error(e, bucket, &options.prefix, "ListObjectVersions")
                })?;

            let directories = output
                .common_prefixes()
                .iter()
                .filter_map(|common_prefix| common_prefix.prefix())
                .map(|dir| RawObjectEntry {
                    key: dir.to_string(),
                    ..RawObjectEntry::default()
                });

            let versions = output.versions().iter().map(|version| RawObjectEntry {
                key: version.key().unwrap_or_default().to_string(),
                size: version.size().unwrap_or_default(),
                last_modified: version.last_modified().and_then(to_chrono),
                version_id: version.version_id().map(String::from),
                is_latest: version.is_latest().unwrap_or(false),
                ..RawObjectEntry::default()
            });

            let delete_markers = output.delete_markers().iter().map(|marker| RawObjectEntry {
                key: marker.key().unwrap_or_default().to_string(),
                last_modified: marker.last_modified().and_then(to_chrono),
                version_id: marker.version_id().map(String::from),
                is_latest: marker.is_latest().unwrap_or(false),
                is_delete_marker: true,
                ..RawObjectEntry::default()
            });

            for entry in directories.chain(versions).chain(delete_markers) {
                if !self.send_or_stop(sender, entry).await? {
                    return Ok(());
                }
            }

            if output.is_truncated() == Some(true) {
                key_marker = output.next_key_marker().map(String::from);
                version_id_marker = output.next_version_id_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(())
    }

    async fn list_incomplete_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        sender: &Sender<Result<DeleteCandidate>>,
    ) -> Result<()> {
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            if self.cancellation_token.is_cancelled() {
                return Ok(());
            }

            self.exec_rate_limit_api_calls().await;

            let output = self
                .client()?
                .list_multipart_uploads()
                .set_request_payer(self.request_payer.clone())
                .bucket(bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.clone())
                .set_upload_id_marker(upload_id_marker.clone())
                .send()
                .await
                .map_err(|e| self.listing_error(e, bucket, prefix, "ListMultipartUploads"))?;

            for key in output.uploads().iter().filter_map(|upload| upload.key()) {
                let candidate = DeleteCandidate::from_key(bucket, key, None);
                if !self.send_or_stop(sender, candidate).await? {
                    return Ok(());
                }
            }

            if output.is_truncated() == Some(true) {
                key_marker = output.next_key_marker().map(String::from);
                upload_id_marker = output.next_upload_id_marker().map(String::from);
            } else {
                break;
            }
        }

        Ok(())
    }
}

fn to_chrono(date_time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    date_time.to_chrono_utc().ok()
}

/// Order one listing page according to `show_dir`.
///
/// Directories reported last are moved into `trailing`, to be sent after
/// the whole listing.
fn order_page_candidates(
    show_dir: ShowDir,
    directories: impl IntoIterator<Item = DeleteCandidate>,
    objects: impl IntoIterator<Item = DeleteCandidate>,
    trailing: &mut Vec<DeleteCandidate>,
) -> Vec<DeleteCandidate> {
    let mut candidates = Vec::new();
    match show_dir {
        ShowDir::None => {}
        ShowDir::First => candidates.extend(directories),
        ShowDir::Last => trailing.extend(directories),
    }
    candidates.extend(objects);
    candidates
}
