//! Shared test utilities for the s3objects library crate.
//!
//! Provides the tracing setup, a default test [`Config`] and a scripted
//! [`MockStorage`] used by the stage, enricher, remover and pipeline tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use aws_sdk_s3::operation::delete_object::DeleteObjectOutput;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::types::{DeletedObject, Error as S3Error, ObjectIdentifier};

use crate::config::{Config, ForceRetryConfig};
use crate::deleter::spawn_remover;
use crate::storage::{Storage, StorageTrait};
use crate::types::error::S3ObjectsError;
use crate::types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
use crate::types::{
    DeleteCandidate, DeleteOutcome, ListObjectsOptions, ObjectRetention, RawObjectEntry,
    RemoveOptions, TraversalOptions,
};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a default [`Config`] suitable for most unit tests.
///
/// No S3 client, no force retry interval, `batch_size=1000`.
pub(crate) fn make_test_config() -> Config {
    Config {
        force_retry_config: ForceRetryConfig {
            force_retry_count: 0,
            force_retry_interval_milliseconds: 0,
        },
        ..Config::default()
    }
}

/// Create a plain (non-versioned) raw listing entry.
pub(crate) fn make_raw_entry(key: &str, size: i64) -> RawObjectEntry {
    RawObjectEntry {
        key: key.to_string(),
        size,
        ..RawObjectEntry::default()
    }
}

/// How [`MockStorage::remove`] behaves.
#[derive(Debug, Clone, Default)]
pub(crate) enum RemoverMode {
    /// Run the real `ObjectRemover` against the mock primitives.
    #[default]
    Real,
    /// Stop accepting candidates immediately without reporting anything.
    CloseFeed,
}

/// Scripted responses of a [`MockStorage`].
#[derive(Debug, Clone, Default)]
pub(crate) struct MockScript {
    /// Items sent by `list_objects`, in order.
    pub listing: Vec<Result<RawObjectEntry, S3ObjectsError>>,
    /// Keys (or errors) sent by `list_for_delete`, in order.
    pub delete_listing: Vec<Result<String, S3ObjectsError>>,
    /// Delay before each listed item.
    pub listing_delay: Option<Duration>,
    /// Legal hold per key. Missing keys answer `Ok(None)`.
    pub legal_holds: HashMap<String, Result<Option<String>, S3ObjectsError>>,
    /// Retention per key. Missing keys answer `Ok(None)`.
    pub retentions: HashMap<String, Result<Option<ObjectRetention>, S3ObjectsError>>,
    /// S3 error code returned by DeleteObject and DeleteObjects for a key.
    pub delete_error_codes: HashMap<String, String>,
    /// S3 error code returned only by DeleteObjects for a key.
    pub batch_only_error_codes: HashMap<String, String>,
    /// Whole-request failure of DeleteObjects.
    pub batch_request_error: Option<S3ObjectsError>,
    pub delete_bucket_error: Option<S3ObjectsError>,
    pub remover: RemoverMode,
}

/// Calls recorded by a [`MockStorage`], shared between its clones.
#[derive(Debug, Default)]
pub(crate) struct MockCalls {
    pub list_objects: Vec<ListObjectsOptions>,
    pub list_for_delete: Vec<(String, TraversalOptions)>,
    pub legal_hold_lookups: Vec<String>,
    pub retention_lookups: Vec<String>,
    pub remove_options: Vec<RemoveOptions>,
    pub delete_object_calls: usize,
    pub delete_objects_calls: usize,
    pub bypass_governance: Vec<bool>,
    pub deleted: Vec<(String, Option<String>)>,
    pub aborted_uploads: Vec<String>,
    pub deleted_buckets: Vec<String>,
}

/// A scripted [`StorageTrait`] implementation.
#[derive(Clone)]
pub(crate) struct MockStorage {
    pub script: MockScript,
    pub config: Config,
    pub cancellation_token: PipelineCancellationToken,
    calls: Arc<Mutex<MockCalls>>,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new(MockScript::default())
    }
}

impl MockStorage {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            config: make_test_config(),
            cancellation_token: create_pipeline_cancellation_token(),
            calls: Arc::new(Mutex::new(MockCalls::default())),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn boxed(&self) -> Storage {
        Box::new(self.clone())
    }

    pub fn calls(&self) -> MutexGuard<'_, MockCalls> {
        self.calls.lock().unwrap()
    }

    fn delete_failure(&self, bucket: &str, key: &str) -> Option<anyhow::Error> {
        self.script.delete_error_codes.get(key).map(|code| {
            anyhow!(S3ObjectsError::from_removal_code(
                code,
                &format!("{bucket}/{key}"),
                "scripted failure",
            ))
            .context("aws_sdk_s3::client::delete_object() failed.")
        })
    }

    async fn send_listed<T>(&self, sender: &Sender<Result<T>>, item: Result<T>) -> bool {
        if let Some(delay) = self.script.listing_delay {
            tokio::time::sleep(delay).await;
        }
        sender.send(item).await.is_ok()
    }
}

#[async_trait]
impl StorageTrait for MockStorage {
    async fn list_objects(
        &self,
        _bucket: &str,
        options: &ListObjectsOptions,
        sender: &Sender<Result<RawObjectEntry>>,
    ) -> Result<()> {
        self.calls().list_objects.push(options.clone());

        for item in self.script.listing.clone() {
            if !self.send_listed(sender, item.map_err(|e| anyhow!(e))).await {
                break;
            }
        }
        Ok(())
    }

    async fn get_object_legal_hold(
        &self,
        _bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> Result<Option<String>> {
        self.calls().legal_hold_lookups.push(key.to_string());

        match self.script.legal_holds.get(key) {
            Some(Ok(status)) => Ok(status.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Ok(None),
        }
    }

    async fn get_object_retention(
        &self,
        _bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> Result<Option<ObjectRetention>> {
        self.calls().retention_lookups.push(key.to_string());

        match self.script.retentions.get(key) {
            Some(Ok(retention)) => Ok(retention.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Ok(None),
        }
    }

    async fn list_for_delete(
        &self,
        bucket: &str,
        prefix: &str,
        options: &TraversalOptions,
        sender: &Sender<Result<DeleteCandidate>>,
    ) -> Result<()> {
        self.calls()
            .list_for_delete
            .push((prefix.to_string(), *options));

        for item in self.script.delete_listing.clone() {
            let item = item
                .map(|key| DeleteCandidate::from_key(bucket, &key, None))
                .map_err(|e| anyhow!(e));
            if !self.send_listed(sender, item).await {
                break;
            }
        }
        Ok(())
    }

    fn remove(
        &self,
        bucket: &str,
        options: RemoveOptions,
        candidates: Receiver<DeleteCandidate>,
    ) -> Receiver<DeleteOutcome> {
        self.calls().remove_options.push(options);

        match self.script.remover {
            RemoverMode::Real => spawn_remover(
                self.boxed(),
                self.config.clone(),
                self.cancellation_token.clone(),
                bucket,
                options,
                candidates,
            ),
            RemoverMode::CloseFeed => {
                candidates.close();
                let (sender, outcomes) = async_channel::unbounded();
                sender.close();
                outcomes
            }
        }
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<String>,
        bypass_governance: bool,
    ) -> Result<DeleteObjectOutput> {
        let mut calls = self.calls();
        calls.delete_object_calls += 1;
        calls.bypass_governance.push(bypass_governance);

        if let Some(e) = self.delete_failure(bucket, key) {
            return Err(e);
        }

        calls.deleted.push((key.to_string(), version_id));
        Ok(DeleteObjectOutput::builder().build())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
        bypass_governance: bool,
    ) -> Result<DeleteObjectsOutput> {
        let mut calls = self.calls();
        calls.delete_objects_calls += 1;
        calls.bypass_governance.push(bypass_governance);

        if let Some(e) = &self.script.batch_request_error {
            return Err(anyhow!(e.clone()).context(format!(
                "aws_sdk_s3::client::delete_objects() failed for {bucket}."
            )));
        }

        let mut builder = DeleteObjectsOutput::builder();
        for object in objects {
            let key = object.key();
            let code = self
                .script
                .delete_error_codes
                .get(key)
                .or_else(|| self.script.batch_only_error_codes.get(key));

            match code {
                Some(code) => {
                    builder = builder.errors(
                        S3Error::builder()
                            .key(key)
                            .set_version_id(object.version_id().map(String::from))
                            .code(code)
                            .message("scripted failure")
                            .build(),
                    );
                }
                None => {
                    calls
                        .deleted
                        .push((key.to_string(), object.version_id().map(String::from)));
                    builder = builder.deleted(
                        DeletedObject::builder()
                            .key(key)
                            .set_version_id(object.version_id().map(String::from))
                            .build(),
                    );
                }
            }
        }

        Ok(builder.build())
    }

    async fn abort_incomplete_uploads(&self, _bucket: &str, key: &str) -> Result<()> {
        self.calls().aborted_uploads.push(key.to_string());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        if let Some(e) = &self.script.delete_bucket_error {
            return Err(anyhow!(e.clone()));
        }
        self.calls().deleted_buckets.push(bucket.to_string());
        Ok(())
    }
}
