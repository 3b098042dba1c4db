//! Listing enrichment.
//!
//! Streams a raw bucket listing through [`ObjectEnricher`], which attaches
//! legal hold and retention metadata to every entry that is not a delete
//! marker. Metadata lookups are best effort; a failing listing fails the
//! whole request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::lister::ObjectLister;
use crate::stage::{SendResult, Stage};
use crate::storage::Storage;
use crate::types::error::{S3ObjectsError, is_legal_hold_inapplicable, is_retention_inapplicable};
use crate::types::token::create_pipeline_cancellation_token;
use crate::types::{
    ListObjectsOptions, ListObjectsRequest, ListObjectsResponse, ObjectEntry, ObjectRetention,
    RawObjectEntry,
};

/// Pipeline stage that turns raw listing entries into [`ObjectEntry`]s.
///
/// The first `Err` item read from the listing is forwarded downstream and
/// ends the stage.
pub struct ObjectEnricher {
    base: Stage<Result<RawObjectEntry>, Result<ObjectEntry>>,
    bucket: String,
    has_warning: Arc<AtomicBool>,
}

impl ObjectEnricher {
    pub fn new(
        base: Stage<Result<RawObjectEntry>, Result<ObjectEntry>>,
        bucket: &str,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        Self {
            base,
            bucket: bucket.to_string(),
            has_warning,
        }
    }

    pub async fn enrich(&self) -> Result<()> {
        debug!(bucket = self.bucket, "enricher has started.");

        let receiver = self.base.receiver()?;
        loop {
            tokio::select! {
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(Ok(raw)) => {
                            let entry = self.enrich_entry(raw).await;
                            if self.base.send(Ok(entry)).await? == SendResult::Closed {
                                return Ok(());
                            }
                        }
                        Ok(Err(e)) => {
                            self.base.send(Err(e)).await?;
                            receiver.close();
                            return Ok(());
                        }
                        Err(_) => {
                            debug!(bucket = self.bucket, "enricher has been completed.");
                            return Ok(());
                        }
                    }
                },
                _ = self.base.cancellation_token.cancelled() => {
                    debug!(bucket = self.bucket, "enricher has been cancelled.");
                    receiver.close();
                    return Ok(());
                }
            }
        }
    }

    /// Copy the base fields of `raw` and attach object lock metadata.
    ///
    /// Delete markers are never queried.
    pub async fn enrich_entry(&self, raw: RawObjectEntry) -> ObjectEntry {
        let version_id = raw.version_id.clone();
        let is_delete_marker = raw.is_delete_marker;
        let mut entry = ObjectEntry::from(raw);

        if is_delete_marker {
            return entry;
        }

        match self
            .base
            .target
            .get_object_legal_hold(&self.bucket, &entry.name, version_id.as_deref())
            .await
        {
            Ok(status) => entry.legal_hold_status = status,
            Err(e) if is_legal_hold_inapplicable(&e) => {}
            Err(e) => {
                warn!(
                    bucket = self.bucket,
                    key = entry.name,
                    version_id = version_id,
                    error = format!("{e:#}"),
                    "failed to get legal hold status."
                );
                self.set_warning();
            }
        }

        match self
            .base
            .target
            .get_object_retention(&self.bucket, &entry.name, version_id.as_deref())
            .await
        {
            Ok(Some(ObjectRetention {
                mode: Some(mode),
                retain_until: Some(retain_until),
            })) => {
                entry.retention_mode = Some(mode);
                entry.retention_until = Some(retain_until);
            }
            Ok(_) => {}
            Err(e) if is_retention_inapplicable(&e) => {}
            Err(e) => {
                warn!(
                    bucket = self.bucket,
                    key = entry.name,
                    version_id = version_id,
                    error = format!("{e:#}"),
                    "failed to get retention."
                );
                self.set_warning();
            }
        }

        entry
    }

    fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}

/// List the objects of `request.bucket_name` with legal hold and retention
/// metadata.
///
/// The call is bounded by `config.listing_timeout_milliseconds`.
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use s3objects_rs::{Config, ListObjectsRequest, create_pipeline_cancellation_token};
/// use s3objects_rs::storage::create_storage;
///
/// let config = Config::for_endpoint("http://localhost:9000", "us-east-1");
/// let storage = create_storage(config.clone(), create_pipeline_cancellation_token()).await;
/// let request = ListObjectsRequest {
///     bucket_name: "my-bucket".to_string(),
///     prefix: Some("logs/".to_string()),
///     recursive: true,
///     with_versions: false,
/// };
/// let response = s3objects_rs::list_bucket_objects(storage, &config, &request).await?;
/// println!("{} objects", response.total);
/// # Ok(())
/// # }
/// ```
pub async fn list_bucket_objects(
    storage: Storage,
    config: &Config,
    request: &ListObjectsRequest,
) -> Result<ListObjectsResponse> {
    list_and_enrich(storage, config, request, Arc::new(AtomicBool::new(false))).await
}

/// Same as [`list_bucket_objects`], setting `has_warning` when a metadata
/// lookup failed.
pub async fn list_and_enrich(
    storage: Storage,
    config: &Config,
    request: &ListObjectsRequest,
    has_warning: Arc<AtomicBool>,
) -> Result<ListObjectsResponse> {
    if request.bucket_name.is_empty() {
        return Err(anyhow!(S3ObjectsError::MalformedRequest(
            "bucket name is required".to_string()
        )));
    }

    let bucket = request.bucket_name.clone();
    let options = ListObjectsOptions {
        prefix: request.prefix.clone().unwrap_or_default(),
        recursive: request.recursive,
        with_versions: request.with_versions,
    };
    let queue_size = (config.object_listing_queue_size as usize).max(1);
    let cancellation_token = create_pipeline_cancellation_token();

    let (raw_sender, raw_receiver) = async_channel::bounded(queue_size);
    let (entry_sender, entry_receiver) = async_channel::bounded(queue_size);

    ObjectLister::new(Stage::new(
        config.clone(),
        dyn_clone::clone_box(&*storage),
        None,
        Some(raw_sender),
        cancellation_token.clone(),
    ))
    .spawn_list_bucket(bucket.clone(), options);

    let enricher_error_sender = entry_sender.clone();
    let enricher = ObjectEnricher::new(
        Stage::new(
            config.clone(),
            storage,
            Some(raw_receiver),
            Some(entry_sender),
            cancellation_token.clone(),
        ),
        &bucket,
        has_warning,
    );
    tokio::spawn(async move {
        let join_result = tokio::spawn(async move { enricher.enrich().await }).await;

        let error = match join_result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(e) => {
                error!("enricher task panicked: {}", e);
                anyhow!(S3ObjectsError::Pipeline(format!(
                    "enricher task panicked: {e}"
                )))
            }
        };
        let _ = enricher_error_sender.send(Err(error)).await;
    });

    let collect = async {
        let mut objects = Vec::new();
        while let Ok(item) = entry_receiver.recv().await {
            objects.push(item?);
        }
        Ok::<_, anyhow::Error>(ListObjectsResponse::new(objects))
    };

    let timeout = Duration::from_millis(config.listing_timeout_milliseconds);
    let result = match tokio::time::timeout(timeout, collect).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                bucket = bucket,
                timeout_milliseconds = config.listing_timeout_milliseconds,
                "listing has timed out."
            );
            Err(anyhow!(S3ObjectsError::Timeout(
                config.listing_timeout_milliseconds
            )))
        }
    };

    if result.is_err() {
        cancellation_token.cancel();
        entry_receiver.close();
    }

    result
}
