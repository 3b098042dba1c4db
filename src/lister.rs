use std::future::Future;

use anyhow::{Result, anyhow};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::stage::{SendResult, Stage};
use crate::types::error::S3ObjectsError;
use crate::types::{DeleteCandidate, ListObjectsOptions, RawObjectEntry, TraversalOptions};

/// First stage of a listing chain.
///
/// A thin wrapper around the `Stage` that delegates to the storage listing
/// operations. It has no `receiver` and writes `Result` items to
/// `stage.sender`: a failure that ends the listing is forwarded downstream
/// as an `Err` item so the consumer decides whether it is fatal.
pub struct ObjectLister<T> {
    stage: Stage<(), Result<T>>,
}

impl<T: Send> ObjectLister<T> {
    pub fn new(stage: Stage<(), Result<T>>) -> Self {
        Self { stage }
    }

    async fn forward_result(&self, result: Result<()>) -> Result<()> {
        if let Err(e) = result {
            debug!(error = format!("{e:#}"), "listing failed, forwarding error.");
            if self.stage.send(Err(e)).await? == SendResult::Closed {
                debug!("listing receiver has been closed.");
            }
        }
        Ok(())
    }
}

impl<T: Send + 'static> ObjectLister<T> {
    /// Run `list` over this lister on its own task.
    ///
    /// Uses the double-spawn pattern to catch panics; a failed or panicked
    /// listing is reported as an `Err` item on the lister's channel.
    fn spawn_with<F, Fut>(self, list: F) -> JoinHandle<()>
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let error_sender = self.stage.sender.clone();

        tokio::spawn(async move {
            let join_result = tokio::spawn(list(self)).await;

            let error = match join_result {
                Ok(Ok(())) => {
                    debug!("object lister completed successfully.");
                    return;
                }
                Ok(Err(e)) => {
                    error!("object lister failed: {}", e);
                    e
                }
                Err(e) => {
                    error!("object lister task panicked: {}", e);
                    anyhow!(S3ObjectsError::Pipeline(format!(
                        "object lister task panicked: {e}"
                    )))
                }
            };
            if let Some(sender) = error_sender {
                let _ = sender.send(Err(error)).await;
            }
        })
    }
}

impl ObjectLister<RawObjectEntry> {
    /// Spawn [`Self::list_bucket`].
    pub fn spawn_list_bucket(self, bucket: String, options: ListObjectsOptions) -> JoinHandle<()> {
        self.spawn_with(move |lister| async move { lister.list_bucket(&bucket, &options).await })
    }

    /// List objects (or versions) of `bucket` for the listing enricher.
    pub async fn list_bucket(&self, bucket: &str, options: &ListObjectsOptions) -> Result<()> {
        debug!(
            bucket = bucket,
            prefix = options.prefix,
            recursive = options.recursive,
            with_versions = options.with_versions,
            "list bucket objects has started."
        );

        let result = self
            .stage
            .target
            .list_objects(bucket, options, self.stage.sender()?)
            .await;
        self.forward_result(result).await?;

        debug!(bucket = bucket, "list bucket objects has been completed.");
        Ok(())
    }
}

impl ObjectLister<DeleteCandidate> {
    /// Spawn [`Self::list_for_delete`].
    pub fn spawn_list_for_delete(
        self,
        bucket: String,
        prefix: String,
        options: TraversalOptions,
    ) -> JoinHandle<()> {
        self.spawn_with(move |lister| async move {
            lister.list_for_delete(&bucket, &prefix, &options).await
        })
    }

    /// List deletion candidates under `prefix` for the deletion pipeline.
    pub async fn list_for_delete(
        &self,
        bucket: &str,
        prefix: &str,
        options: &TraversalOptions,
    ) -> Result<()> {
        debug!(
            bucket = bucket,
            prefix = prefix,
            recursive = options.recursive,
            "list delete candidates has started."
        );

        let result = self
            .stage
            .target
            .list_for_delete(bucket, prefix, options, self.stage.sender()?)
            .await;
        self.forward_result(result).await?;

        debug!(bucket = bucket, "list delete candidates has been completed.");
        Ok(())
    }
}
