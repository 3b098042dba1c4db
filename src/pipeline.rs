//! Deletion pipeline orchestrator.
//!
//! Deletes a single object, or everything under a prefix. Recursive deletion
//! streams listed candidates into the storage's removal sink through a
//! capacity-1 feed while concurrently reading the sink's outcome stream, so
//! that a failing sink is noticed while the producer is blocked on a hand-off.
//!
//! ```text
//! ObjectLister -> producer loop -> feed (1) -> removal sink -> outcomes -> drain
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::lister::ObjectLister;
use crate::location::resolve;
use crate::stage::Stage;
use crate::storage::{self, Storage};
use crate::types::error::{S3ObjectsError, is_insufficient_permission};
use crate::types::token::PipelineCancellationToken;
use crate::types::{DeleteCandidate, DeleteOutcome, RemoveOptions, ShowDir, TraversalOptions};

/// How the producer loop of a recursive deletion ended.
#[derive(Debug)]
enum Production {
    /// The listing was exhausted and every candidate was handed off.
    Completed,
    /// The removal sink stopped accepting candidates.
    FeedClosed,
    /// A non-ignorable outcome arrived while handing off a candidate.
    Preempted(anyhow::Error),
    /// The listing failed with a non-ignorable error.
    ListingFailed(anyhow::Error),
    Cancelled,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DeletionTally {
    deleted: u64,
    skipped: u64,
}

/// The deletion pipeline.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use s3objects_rs::{Config, DeletionPipeline, create_pipeline_cancellation_token};
///
/// let config = Config::for_endpoint("http://localhost:9000", "us-east-1");
/// let pipeline = DeletionPipeline::new(config, create_pipeline_cancellation_token()).await;
///
/// pipeline.delete("my-bucket", "logs/2024/", None, true).await?;
/// if pipeline.has_warning() {
///     println!("some objects were skipped");
/// }
/// # Ok(())
/// # }
/// ```
pub struct DeletionPipeline {
    config: Config,
    target: Storage,
    cancellation_token: PipelineCancellationToken,
    has_warning: Arc<AtomicBool>,
}

impl DeletionPipeline {
    /// Create a pipeline over the S3 storage described by `config`.
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Self {
        let target = storage::create_storage(config.clone(), cancellation_token.clone()).await;
        Self::with_storage(config, target, cancellation_token)
    }

    /// Create a pipeline over an existing storage.
    pub fn with_storage(
        config: Config,
        target: Storage,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            config,
            target,
            cancellation_token,
            has_warning: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if any object was skipped because of insufficient permission.
    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    /// Delete `path` in `bucket`, or everything under it when `recursive`.
    ///
    /// Insufficient-permission failures are skipped. The first other failure
    /// from the listing or from the removal sink is returned. `version_id`
    /// only applies to single object deletion; an empty one is ignored.
    pub async fn delete(
        &self,
        bucket: &str,
        path: &str,
        version_id: Option<&str>,
        recursive: bool,
    ) -> Result<()> {
        if bucket.is_empty() {
            return Err(anyhow!(S3ObjectsError::MalformedRequest(
                "bucket name is required".to_string()
            )));
        }

        if recursive {
            self.delete_recursive(bucket, path).await
        } else {
            self.delete_single(bucket, path, version_id).await
        }
    }

    fn remove_options(&self) -> RemoveOptions {
        RemoveOptions {
            include_incomplete: false,
            remove_bucket: false,
            bypass_governance: self.config.bypass_governance_retention,
        }
    }

    fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }

    async fn delete_single(
        &self,
        bucket: &str,
        path: &str,
        version_id: Option<&str>,
    ) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(anyhow!(S3ObjectsError::Cancelled));
        }

        let candidate = DeleteCandidate::new(
            resolve(&format!("{bucket}/{path}")),
            version_id.map(String::from),
        );
        debug!(
            bucket = bucket,
            path = path,
            version_id = candidate.version_id,
            "single object deletion has started."
        );

        let (feed, candidates) = async_channel::bounded(1);
        feed.send(candidate)
            .await
            .context("async_channel::Sender::send() failed.")?;
        feed.close();

        let outcomes = self.target.remove(bucket, self.remove_options(), candidates);

        let mut tally = DeletionTally::default();
        let drained = self.drain(&outcomes, &mut tally).await;
        self.log_completion(bucket, path, &tally);

        if let Some(e) = drained {
            return Err(e);
        }
        if self.cancellation_token.is_cancelled() {
            return Err(anyhow!(S3ObjectsError::Cancelled));
        }
        if tally.deleted + tally.skipped == 0 {
            return Err(anyhow!(S3ObjectsError::Pipeline(
                "removal sink stopped without reporting an outcome.".to_string()
            )));
        }

        Ok(())
    }

    async fn delete_recursive(&self, bucket: &str, prefix: &str) -> Result<()> {
        debug!(
            bucket = bucket,
            prefix = prefix,
            "recursive deletion has started."
        );

        let listing = self.list_for_delete(bucket, prefix);

        let (feed, candidates) = async_channel::bounded(1);
        let outcomes = self.target.remove(bucket, self.remove_options(), candidates);

        let mut tally = DeletionTally::default();
        let production = self.produce(&listing, &feed, &outcomes, &mut tally).await;

        feed.close();
        listing.close();

        if let Production::ListingFailed(e) = production {
            error!(
                bucket = bucket,
                prefix = prefix,
                error = format!("{e:#}"),
                "listing failed. recursive deletion has been aborted."
            );
            return Err(e);
        }

        let drained = self.drain(&outcomes, &mut tally).await;
        self.log_completion(bucket, prefix, &tally);

        match production {
            Production::Completed => drained.map_or(Ok(()), Err),
            Production::Preempted(e) => Err(e),
            Production::Cancelled => Err(anyhow!(S3ObjectsError::Cancelled)),
            Production::FeedClosed => match drained {
                Some(e) => Err(e),
                None if self.cancellation_token.is_cancelled() => {
                    Err(anyhow!(S3ObjectsError::Cancelled))
                }
                None => Err(anyhow!(S3ObjectsError::Pipeline(
                    "removal sink stopped accepting candidates.".to_string()
                ))),
            },
            Production::ListingFailed(e) => Err(e),
        }
    }

    /// Spawn the ObjectLister over `prefix` and return its output channel.
    fn list_for_delete(&self, bucket: &str, prefix: &str) -> Receiver<Result<DeleteCandidate>> {
        let queue_size = (self.config.object_listing_queue_size as usize).max(1);
        let (sender, receiver) = async_channel::bounded(queue_size);

        let options = TraversalOptions {
            recursive: true,
            include_incomplete: false,
            show_dir: ShowDir::None,
        };
        ObjectLister::new(Stage::new(
            self.config.clone(),
            self.target.clone(),
            None,
            Some(sender),
            self.cancellation_token.clone(),
        ))
        .spawn_list_for_delete(bucket.to_string(), prefix.to_string(), options);

        receiver
    }

    /// Forward listed candidates into `feed` one at a time.
    async fn produce(
        &self,
        listing: &Receiver<Result<DeleteCandidate>>,
        feed: &Sender<DeleteCandidate>,
        outcomes: &Receiver<DeleteOutcome>,
        tally: &mut DeletionTally,
    ) -> Production {
        loop {
            let candidate = tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    info!("recursive deletion has been cancelled.");
                    return Production::Cancelled;
                }
                item = listing.recv() => match item {
                    Ok(Ok(candidate)) => candidate,
                    Ok(Err(e)) if is_insufficient_permission(&e) => {
                        debug!(
                            error = format!("{e:#}"),
                            "listing entry skipped: insufficient permission."
                        );
                        tally.skipped += 1;
                        self.set_warning();
                        continue;
                    }
                    Ok(Err(e)) => return Production::ListingFailed(e),
                    Err(_) => return Production::Completed,
                }
            };

            // Either the sink accepts the candidate, or an outcome arrives
            // first. Only a non-ignorable outcome stops production.
            loop {
                tokio::select! {
                    _ = self.cancellation_token.cancelled() => {
                        info!("recursive deletion has been cancelled.");
                        return Production::Cancelled;
                    }
                    sent = feed.send(candidate.clone()) => {
                        if sent.is_err() {
                            return Production::FeedClosed;
                        }
                        break;
                    }
                    received = outcomes.recv() => match received {
                        Ok(outcome) => {
                            if let Some(e) = self.inspect(outcome, tally) {
                                return Production::Preempted(e);
                            }
                        }
                        Err(_) => return Production::FeedClosed,
                    }
                }
            }
        }
    }

    /// Read the remaining outcomes until the sink closes the channel.
    ///
    /// Returns the first non-ignorable failure.
    async fn drain(
        &self,
        outcomes: &Receiver<DeleteOutcome>,
        tally: &mut DeletionTally,
    ) -> Option<anyhow::Error> {
        while let Ok(outcome) = outcomes.recv().await {
            if let Some(e) = self.inspect(outcome, tally) {
                return Some(e);
            }
        }
        None
    }

    /// Count an outcome; returns its error unless it is ignorable.
    fn inspect(&self, outcome: DeleteOutcome, tally: &mut DeletionTally) -> Option<anyhow::Error> {
        match outcome {
            DeleteOutcome::Deleted { .. } => {
                tally.deleted += 1;
                None
            }
            DeleteOutcome::Failed {
                key,
                version_id,
                error,
            } => {
                if is_insufficient_permission(&error) {
                    debug!(
                        key = key,
                        version_id = version_id,
                        "object skipped: insufficient permission."
                    );
                    tally.skipped += 1;
                    self.set_warning();
                    return None;
                }
                Some(error)
            }
        }
    }

    fn log_completion(&self, bucket: &str, path: &str, tally: &DeletionTally) {
        info!(
            bucket = bucket,
            path = path,
            deleted = tally.deleted,
            skipped = tally.skipped,
            "deletion has been completed."
        );
    }
}
