//! Removal sink for the deletion pipeline.
//!
//! This module contains the ObjectRemover worker and the Deleter trait
//! with its two implementations: BatchDeleter and SingleDeleter.

use anyhow::{Result, anyhow};
use async_channel::Receiver;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::stage::{SendResult, Stage};
use crate::storage::Storage;
use crate::types::error::{S3ObjectsError, duplicate_error, is_insufficient_permission};
use crate::types::token::PipelineCancellationToken;
use crate::types::{DeleteCandidate, DeleteOutcome, RemoveOptions};

pub mod batch;
pub mod single;

pub use batch::BatchDeleter;
pub use single::SingleDeleter;

// ---------------------------------------------------------------------------
// Deleter trait
// ---------------------------------------------------------------------------

/// An object (or object version) handed to a [`Deleter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetKey {
    pub key: String,
    pub version_id: Option<String>,
}

/// Result of a deletion operation, reporting which keys succeeded and which failed.
#[derive(Debug, Default)]
pub struct DeleteResult {
    pub deleted: Vec<DeletedKey>,
    pub failed: Vec<FailedKey>,
}

/// A successfully deleted key.
#[derive(Debug, Clone)]
pub struct DeletedKey {
    pub key: String,
    pub version_id: Option<String>,
}

/// A key that failed to delete. `error` is classified by [`S3ObjectsError`].
#[derive(Debug)]
pub struct FailedKey {
    pub key: String,
    pub version_id: Option<String>,
    pub error: anyhow::Error,
}

/// Trait for deletion backends (batch or single mode).
#[async_trait]
pub trait Deleter: Send + Sync {
    /// Delete the given objects.
    ///
    /// Per-key failures are reported in the result. `Err` means the request
    /// as a whole failed and no key is known to be deleted.
    async fn delete(&self, objects: &[TargetKey], config: &Config) -> Result<DeleteResult>;
}

// ---------------------------------------------------------------------------
// ObjectRemover worker
// ---------------------------------------------------------------------------

/// Pipeline worker that reads delete candidates from the input channel,
/// removes them through a [`Deleter`] and reports one [`DeleteOutcome`] per
/// candidate.
pub struct ObjectRemover {
    base: Stage<DeleteCandidate, DeleteOutcome>,
    bucket: String,
    options: RemoveOptions,
    /// BatchDeleter (batch_size > 1) or SingleDeleter (batch_size == 1).
    deleter: Box<dyn Deleter>,
    buffer: Vec<TargetKey>,
    effective_batch_size: usize,
    has_failure: bool,
}

impl ObjectRemover {
    pub fn new(
        base: Stage<DeleteCandidate, DeleteOutcome>,
        bucket: &str,
        options: RemoveOptions,
    ) -> Self {
        let target_storage = base.target.clone();

        let effective_batch_size = if base.config.batch_size <= 1 {
            1
        } else {
            (base.config.batch_size as usize).min(batch::MAX_BATCH_SIZE)
        };

        let deleter: Box<dyn Deleter> = if effective_batch_size == 1 {
            Box::new(SingleDeleter::new(
                target_storage,
                bucket,
                options.bypass_governance,
            ))
        } else {
            Box::new(BatchDeleter::new(
                target_storage,
                bucket,
                options.bypass_governance,
            ))
        };

        Self {
            base,
            bucket: bucket.to_string(),
            options,
            deleter,
            buffer: Vec::with_capacity(effective_batch_size),
            effective_batch_size,
            has_failure: false,
        }
    }

    /// Main entry point: read candidates from the channel and remove them.
    ///
    /// Returns `Err` only when a whole request failed for a reason other
    /// than insufficient permission; outcomes for the affected keys have
    /// already been reported by then.
    pub async fn remove(&mut self) -> Result<()> {
        debug!(bucket = self.bucket, "object remover started.");

        let receiver = self.base.receiver()?.clone();
        let result = self.receive_and_remove(&receiver).await;

        // Stop accepting candidates once the remover is done.
        receiver.close();
        result
    }

    async fn receive_and_remove(&mut self, receiver: &Receiver<DeleteCandidate>) -> Result<()> {
        loop {
            tokio::select! {
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(candidate) => {
                            if !self.process_candidate(candidate).await? {
                                return Ok(());
                            }
                        }
                        Err(_) => {
                            // Feed closed and drained.
                            if !self.remove_buffered_objects().await? {
                                return Ok(());
                            }
                            self.finish().await?;
                            debug!(bucket = self.bucket, "object remover has been completed.");
                            return Ok(());
                        }
                    }
                },
                _ = self.base.cancellation_token.cancelled() => {
                    info!(bucket = self.bucket, "object remover has been cancelled.");
                    self.cancel_buffered_objects().await?;
                    return Ok(());
                }
            }
        }
    }

    /// Returns `Ok(false)` when the outcome channel has been closed.
    async fn process_candidate(&mut self, candidate: DeleteCandidate) -> Result<bool> {
        let key = candidate.object_key(&self.bucket);

        if key.is_empty() {
            warn!(
                bucket = self.bucket,
                path = candidate.url.path,
                "delete candidate does not name an object."
            );
            let outcome = DeleteOutcome::Failed {
                key,
                version_id: candidate.version_id,
                error: anyhow!(S3ObjectsError::MalformedRequest(format!(
                    "object key is empty for '{}'",
                    candidate.url.path
                ))),
            };
            return Ok(self.base.send(outcome).await? == SendResult::Success);
        }

        self.buffer.push(TargetKey {
            key,
            version_id: candidate.version_id,
        });

        if self.buffer.len() >= self.effective_batch_size {
            return self.remove_buffered_objects().await;
        }

        Ok(true)
    }

    /// Remove buffered objects by delegating to the Deleter backend.
    ///
    /// Returns `Ok(false)` when the outcome channel has been closed.
    async fn remove_buffered_objects(&mut self) -> Result<bool> {
        if self.buffer.is_empty() {
            return Ok(true);
        }

        let batch = std::mem::take(&mut self.buffer);
        let mut outcomes = Vec::with_capacity(batch.len());

        let mut to_delete = Vec::with_capacity(batch.len());
        if self.options.include_incomplete {
            for target in batch {
                match self
                    .base
                    .target
                    .abort_incomplete_uploads(&self.bucket, &target.key)
                    .await
                {
                    Ok(()) => to_delete.push(target),
                    Err(e) => outcomes.push(DeleteOutcome::Failed {
                        key: target.key,
                        version_id: target.version_id,
                        error: e,
                    }),
                }
            }
        } else {
            to_delete = batch;
        }

        let mut whole_request_error = None;
        match self.deleter.delete(&to_delete, &self.base.config).await {
            Ok(result) => {
                for deleted in result.deleted {
                    info!(
                        bucket = self.bucket,
                        key = deleted.key,
                        version_id = deleted.version_id.as_deref().unwrap_or(""),
                        "delete completed."
                    );
                    outcomes.push(DeleteOutcome::Deleted {
                        key: deleted.key,
                        version_id: deleted.version_id,
                    });
                }
                for failed in result.failed {
                    outcomes.push(DeleteOutcome::Failed {
                        key: failed.key,
                        version_id: failed.version_id,
                        error: failed.error,
                    });
                }
            }
            Err(e) => {
                for target in to_delete {
                    outcomes.push(DeleteOutcome::Failed {
                        key: target.key,
                        version_id: target.version_id,
                        error: duplicate_error(&e),
                    });
                }
                if !is_insufficient_permission(&e) {
                    whole_request_error = Some(e);
                }
            }
        }

        for outcome in outcomes {
            if outcome.error().is_some_and(|e| !is_insufficient_permission(e)) {
                self.has_failure = true;
            }
            if self.base.send(outcome).await? == SendResult::Closed {
                return Ok(false);
            }
        }

        if let Some(e) = whole_request_error {
            error!(
                bucket = self.bucket,
                error = format!("{e:#}"),
                "object remover has been stopped with error."
            );
            return Err(e);
        }

        Ok(true)
    }

    /// Report every buffered candidate as cancelled.
    async fn cancel_buffered_objects(&mut self) -> Result<()> {
        for target in std::mem::take(&mut self.buffer) {
            let outcome = DeleteOutcome::Failed {
                key: target.key,
                version_id: target.version_id,
                error: anyhow!(S3ObjectsError::Cancelled),
            };
            if self.base.send(outcome).await? == SendResult::Closed {
                break;
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if !self.options.remove_bucket {
            return Ok(());
        }

        if self.has_failure {
            warn!(
                bucket = self.bucket,
                "bucket is kept because some objects could not be removed."
            );
            return Ok(());
        }

        match self.base.target.delete_bucket(&self.bucket).await {
            Ok(()) => {
                info!(bucket = self.bucket, "bucket removed.");
                Ok(())
            }
            Err(e) => {
                let outcome = DeleteOutcome::Failed {
                    key: self.bucket.clone(),
                    version_id: None,
                    error: e,
                };
                self.base.send(outcome).await?;
                Ok(())
            }
        }
    }
}

/// Spawn an [`ObjectRemover`] over `candidates` and return its outcome
/// channel.
///
/// Uses the double-spawn pattern to catch panics. A panicking remover drops
/// both ends of its channels, which the pipeline observes as a closed feed.
pub fn spawn_remover(
    target: Storage,
    config: Config,
    cancellation_token: PipelineCancellationToken,
    bucket: &str,
    options: RemoveOptions,
    candidates: Receiver<DeleteCandidate>,
) -> Receiver<DeleteOutcome> {
    let (sender, outcomes) = async_channel::unbounded();
    let stage = Stage::new(
        config,
        target,
        Some(candidates),
        Some(sender),
        cancellation_token,
    );
    let mut remover = ObjectRemover::new(stage, bucket, options);
    let bucket = bucket.to_string();

    tokio::spawn(async move {
        let join_result = tokio::spawn(async move { remover.remove().await }).await;

        match join_result {
            Ok(Ok(())) => {
                debug!(bucket = bucket, "object remover completed successfully.");
            }
            Ok(Err(e)) => {
                debug!(bucket = bucket, "object remover stopped: {:#}", e);
            }
            Err(e) => {
                error!(bucket = bucket, "object remover task panicked: {}", e);
            }
        }
    });

    outcomes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests;
