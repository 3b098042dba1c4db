use anyhow::Result;
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use aws_sdk_s3::operation::delete_object::DeleteObjectOutput;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::types::ObjectIdentifier;
use dyn_clone::DynClone;
use leaky_bucket::RateLimiter;
use std::sync::Arc;

use crate::config::{ClientConfig, Config};
use crate::types::token::PipelineCancellationToken;
use crate::types::{
    DeleteCandidate, DeleteOutcome, ListObjectsOptions, ObjectRetention, RawObjectEntry,
    RemoveOptions, TraversalOptions,
};

pub mod s3;

pub type Storage = Box<dyn StorageTrait + Send + Sync>;

#[async_trait]
pub trait StorageFactory {
    async fn create(
        config: Config,
        cancellation_token: PipelineCancellationToken,
        client_config: Option<ClientConfig>,
        rate_limit_api_calls: Option<Arc<RateLimiter>>,
    ) -> Storage;
}

/// Object storage operations used by the enricher and the deletion pipeline.
///
/// Listing operations push their results into the given channel and return
/// once the listing is exhausted, the receiver is closed, or the storage's
/// cancellation token fires. A failure that ends a listing is returned as
/// `Err`; the caller decides how it travels downstream.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// List objects (or object versions and delete markers) under a prefix.
    async fn list_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
        sender: &Sender<Result<RawObjectEntry>>,
    ) -> Result<()>;

    /// Legal hold status (`ON`/`OFF`) of one object version.
    ///
    /// Fails with `LegalHoldNotApplicable` when the bucket has no object lock.
    async fn get_object_legal_hold(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<String>>;

    /// Retention mode and retain-until date of one object version.
    ///
    /// Fails with `ObjectLockNotConfigured` when the object has no retention.
    async fn get_object_retention(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<ObjectRetention>>;

    /// List deletion candidates under a prefix.
    async fn list_for_delete(
        &self,
        bucket: &str,
        prefix: &str,
        options: &TraversalOptions,
        sender: &Sender<Result<DeleteCandidate>>,
    ) -> Result<()>;

    /// Start removing the candidates received from `candidates`.
    ///
    /// Returns immediately. Exactly one outcome is produced per candidate the
    /// remover accepted; the outcome channel is closed once `candidates` has
    /// been closed and drained, or after a failure that stops the remover.
    fn remove(
        &self,
        bucket: &str,
        options: RemoveOptions,
        candidates: Receiver<DeleteCandidate>,
    ) -> Receiver<DeleteOutcome>;

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<String>,
        bypass_governance: bool,
    ) -> Result<DeleteObjectOutput>;

    /// Delete up to 1000 objects with one DeleteObjects request.
    ///
    /// Per-key failures are reported in the output, not as `Err`.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
        bypass_governance: bool,
    ) -> Result<DeleteObjectsOutput>;

    /// Abort every in-progress multipart upload of `key`.
    async fn abort_incomplete_uploads(&self, bucket: &str, key: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
}

dyn_clone::clone_trait_object!(StorageTrait);

// Refill every 100ms.
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

/// Create the S3 storage described by `config`.
pub async fn create_storage(
    config: Config,
    cancellation_token: PipelineCancellationToken,
) -> Storage {
    let rate_limit_api_calls = config.rate_limit_api_calls.map(build_rate_limiter);
    let client_config = config.client_config.clone();

    s3::S3StorageFactory::create(
        config,
        cancellation_token,
        client_config,
        rate_limit_api_calls,
    )
    .await
}

fn build_rate_limiter(rate_limit_value: u32) -> Arc<RateLimiter> {
    let refill = if (rate_limit_value as usize) <= REFILL_PER_INTERVAL_DIVIDER {
        1
    } else {
        rate_limit_value as usize / REFILL_PER_INTERVAL_DIVIDER
    };

    Arc::new(
        RateLimiter::builder()
            .max(rate_limit_value as usize)
            .initial(rate_limit_value as usize)
            .refill(refill)
            .fair(true)
            .build(),
    )
}
