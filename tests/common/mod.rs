//! Shared E2E test infrastructure for s3objects-rs.
//!
//! Provides `TestHelper` for bucket management, object lock setup and
//! operation execution against real AWS S3. All helpers use the
//! `s3objects-e2e-test` AWS profile.

#![allow(dead_code)]

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::DateTime as SmithyDateTime;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, ObjectLockLegalHold,
    ObjectLockLegalHoldStatus, ObjectLockRetention, ObjectLockRetentionMode,
};
use s3objects_rs::config::args::parse_from_args;
use s3objects_rs::storage::create_storage;
use s3objects_rs::{
    Config, DeletionPipeline, ListObjectsResponse, Operation, create_pipeline_cancellation_token,
    list_bucket_objects,
};
use uuid::Uuid;

/// AWS profile used for all E2E tests.
const AWS_PROFILE: &str = "s3objects-e2e-test";

/// Region used when the profile does not name one.
const DEFAULT_REGION: &str = "us-east-1";

/// Outcome of a deletion run.
#[derive(Debug)]
pub struct DeleteRunResult {
    pub error: Option<anyhow::Error>,
    pub has_warning: bool,
}

/// Deletes every version in the bucket and then the bucket itself.
///
/// Call [`BucketGuard::cleanup`] at the end of the test; cleanup also runs on
/// drop as a best effort when the test panicked first.
pub struct BucketGuard {
    helper: Arc<TestHelper>,
    bucket: String,
    cleaned: bool,
}

impl BucketGuard {
    pub async fn cleanup(mut self) {
        self.helper.delete_bucket_cascade(&self.bucket).await;
        self.cleaned = true;
    }
}

impl Drop for BucketGuard {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let helper = self.helper.clone();
        let bucket = self.bucket.clone();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move {
                    helper.delete_bucket_cascade(&bucket).await;
                });
            });
        }));
    }
}

pub struct TestHelper {
    client: Client,
    region: String,
}

impl TestHelper {
    pub async fn new() -> Arc<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(AWS_PROFILE)
            .load()
            .await;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Arc::new(Self {
            client: Client::new(&sdk_config),
            region,
        })
    }

    pub fn bucket_guard(self: &Arc<Self>, bucket: &str) -> BucketGuard {
        BucketGuard {
            helper: Arc::clone(self),
            bucket: bucket.to_string(),
            cleaned: false,
        }
    }

    pub fn generate_bucket_name(&self) -> String {
        format!("s3objects-e2e-{}", Uuid::new_v4())
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    // -----------------------------------------------------------------------
    // Bucket management
    // -----------------------------------------------------------------------

    pub async fn create_bucket(&self, bucket: &str) {
        self.create_bucket_with_object_lock(bucket, false).await;
    }

    /// Create a bucket with object lock enabled (versioning is implied).
    pub async fn create_object_lock_bucket(&self, bucket: &str) {
        self.create_bucket_with_object_lock(bucket, true).await;
    }

    async fn create_bucket_with_object_lock(&self, bucket: &str, object_lock: bool) {
        let mut builder = self
            .client
            .create_bucket()
            .bucket(bucket)
            .object_lock_enabled_for_bucket(object_lock);

        // us-east-1 must NOT specify a location constraint
        if self.region != "us-east-1" {
            let config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            builder = builder.create_bucket_configuration(config);
        }

        builder
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to create bucket {bucket}: {e}"));
    }

    /// Release legal holds, then delete every version with governance bypass,
    /// then the bucket.
    pub async fn delete_bucket_cascade(&self, bucket: &str) {
        for (key, version_id) in self.list_object_versions(bucket).await {
            let _ = self
                .client
                .put_object_legal_hold()
                .bucket(bucket)
                .key(&key)
                .version_id(&version_id)
                .legal_hold(
                    ObjectLockLegalHold::builder()
                        .status(ObjectLockLegalHoldStatus::Off)
                        .build(),
                )
                .send()
                .await;
            let _ = self
                .client
                .delete_object()
                .bucket(bucket)
                .key(&key)
                .version_id(&version_id)
                .bypass_governance_retention(true)
                .send()
                .await;
        }

        let _ = self.client.delete_bucket().bucket(bucket).send().await;
    }

    // -----------------------------------------------------------------------
    // Object operations
    // -----------------------------------------------------------------------

    pub async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to put object {key} in {bucket}: {e}"));
    }

    pub async fn put_object_with_legal_hold(&self, bucket: &str, key: &str) {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(b"held".to_vec().into())
            .object_lock_legal_hold_status(ObjectLockLegalHoldStatus::On)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to put legal hold object {key}: {e}"));
    }

    /// Upload an object under governance retention for `days` days.
    pub async fn put_object_with_governance_retention(&self, bucket: &str, key: &str, days: i64) {
        let until = chrono::Utc::now() + chrono::Duration::days(days);

        self.put_object(bucket, key, b"retained".to_vec()).await;
        self.client
            .put_object_retention()
            .bucket(bucket)
            .key(key)
            .retention(
                ObjectLockRetention::builder()
                    .mode(ObjectLockRetentionMode::Governance)
                    .retain_until_date(SmithyDateTime::from_secs(until.timestamp()))
                    .build(),
            )
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to put retention on {key}: {e}"));
    }

    pub async fn put_objects_parallel(&self, bucket: &str, keys: Vec<String>) {
        let mut set = tokio::task::JoinSet::new();

        for key in keys {
            let client = self.client.clone();
            let bucket = bucket.to_string();
            set.spawn(async move {
                client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .body(key.clone().into_bytes().into())
                    .send()
                    .await
                    .unwrap_or_else(|e| panic!("Failed to put object {key} in {bucket}: {e}"));
            });
        }

        while let Some(result) = set.join_next().await {
            result.expect("Upload task panicked");
        }
    }

    /// List current object keys under `prefix`.
    pub async fn list_keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .unwrap_or_else(|e| panic!("Failed to list objects in {bucket}/{prefix}: {e}"));

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            if resp.is_truncated() != Some(true) {
                break;
            }
            continuation_token = resp.next_continuation_token().map(str::to_string);
        }

        keys
    }

    /// List `(key, version_id)` pairs of all versions and delete markers.
    pub async fn list_object_versions(&self, bucket: &str) -> Vec<(String, String)> {
        let mut result = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let Ok(resp) = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_id_marker.take())
                .send()
                .await
            else {
                return result;
            };

            for v in resp.versions() {
                if let (Some(key), Some(vid)) = (v.key(), v.version_id()) {
                    result.push((key.to_string(), vid.to_string()));
                }
            }
            for m in resp.delete_markers() {
                if let (Some(key), Some(vid)) = (m.key(), m.version_id()) {
                    result.push((key.to_string(), vid.to_string()));
                }
            }

            if resp.is_truncated() != Some(true) {
                return result;
            }
            key_marker = resp.next_key_marker().map(str::to_string);
            version_id_marker = resp.next_version_id_marker().map(str::to_string);
        }
    }

    // -----------------------------------------------------------------------
    // Operation helpers
    // -----------------------------------------------------------------------

    /// Build a `Config` and an `Operation` from CLI-style arguments.
    ///
    /// Prepends the binary name and appends `--target-profile` unless the
    /// arguments carry their own credentials.
    pub fn build_operation(args: Vec<&str>) -> (Config, Operation) {
        let mut full_args: Vec<String> = vec!["s3objects".to_string()];
        full_args.extend(args.iter().map(|s| s.to_string()));

        let has_credentials = full_args
            .iter()
            .any(|a| a.starts_with("--target-profile") || a.starts_with("--target-access-key"));
        if !has_credentials {
            full_args.push("--target-profile".to_string());
            full_args.push(AWS_PROFILE.to_string());
        }

        let cli_args = parse_from_args(full_args).unwrap_or_else(|e| panic!("{e}"));
        let operation = Operation::try_from(&cli_args).unwrap_or_else(|e| panic!("{e}"));
        let config = Config::try_from(cli_args).unwrap_or_else(|e| panic!("{e}"));
        (config, operation)
    }

    pub async fn run_list(config: Config, operation: Operation) -> ListObjectsResponse {
        let Operation::List(request) = operation else {
            panic!("expected a list operation, got {operation:?}");
        };

        let storage = create_storage(config.clone(), create_pipeline_cancellation_token()).await;
        list_bucket_objects(storage, &config, &request)
            .await
            .unwrap_or_else(|e| panic!("listing failed: {e:#}"))
    }

    pub async fn run_delete(config: Config, operation: Operation) -> DeleteRunResult {
        let Operation::Remove {
            bucket,
            path,
            version_id,
            recursive,
        } = operation
        else {
            panic!("expected a remove operation, got {operation:?}");
        };

        let pipeline = DeletionPipeline::new(config, create_pipeline_cancellation_token()).await;
        let error = pipeline
            .delete(&bucket, &path, version_id.as_deref(), recursive)
            .await
            .err();

        DeleteRunResult {
            error,
            has_warning: pipeline.has_warning(),
        }
    }
}

/// Default timeout for E2E tests (5 minutes).
pub const E2E_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Wraps an async E2E test body with a timeout.
#[macro_export]
macro_rules! e2e_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::E2E_TIMEOUT, $body)
            .await
            .expect("E2E test timed out")
    };
}
