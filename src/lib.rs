/*!
# Overview
s3objects-rs lists and deletes objects in Amazon S3 and S3 compatible
storage (MinIO, Ceph, ...).

## Features
- **Location resolution**: classify `http(s)://host/path` strings as object
  storage locations and everything else as filesystem paths
- **Object lock aware listing**: every listed object carries its legal hold
  status and retention mode/date
- **Streaming deletion**: single objects or whole prefixes, batched through
  `DeleteObjects` (up to 1000 keys per request)
- **Permission tolerant**: objects the caller may not delete are skipped and
  reported as a warning; any other failure stops the deletion
- **Library-First**: the s3objects CLI is a thin wrapper over this crate

Example usage
=============

```toml
[dependencies]
s3objects-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3objects_rs::{
    Config, DeletionPipeline, ListObjectsRequest, create_pipeline_cancellation_token,
    list_bucket_objects,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::for_endpoint("http://localhost:9000", "us-east-1");

    let request = ListObjectsRequest {
        bucket_name: "my-bucket".to_string(),
        prefix: Some("logs/".to_string()),
        recursive: true,
        with_versions: false,
    };
    let storage = s3objects_rs::storage::create_storage(
        config.clone(),
        create_pipeline_cancellation_token(),
    )
    .await;
    let response = list_bucket_objects(storage, &config, &request).await?;
    for object in &response.objects {
        println!("{} {:?}", object.name, object.legal_hold_status);
    }

    let pipeline = DeletionPipeline::new(config, create_pipeline_cancellation_token()).await;
    pipeline.delete("my-bucket", "logs/", None, true).await?;

    Ok(())
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod config;
pub mod deleter;
pub mod enricher;
pub mod lister;
pub mod location;
pub mod pipeline;
pub mod stage;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::{CLIArgs, Operation};
pub use enricher::{list_and_enrich, list_bucket_objects};
pub use location::{LocationDescriptor, LocationKind, resolve};
pub use pipeline::DeletionPipeline;
pub use types::error::{
    S3ObjectsError, exit_code_from_error, is_cancelled_error, is_insufficient_permission,
    is_legal_hold_inapplicable, is_retention_inapplicable,
};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
pub use types::{ListObjectsRequest, ListObjectsResponse, ObjectEntry};
