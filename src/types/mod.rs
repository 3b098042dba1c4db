use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

use crate::location::{LocationDescriptor, resolve};

pub mod error;
pub mod token;

/// One entry of a raw object listing, before legal hold and retention
/// metadata have been attached.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawObjectEntry {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub version_id: Option<String>,
    pub is_latest: bool,
    pub is_delete_marker: bool,
    pub user_tags: BTreeMap<String, String>,
}

/// Listing entry enriched with object lock metadata.
///
/// `retention_mode` and `retention_until` are either both set or both unset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub is_delete_marker: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_hold_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_mode: Option<String>,
    #[serde(
        default,
        rename = "retention_until_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub retention_until: Option<DateTime<Utc>>,
}

impl From<RawObjectEntry> for ObjectEntry {
    fn from(raw: RawObjectEntry) -> Self {
        ObjectEntry {
            name: raw.key,
            size: raw.size,
            last_modified: raw.last_modified,
            content_type: raw.content_type,
            version_id: raw.version_id,
            is_latest: raw.is_latest,
            is_delete_marker: raw.is_delete_marker,
            user_tags: raw.user_tags,
            ..ObjectEntry::default()
        }
    }
}

/// Result of [`list_bucket_objects`](crate::enricher::list_bucket_objects).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    pub objects: Vec<ObjectEntry>,
    pub total: i64,
}

impl ListObjectsResponse {
    pub fn new(objects: Vec<ObjectEntry>) -> Self {
        let total = objects.len() as i64;
        Self { objects, total }
    }
}

/// Listing request accepted by the enricher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListObjectsRequest {
    pub bucket_name: String,
    pub prefix: Option<String>,
    pub recursive: bool,
    pub with_versions: bool,
}

/// Options handed to [`StorageTrait::list_objects`](crate::storage::StorageTrait::list_objects).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListObjectsOptions {
    pub prefix: String,
    pub recursive: bool,
    pub with_versions: bool,
}

/// Object lock retention of a single object version.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectRetention {
    pub mode: Option<String>,
    pub retain_until: Option<DateTime<Utc>>,
}

/// How common prefixes ("directories") are reported by a non-recursive
/// deletion listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowDir {
    #[default]
    None,
    First,
    Last,
}

/// Options handed to [`StorageTrait::list_for_delete`](crate::storage::StorageTrait::list_for_delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraversalOptions {
    pub recursive: bool,
    pub include_incomplete: bool,
    pub show_dir: ShowDir,
}

/// Options handed to [`StorageTrait::remove`](crate::storage::StorageTrait::remove).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    pub include_incomplete: bool,
    pub remove_bucket: bool,
    pub bypass_governance: bool,
}

/// An object (or object version) queued for removal.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCandidate {
    pub url: LocationDescriptor,
    pub version_id: Option<String>,
}

impl DeleteCandidate {
    /// An empty version id is treated as absent.
    pub fn new(url: LocationDescriptor, version_id: Option<String>) -> Self {
        Self {
            url,
            version_id: version_id.filter(|v| !v.is_empty()),
        }
    }

    /// Build a candidate for `key` in `bucket` the same way a single delete
    /// request is resolved.
    pub fn from_key(bucket: &str, key: &str, version_id: Option<String>) -> Self {
        Self::new(resolve(&format!("{bucket}/{key}")), version_id)
    }

    /// Derive the S3 object key by stripping leading separators and the
    /// leading `<bucket>/` segment from the path.
    ///
    /// ```
    /// use s3objects_rs::types::DeleteCandidate;
    ///
    /// let candidate = DeleteCandidate::from_key("my-bucket", "dir/file.txt", None);
    /// assert_eq!(candidate.object_key("my-bucket"), "dir/file.txt");
    /// ```
    pub fn object_key(&self, bucket: &str) -> String {
        let separator = self.url.path_separator;
        let path = self
            .url
            .path
            .trim_start_matches(|c| c == '/' || c == separator);

        match path.strip_prefix(bucket) {
            Some(rest) if rest.is_empty() => String::new(),
            Some(rest) if rest.starts_with('/') || rest.starts_with(separator) => {
                rest[1..].to_string()
            }
            _ => path.to_string(),
        }
    }
}

/// Outcome of one removal attempt. Exactly one is produced per submitted
/// candidate.
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted {
        key: String,
        version_id: Option<String>,
    },
    Failed {
        key: String,
        version_id: Option<String>,
        error: anyhow::Error,
    },
}

impl DeleteOutcome {
    pub fn key(&self) -> &str {
        match self {
            DeleteOutcome::Deleted { key, .. } | DeleteOutcome::Failed { key, .. } => key,
        }
    }

    pub fn version_id(&self) -> Option<&str> {
        match self {
            DeleteOutcome::Deleted { version_id, .. }
            | DeleteOutcome::Failed { version_id, .. } => version_id.as_deref(),
        }
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            DeleteOutcome::Deleted { .. } => None,
            DeleteOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted { .. })
    }
}

/// AWS configuration file locations.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// AWS credential sources.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair.
///
/// The secret_access_key and session_token are cleared from memory when this
/// struct is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
