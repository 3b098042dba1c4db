use anyhow::Error;
use thiserror::Error;

/// Application-level error types for s3objects-rs.
///
/// Errors travel through the library as `anyhow::Error` and are classified
/// by downcasting to this enum (see the `is_*` predicates below).
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Non-error conditions (Cancelled)
/// - 1: General errors (Listing, Removal, Timeout, Pipeline, ...)
/// - 2: Request/configuration errors (MalformedRequest, InvalidConfig)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum S3ObjectsError {
    /// A required request field is missing or empty.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Listing failed. Aborts the current operation.
    #[error("Listing failed: {0}")]
    Listing(String),

    /// Legal hold or retention lookup failed. Never fatal.
    #[error("Metadata lookup failed: {0}")]
    MetadataLookup(String),

    /// Legal hold is not applicable to the object (e.g. object lock disabled).
    #[error("Legal hold is not applicable")]
    LegalHoldNotApplicable,

    /// The bucket has no object lock configuration.
    #[error("Object lock configuration does not exist")]
    ObjectLockNotConfigured,

    /// Access to a path was denied. Skipped by the deletion pipeline.
    #[error("Insufficient permission: {0}")]
    InsufficientPermission(String),

    /// Removal of an object failed.
    #[error("Failed to remove '{key}': {code} ({message})")]
    Removal {
        key: String,
        code: String,
        message: String,
    },

    /// The operation did not complete within its deadline.
    #[error("Operation timed out after {0} milliseconds")]
    Timeout(u64),

    /// Operation cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// General pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl S3ObjectsError {
    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            S3ObjectsError::Cancelled => 0,
            S3ObjectsError::MalformedRequest(_) | S3ObjectsError::InvalidConfig(_) => 2,
            _ => 1,
        }
    }

    /// Classify an S3 error code returned while removing `path`.
    pub fn from_removal_code(code: &str, path: &str, message: &str) -> Self {
        if is_permission_error_code(code) {
            return S3ObjectsError::InsufficientPermission(path.to_string());
        }
        S3ObjectsError::Removal {
            key: path.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Classify an S3 error code returned while listing `path`.
    pub fn from_listing_code(code: &str, path: &str, message: &str) -> Self {
        if is_permission_error_code(code) {
            return S3ObjectsError::InsufficientPermission(path.to_string());
        }
        S3ObjectsError::Listing(format!("{path}: {code} ({message})"))
    }

    /// Classify an S3 error code returned by GetObjectLegalHold.
    pub fn from_legal_hold_code(code: &str, message: &str) -> Self {
        if code == LEGAL_HOLD_NOT_APPLICABLE_CODE {
            return S3ObjectsError::LegalHoldNotApplicable;
        }
        S3ObjectsError::MetadataLookup(format!("{code} ({message})"))
    }

    /// Classify an S3 error code returned by GetObjectRetention.
    pub fn from_retention_code(code: &str, message: &str) -> Self {
        if code == OBJECT_LOCK_NOT_CONFIGURED_CODE {
            return S3ObjectsError::ObjectLockNotConfigured;
        }
        S3ObjectsError::MetadataLookup(format!("{code} ({message})"))
    }

    /// Check whether this error is skipped by the deletion pipeline.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, S3ObjectsError::InsufficientPermission(_))
    }
}

const LEGAL_HOLD_NOT_APPLICABLE_CODE: &str = "InvalidRequest";
const OBJECT_LOCK_NOT_CONFIGURED_CODE: &str = "NoSuchObjectLockConfiguration";

fn is_permission_error_code(code: &str) -> bool {
    matches!(code, "AccessDenied" | "AllAccessDisabled")
}

fn downcast_matches(e: &Error, predicate: impl Fn(&S3ObjectsError) -> bool) -> bool {
    e.chain()
        .filter_map(|cause| cause.downcast_ref::<S3ObjectsError>())
        .any(predicate)
}

/// Check if an `anyhow::Error` is an insufficient-permission error.
///
/// This is the allow-list of errors that the deletion pipeline skips instead
/// of aborting on. Errors wrapped with `.context()` are matched too.
pub fn is_insufficient_permission(e: &Error) -> bool {
    downcast_matches(e, S3ObjectsError::is_ignorable)
}

/// Check if a legal hold lookup failed only because legal hold does not apply.
pub fn is_legal_hold_inapplicable(e: &Error) -> bool {
    downcast_matches(e, |err| *err == S3ObjectsError::LegalHoldNotApplicable)
}

/// Check if a retention lookup failed only because object lock is not configured.
pub fn is_retention_inapplicable(e: &Error) -> bool {
    downcast_matches(e, |err| *err == S3ObjectsError::ObjectLockNotConfigured)
}

/// Check if an `anyhow::Error` wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    downcast_matches(e, |err| *err == S3ObjectsError::Cancelled)
}

/// Produce an independent copy of `e` that classifies the same way.
///
/// Used when a single request failure has to be reported for several keys.
pub fn duplicate_error(e: &Error) -> Error {
    match e
        .chain()
        .find_map(|cause| cause.downcast_ref::<S3ObjectsError>())
    {
        Some(kind) if e.to_string() == kind.to_string() => Error::new(kind.clone()),
        Some(kind) => Error::new(kind.clone()).context(e.to_string()),
        None => anyhow::anyhow!("{e:#}"),
    }
}

/// Extract the exit code from an `anyhow::Error`, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<S3ObjectsError>())
        .map_or(1, S3ObjectsError::exit_code)
}
