//! Location string resolution.
//!
//! Classifies a URL-like string as either an object storage location
//! (`http(s)://host/path`) or a filesystem path, and decomposes it into a
//! [`LocationDescriptor`]. Resolution never fails: anything that is not a
//! well-formed http/https authority degrades to a filesystem path.

use std::fmt;

/// Separator between the scheme and the authority.
pub const SCHEME_SEPARATOR: &str = "://";

/// Separator used in object storage paths.
pub const OBJECT_STORAGE_SEPARATOR: char = '/';

/// Kind of storage a location refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    /// MinIO and other S3 compatible cloud storage.
    ObjectStorage,
    /// POSIX compatible file systems.
    FileSystem,
}

/// Structured result of resolving a location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDescriptor {
    pub kind: LocationKind,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub path_separator: char,
    pub scheme_separator: &'static str,
}

impl LocationDescriptor {
    fn object_storage(scheme: &str, host: &str, path: &str) -> Self {
        Self {
            kind: LocationKind::ObjectStorage,
            scheme: scheme.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            path_separator: OBJECT_STORAGE_SEPARATOR,
            scheme_separator: SCHEME_SEPARATOR,
        }
    }

    fn file_system(path: &str) -> Self {
        Self {
            kind: LocationKind::FileSystem,
            scheme: String::new(),
            host: String::new(),
            path: path.to_string(),
            path_separator: std::path::MAIN_SEPARATOR,
            scheme_separator: "",
        }
    }

    pub fn is_object_storage(&self) -> bool {
        self.kind == LocationKind::ObjectStorage
    }
}

impl fmt::Display for LocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LocationKind::ObjectStorage => write!(
                f,
                "{}{}{}{}",
                self.scheme, self.scheme_separator, self.host, self.path
            ),
            LocationKind::FileSystem => f.write_str(&self.path),
        }
    }
}

/// Resolve a location string into a [`LocationDescriptor`].
///
/// # Examples
///
/// ```
/// use s3objects_rs::location::{LocationKind, resolve};
///
/// let url = resolve("https://s3.example.com/bucket/key.txt");
/// assert_eq!(url.kind, LocationKind::ObjectStorage);
/// assert_eq!(url.scheme, "https");
/// assert_eq!(url.host, "s3.example.com");
/// assert_eq!(url.path, "/bucket/key.txt");
///
/// let path = resolve("s3://bucket/key");
/// assert_eq!(path.kind, LocationKind::FileSystem);
/// assert_eq!(path.path, "s3://bucket/key");
/// ```
pub fn resolve(input: &str) -> LocationDescriptor {
    let (scheme, authority_and_path) = match split_scheme(input) {
        Some((scheme, remainder)) => (scheme, Some(remainder)),
        None => ("", input.strip_prefix("//")),
    };

    if let Some(authority_and_path) = authority_and_path {
        let (authority, path) = split_authority(authority_and_path);
        let host = extract_host(authority);
        if !host.is_empty() && is_supported_scheme(scheme) {
            return LocationDescriptor::object_storage(scheme, host, path);
        }
    }

    LocationDescriptor::file_system(input)
}

/// Check whether a string resolves to an http/https object storage location.
pub fn is_object_storage_url(input: &str) -> bool {
    resolve(input).is_object_storage()
}

// Returns the scheme and everything after "://" when the input splits into
// exactly two parts around "://" and the scheme is letters only.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let (scheme, remainder) = input.split_once(SCHEME_SEPARATOR)?;
    if remainder.contains(SCHEME_SEPARATOR) || !is_valid_scheme(scheme) {
        return None;
    }
    Some((scheme, remainder))
}

fn is_valid_scheme(scheme: &str) -> bool {
    !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_supported_scheme(scheme: &str) -> bool {
    scheme == "http" || scheme == "https"
}

fn split_authority(s: &str) -> (&str, &str) {
    match s.find(OBJECT_STORAGE_SEPARATOR) {
        Some(index) => s.split_at(index),
        None => (s, "/"),
    }
}

// user@host style authorities are not supported.
fn extract_host(authority: &str) -> &str {
    if authority.contains('@') {
        return "";
    }
    authority
}
