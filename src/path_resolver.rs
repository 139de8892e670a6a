//! Storage key derivation.
//!
//! `{ResourceType}/{Path}-{yyyyMMddHHmmss}-{disambiguator}`
//!
//! The disambiguator is a fresh UUID v4 per key, so concurrent writers for
//! the same resource within the same second never need to coordinate.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use uuid::Uuid;

use crate::audit::AuditEvent;

/// Everything outside `[A-Za-z0-9-_.~+]` is escaped inside a segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'+');

const EMPTY_SEGMENT: &str = "_";

pub const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Escape one key segment. `.` and `..` are escaped so keys stay under a sink root.
pub fn encode_segment(segment: &str) -> String {
    match segment {
        "" => EMPTY_SEGMENT.to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        other => utf8_percent_encode(other, SEGMENT).to_string(),
    }
}

/// Escape a `/`-separated path, keeping the separators and dropping empty segments.
pub fn encode_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(encode_segment)
        .collect();
    if segments.is_empty() {
        EMPTY_SEGMENT.to_string()
    } else {
        segments.join("/")
    }
}

/// Collision-resistant address of one record inside a sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    resource_type: String,
    path: String,
    stamp: String,
    disambiguator: String,
    rendered: String,
}

impl StorageKey {
    pub fn new(resource_type: &str, path: &str, when: DateTime<Utc>, disambiguator: &str) -> Self {
        let stamp = when.format(STAMP_FORMAT).to_string();
        let rendered = format!(
            "{}/{}-{}-{}",
            encode_segment(resource_type),
            encode_path(path),
            stamp,
            encode_segment(disambiguator),
        );
        Self {
            resource_type: resource_type.to_string(),
            path: path.to_string(),
            stamp,
            disambiguator: disambiguator.to_string(),
            rendered,
        }
    }

    /// The resource type as supplied by the event (unescaped).
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The path as supplied by the event (unescaped).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    pub fn disambiguator(&self) -> &str {
        &self.disambiguator
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

/// Derives keys. Holds no state and takes no locks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl PathResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve<E: AuditEvent + ?Sized>(&self, event: &E, when: DateTime<Utc>) -> StorageKey {
        let disambiguator = Uuid::new_v4().simple().to_string();
        StorageKey::new(event.resource_type(), event.path(), when, &disambiguator)
    }
}
