//! Persistence contract for rendered audit records.
//!
//! Durable sinks are write-once: storing identical bytes under an existing
//! key returns the same reference, storing different bytes under it fails
//! with `StorageError::Conflict` and leaves the original untouched.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit_sink_file::FileSink;
use crate::audit_sink_sled::SledSink;
use crate::config::SinkConfig;
use crate::errors::StorageError;
use crate::path_resolver::{encode_path, encode_segment, StorageKey};

pub const NULL_SCHEME: &str = "audit-null://";

/// Hex SHA-256 of rendered record bytes.
pub fn content_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Opaque handle proving a record was accepted by a sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkReference(String);

impl SinkReference {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SinkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tells a blocking write that nobody is waiting for it any more.
///
/// Sinks that hand work to `spawn_blocking` keep writing after the awaiting
/// future is dropped. They check the flag just before publishing and give up
/// if it is set, so a timed-out store leaves nothing behind unless the drop
/// lands inside the publish call itself.
#[derive(Debug, Clone, Default)]
pub struct AbandonFlag(Arc<AtomicBool>);

impl AbandonFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Sets the flag when the returned guard is dropped without `disarm`.
    pub fn on_drop(&self) -> AbandonOnDrop {
        AbandonOnDrop {
            flag: Some(self.clone()),
        }
    }
}

#[derive(Debug)]
pub struct AbandonOnDrop {
    flag: Option<AbandonFlag>,
}

impl AbandonOnDrop {
    /// The write finished; nothing to abandon.
    pub fn disarm(mut self) {
        self.flag = None;
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.set();
        }
    }
}

pub trait AuditSink: Send + Sync {
    /// The reference a successful store of `key` returns. Pure.
    fn reference_for(&self, key: &StorageKey) -> SinkReference;

    /// Durably store `data` under `key`.
    fn store(
        &self,
        key: &StorageKey,
        data: &[u8],
    ) -> impl Future<Output = Result<SinkReference, StorageError>> + Send;
}

impl<S: AuditSink> AuditSink for Arc<S> {
    fn reference_for(&self, key: &StorageKey) -> SinkReference {
        (**self).reference_for(key)
    }

    fn store(
        &self,
        key: &StorageKey,
        data: &[u8],
    ) -> impl Future<Output = Result<SinkReference, StorageError>> + Send {
        (**self).store(key, data)
    }
}

/// Sink for disabled auditing: accepts everything, writes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn reference_for(&self, key: &StorageKey) -> SinkReference {
        SinkReference::new(format!(
            "{NULL_SCHEME}{}/{}",
            encode_segment(key.resource_type()),
            encode_path(key.path())
        ))
    }

    async fn store(&self, key: &StorageKey, data: &[u8]) -> Result<SinkReference, StorageError> {
        tracing::trace!(key = %key, bytes = data.len(), "auditing disabled, record discarded");
        Ok(self.reference_for(key))
    }
}

/// The sink chosen by configuration.
#[derive(Debug, Clone)]
pub enum SinkBackend {
    File(FileSink),
    Sled(SledSink),
    Null(NullSink),
}

impl SinkBackend {
    pub fn from_config(config: &SinkConfig) -> Result<Self, StorageError> {
        match config {
            SinkConfig::File { root } => Ok(SinkBackend::File(FileSink::new(root)?)),
            SinkConfig::Sled { path, tree } => Ok(SinkBackend::Sled(SledSink::open(path, tree)?)),
            SinkConfig::Null => Ok(SinkBackend::Null(NullSink)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SinkBackend::File(_) => "file",
            SinkBackend::Sled(_) => "sled",
            SinkBackend::Null(_) => "null",
        }
    }

    /// Read a record back by the reference `store` returned.
    pub async fn fetch(&self, reference: &SinkReference) -> Result<Vec<u8>, StorageError> {
        match self {
            SinkBackend::File(sink) => sink.fetch(reference).await,
            SinkBackend::Sled(sink) => sink.fetch(reference).await,
            SinkBackend::Null(_) => Err(StorageError::not_found(reference.as_str())),
        }
    }

    /// Read a record back by its rendered storage key.
    pub async fn fetch_key(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match self {
            SinkBackend::File(sink) => sink.fetch_key(key).await,
            SinkBackend::Sled(sink) => sink.fetch_key(key).await,
            SinkBackend::Null(_) => Err(StorageError::not_found(key)),
        }
    }
}

impl AuditSink for SinkBackend {
    fn reference_for(&self, key: &StorageKey) -> SinkReference {
        match self {
            SinkBackend::File(sink) => sink.reference_for(key),
            SinkBackend::Sled(sink) => sink.reference_for(key),
            SinkBackend::Null(sink) => sink.reference_for(key),
        }
    }

    async fn store(&self, key: &StorageKey, data: &[u8]) -> Result<SinkReference, StorageError> {
        match self {
            SinkBackend::File(sink) => sink.store(key, data).await,
            SinkBackend::Sled(sink) => sink.store(key, data).await,
            SinkBackend::Null(sink) => sink.store(key, data).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn key(resource_type: &str, path: &str) -> StorageKey {
        let when = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        StorageKey::new(resource_type, path, when, "0123")
    }

    #[tokio::test]
    async fn null_sink_returns_placeholder_reference() {
        let reference = NullSink.store(&key("Package", "foo/1.0.0"), b"{}").await.unwrap();
        assert_eq!(reference.as_str(), "audit-null://Package/foo/1.0.0");
    }

    #[tokio::test]
    async fn null_sink_escapes_reserved_characters() {
        let reference = NullSink
            .store(&key("Package", "foo bar/1.0.0?x"), b"{}")
            .await
            .unwrap();
        assert_eq!(reference.as_str(), "audit-null://Package/foo%20bar/1.0.0%3Fx");
    }

    #[test]
    fn null_reference_ignores_time_and_disambiguator() {
        let a = StorageKey::new("User", "alice", Utc::now(), "aaa");
        let b = StorageKey::new("User", "alice", Utc::now(), "bbb");
        assert_eq!(NullSink.reference_for(&a), NullSink.reference_for(&b));
    }

    #[tokio::test]
    async fn null_backend_has_nothing_to_fetch() {
        let backend = SinkBackend::from_config(&SinkConfig::Null).unwrap();
        assert_eq!(backend.kind(), "null");
        let reference = backend.store(&key("User", "alice"), b"{}").await.unwrap();
        assert!(matches!(
            backend.fetch(&reference).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn dropped_guard_abandons_the_write() {
        let flag = AbandonFlag::new();
        drop(flag.on_drop());
        assert!(flag.is_set());

        let finished = AbandonFlag::new();
        finished.on_drop().disarm();
        assert!(!finished.is_set());
    }
}
