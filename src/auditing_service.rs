//! Orchestrates one audit record: capture -> wrap -> render -> resolve -> store.
//!
//! Every call is an independent transaction. Rendering completes in memory
//! before the sink is touched, so a serialization failure never leaves a
//! partial record behind. The store step is the only suspend point and the
//! only place a timeout or cancellation can land. Blocking sinks abandon
//! their write when the store future is dropped, so a timed-out record is
//! normally not stored; the exception is a drop that races the final
//! publish call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::audit::AuditEvent;
use crate::audit_sink::{content_digest, AuditSink, SinkBackend, SinkReference};
use crate::config::AuditConfig;
use crate::envelope::EventEnvelope;
use crate::environment::{EnvironmentCapture, ProcessEnvironment};
use crate::errors::{AuditResult, SerializationError, StorageError};
use crate::path_resolver::{PathResolver, StorageKey};
use crate::serializer::{Serializer, SerializerSettings};

/// Where a record is in its single pass through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStage {
    Pending,
    Rendered,
    Stored,
    Failed,
}

impl fmt::Display for RecordStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordStage::Pending => "pending",
            RecordStage::Rendered => "rendered",
            RecordStage::Stored => "stored",
            RecordStage::Failed => "failed",
        })
    }
}

/// A fully rendered record that has not been stored yet.
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    key: StorageKey,
    bytes: Vec<u8>,
    digest: String,
}

impl PreparedRecord {
    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex SHA-256 of `bytes`
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

pub struct AuditingService<S, C = ProcessEnvironment> {
    sink: S,
    environment: C,
    serializer: Serializer,
    resolver: PathResolver,
    store_timeout: Option<Duration>,
}

impl<S: AuditSink> AuditingService<S, ProcessEnvironment> {
    pub fn new(sink: S) -> Self {
        Self::with_environment(sink, ProcessEnvironment::default())
    }
}

impl AuditingService<SinkBackend, ProcessEnvironment> {
    /// Validates `config`, then builds the sink, serializer and timeout it describes.
    pub fn from_config(config: &AuditConfig) -> AuditResult<Self> {
        config.validate()?;
        let sink = SinkBackend::from_config(&config.sink)?;
        Ok(
            Self::with_environment(sink, ProcessEnvironment::new(&config.application))
                .with_serializer(config.serializer.clone())
                .with_store_timeout(config.store_timeout()),
        )
    }
}

impl<S: AuditSink, C: EnvironmentCapture> AuditingService<S, C> {
    pub fn with_environment(sink: S, environment: C) -> Self {
        Self {
            sink,
            environment,
            serializer: Serializer::default(),
            resolver: PathResolver::new(),
            store_timeout: None,
        }
    }

    pub fn with_serializer(mut self, settings: SerializerSettings) -> Self {
        self.serializer = Serializer::new(settings);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Capture, wrap, render and resolve without storing.
    pub fn prepare<E: AuditEvent>(&self, event: &E) -> Result<PreparedRecord, SerializationError> {
        let environment = self.environment.capture();
        let when = environment.timestamp;
        let envelope = EventEnvelope::wrap(event, environment);

        let bytes = self.serializer.render(&envelope)?;
        let key = self.resolver.resolve(event, when);
        let digest = content_digest(&bytes);

        Ok(PreparedRecord { key, bytes, digest })
    }

    /// Record an event and return the sink's reference to it.
    #[tracing::instrument(
        level = "debug",
        name = "audit_record",
        skip_all,
        fields(resource_type = event.resource_type(), path = event.path())
    )]
    pub async fn record<E: AuditEvent>(&self, event: &E) -> AuditResult<SinkReference> {
        tracing::debug!(stage = %RecordStage::Pending, "capturing environment");

        let prepared = match self.prepare(event) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(stage = %RecordStage::Failed, error = %e, "audit record rejected");
                return Err(e.into());
            }
        };
        tracing::debug!(
            stage = %RecordStage::Rendered,
            key = %prepared.key,
            bytes = prepared.bytes.len(),
            "audit record rendered"
        );

        Ok(store_prepared(&self.sink, self.store_timeout, &prepared).await?)
    }

    /// Store a record produced by `prepare`.
    ///
    /// The key is fixed by `prepare`, so committing the same record again
    /// after a timeout either stores it or returns the reference of the copy
    /// that did land. It never produces a second entry.
    pub async fn commit(&self, prepared: &PreparedRecord) -> AuditResult<SinkReference> {
        Ok(store_prepared(&self.sink, self.store_timeout, prepared).await?)
    }
}

impl<S, C> AuditingService<S, C>
where
    S: AuditSink + 'static,
    C: EnvironmentCapture + 'static,
{
    /// Fire-and-forget recording.
    ///
    /// Capture and rendering run on the caller's task (so a scoped actor is
    /// seen and serialization errors come back immediately); only the store
    /// step is spawned. Store failures are logged and also carried by the
    /// returned handle.
    pub fn spawn_record<E: AuditEvent>(
        self: &Arc<Self>,
        event: &E,
    ) -> Result<JoinHandle<Result<SinkReference, StorageError>>, SerializationError> {
        let prepared = self.prepare(event)?;
        let service = Arc::clone(self);

        Ok(tokio::spawn(async move {
            store_prepared(&service.sink, service.store_timeout, &prepared).await
        }))
    }
}

async fn store_prepared<S: AuditSink>(
    sink: &S,
    timeout: Option<Duration>,
    prepared: &PreparedRecord,
) -> Result<SinkReference, StorageError> {
    let store = sink.store(&prepared.key, &prepared.bytes);
    let outcome = match timeout {
        Some(after) => tokio::time::timeout(after, store)
            .await
            .unwrap_or(Err(StorageError::Timeout { after })),
        None => store.await,
    };

    match &outcome {
        Ok(reference) => tracing::info!(
            stage = %RecordStage::Stored,
            key = %prepared.key,
            reference = %reference,
            bytes = prepared.bytes.len(),
            digest = %prepared.digest,
            "audit record stored"
        ),
        Err(e) => tracing::error!(
            stage = %RecordStage::Failed,
            key = %prepared.key,
            error = %e,
            "audit record not stored"
        ),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::StructuredEvent;
    use crate::audit_sink::NullSink;
    use crate::environment::{EnvironmentSnapshot, FixedEnvironment};
    use crate::errors::AuditError;
    use chrono::{TimeZone, Utc};

    fn fixed() -> FixedEnvironment {
        FixedEnvironment::new(EnvironmentSnapshot {
            actor: "alice".into(),
            client_ip_address: Some("10.0.0.7".into()),
            machine: "build-01".into(),
            process_id: 42,
            application: "gallery".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    /// Never finishes storing.
    struct StalledSink;

    impl AuditSink for StalledSink {
        fn reference_for(&self, key: &StorageKey) -> SinkReference {
            SinkReference::new(key.to_string())
        }

        async fn store(&self, _key: &StorageKey, _data: &[u8]) -> Result<SinkReference, StorageError> {
            std::future::pending().await
        }
    }

    #[test]
    fn stage_names() {
        assert_eq!(RecordStage::Rendered.to_string(), "rendered");
        assert_eq!(RecordStage::Failed.to_string(), "failed");
    }

    #[test]
    fn prepare_renders_and_keys_the_event() {
        let service = AuditingService::with_environment(NullSink, fixed());
        let event = StructuredEvent::new("Package", "foo/1.0.0").with_action("Deleted");

        let prepared = service.prepare(&event).unwrap();
        let text = std::str::from_utf8(prepared.bytes()).unwrap();
        assert!(text.contains(r#""GetClientIpAddress":"10.0.0.7""#));
        assert!(prepared
            .key()
            .as_str()
            .starts_with("Package/foo/1.0.0-20240101000000-"));
        assert_eq!(prepared.digest(), content_digest(prepared.bytes()));
    }

    #[tokio::test]
    async fn null_sink_record_succeeds() {
        let service = AuditingService::with_environment(NullSink, fixed());
        let event = StructuredEvent::new("User", "alice").with_action("Deleted");
        let reference = service.record(&event).await.unwrap();
        assert_eq!(reference.as_str(), "audit-null://User/alice");
    }

    #[tokio::test]
    async fn store_timeout_fails_the_record() {
        let service = AuditingService::with_environment(StalledSink, fixed())
            .with_store_timeout(Some(Duration::from_millis(20)));
        let event = StructuredEvent::new("User", "alice");

        let err = service.record(&event).await.unwrap_err();
        assert!(matches!(
            err,
            AuditError::Storage(StorageError::Timeout { .. })
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn caller_side_timeout_cancels_cleanly() {
        let service = AuditingService::with_environment(StalledSink, fixed());
        let event = StructuredEvent::new("User", "alice");

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), service.record(&event)).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn spawn_record_returns_handle_with_reference() {
        let service = Arc::new(AuditingService::with_environment(NullSink, fixed()));
        let event = StructuredEvent::new("User", "alice");

        let handle = service.spawn_record(&event).unwrap();
        let reference = handle.await.unwrap().unwrap();
        assert_eq!(reference.as_str(), "audit-null://User/alice");
    }

    #[test]
    fn from_config_refuses_invalid_settings() {
        let zero_timeout = AuditConfig {
            store_timeout_ms: Some(0),
            sink: crate::config::SinkConfig::Null,
            ..AuditConfig::default()
        };
        assert!(matches!(
            AuditingService::from_config(&zero_timeout),
            Err(AuditError::Config(_))
        ));

        let mut shallow = AuditConfig {
            sink: crate::config::SinkConfig::Null,
            ..AuditConfig::default()
        };
        shallow.serializer.max_depth = 1;
        assert!(matches!(
            AuditingService::from_config(&shallow),
            Err(AuditError::Config(_))
        ));
    }

    #[tokio::test]
    async fn commit_stores_the_prepared_key() {
        let service = AuditingService::with_environment(NullSink, fixed());
        let event = StructuredEvent::new("User", "alice");
        let prepared = service.prepare(&event).unwrap();

        let reference = service.commit(&prepared).await.unwrap();
        assert_eq!(reference, service.sink().reference_for(prepared.key()));
    }
}
