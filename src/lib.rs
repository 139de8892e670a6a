//! Library root for the `audit_recorder` crate
//! Immutable audit entries: capture, render, key, store

// Core error handling
pub mod errors;

// Events and their environment
pub mod audit;
pub mod environment;
pub mod envelope;

// Rendering
pub mod canonicalize;
pub mod depth_limit;
pub mod serializer;

// Addressing
pub mod path_resolver;

// Persistence
pub mod audit_sink;
pub mod audit_sink_file;
pub mod audit_sink_sled;

// Orchestration
pub mod auditing_service;

// Configuration & CLI
pub mod cli;
pub mod config;
pub mod config_loader;

// Logging
pub mod logging;


pub use audit::{AuditEvent, StructuredEvent};
pub use audit_sink::{AuditSink, NullSink, SinkBackend, SinkReference};
pub use audit_sink_file::FileSink;
pub use audit_sink_sled::SledSink;
pub use auditing_service::{AuditingService, PreparedRecord, RecordStage};
pub use envelope::{AuditEntry, EventEnvelope};
pub use environment::{
    with_actor, ActorContext, EnvironmentCapture, EnvironmentSnapshot, FixedEnvironment,
    ProcessEnvironment,
};
pub use errors::{AuditError, AuditResult, SerializationError, StorageError};
pub use path_resolver::{PathResolver, StorageKey};
pub use serializer::{Serializer, SerializerSettings};
