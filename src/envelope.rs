//! The persisted shape of an audit record: one domain event plus the
//! environment it was recorded in.
//!
//! Schema version 1 fields (fixed; historical records are never rewritten):
//! `Actor`, `Application`, `GetClientIpAddress`, `Machine`, `Path`,
//! `ProcessId`, `Record`, `ResourceType`, `SchemaVersion`, `Timestamp`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::audit::AuditEvent;
use crate::environment::EnvironmentSnapshot;
use crate::errors::SerializationError;

pub const AUDIT_SCHEMA_VERSION: u32 = 1;

/// Immutable pairing of an event with its captured environment.
#[derive(Debug, Clone)]
pub struct EventEnvelope<'a, E: AuditEvent> {
    event: &'a E,
    environment: EnvironmentSnapshot,
    schema_version: u32,
}

impl<'a, E: AuditEvent> EventEnvelope<'a, E> {
    /// Wraps an event. Never fails; empty identifiers are carried as-is.
    pub fn wrap(event: &'a E, environment: EnvironmentSnapshot) -> Self {
        Self {
            event,
            environment,
            schema_version: AUDIT_SCHEMA_VERSION,
        }
    }

    pub fn event(&self) -> &E {
        self.event
    }

    pub fn environment(&self) -> &EnvironmentSnapshot {
        &self.environment
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.environment.timestamp
    }
}

/// ISO-8601 UTC with a `Z` designator; sub-seconds only when present.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Serialize)]
struct RenderedEntry<'a, E: Serialize> {
    #[serde(rename = "SchemaVersion")]
    schema_version: u32,
    #[serde(rename = "ResourceType")]
    resource_type: &'a str,
    #[serde(rename = "Path")]
    path: &'a str,
    #[serde(rename = "Record")]
    record: &'a E,
    #[serde(rename = "Actor")]
    actor: &'a str,
    #[serde(rename = "GetClientIpAddress")]
    client_ip_address: Option<&'a str>,
    #[serde(rename = "Machine")]
    machine: &'a str,
    #[serde(rename = "ProcessId")]
    process_id: u32,
    #[serde(rename = "Application")]
    application: &'a str,
    #[serde(rename = "Timestamp")]
    timestamp: String,
}

impl<E: AuditEvent> Serialize for EventEnvelope<'_, E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let env = &self.environment;
        RenderedEntry {
            schema_version: self.schema_version,
            resource_type: self.event.resource_type(),
            path: self.event.path(),
            record: self.event,
            actor: &env.actor,
            client_ip_address: env.client_ip_address.as_deref(),
            machine: &env.machine,
            process_id: env.process_id,
            application: &env.application,
            timestamp: format_timestamp(&env.timestamp),
        }
        .serialize(serializer)
    }
}

/// A rendered record read back from a sink.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "SchemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Record")]
    pub record: Value,
    #[serde(rename = "Actor")]
    pub actor: String,
    #[serde(rename = "GetClientIpAddress", default)]
    pub client_ip_address: Option<String>,
    #[serde(rename = "Machine")]
    pub machine: String,
    #[serde(rename = "ProcessId")]
    pub process_id: u32,
    #[serde(rename = "Application")]
    pub application: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SerializationError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SerializationError::unserializable("parsing audit entry", e))
    }
}
