// audit.rs
// The capability every recordable domain event exposes to the pipeline

use serde::Serialize;
use serde_json::{Map, Value};

/// A domain event that can be recorded.
///
/// The event's own serde representation becomes the `Record` object of the
/// rendered entry. `resource_type` and `path` address the record inside a
/// sink; both may be empty.
pub trait AuditEvent: Serialize + Send + Sync {
    fn resource_type(&self) -> &str;

    fn path(&self) -> &str;
}

impl<T: AuditEvent + ?Sized> AuditEvent for &T {
    fn resource_type(&self) -> &str {
        (**self).resource_type()
    }

    fn path(&self) -> &str {
        (**self).path()
    }
}

/// Untyped audit event for producers without their own record types.
///
/// Renders as `{"Action": ..., <payload fields>}`. The resource type and
/// path are carried at the top level of the entry, not repeated here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StructuredEvent {
    #[serde(skip)]
    pub resource_type: String,
    #[serde(skip)]
    pub path: String,
    pub action: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl StructuredEvent {
    pub fn new(resource_type: &str, path: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            path: path.to_string(),
            action: None,
            payload: Map::new(),
        }
    }

    /// Sets the action name
    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    /// Adds a single payload field
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.payload.insert(name.to_string(), value);
        self
    }

    /// Merges an object into the payload. Non-object values land under `Payload`.
    pub fn with_payload(mut self, payload: Value) -> Self {
        match payload {
            Value::Object(map) => self.payload.extend(map),
            Value::Null => {}
            other => {
                self.payload.insert("Payload".to_string(), other);
            }
        }
        self
    }
}

impl AuditEvent for StructuredEvent {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn path(&self) -> &str {
        &self.path
    }
}
