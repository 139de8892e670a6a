//! Deterministic rendering of envelopes to bytes.
//!
//! The envelope is lowered to a `serde_json::Value` through a depth-limited
//! serializer, so an over-deep payload is refused before it is walked. The
//! tree is then optionally stripped of nulls and written canonically.
//! Nothing reaches a sink until this has succeeded in full.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::AuditEvent;
use crate::canonicalize::{canonicalize_json, canonicalize_json_pretty};
use crate::depth_limit::{to_value_limited, DepthGuard};
use crate::envelope::EventEnvelope;
use crate::errors::SerializationError;

pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateHandling {
    /// ISO-8601, UTC, `Z` designator
    #[default]
    IsoUtc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullHandling {
    /// Null fields are written out so absence and null stay distinguishable
    #[default]
    Include,
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumHandling {
    #[default]
    AsString,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formatting {
    #[default]
    Compact,
    Indented,
}

/// Rendering options, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerSettings {
    pub date_handling: DateHandling,
    pub null_handling: NullHandling,
    pub enum_handling: EnumHandling,
    pub max_depth: usize,
    pub formatting: Formatting,
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            date_handling: DateHandling::IsoUtc,
            null_handling: NullHandling::Include,
            enum_handling: EnumHandling::AsString,
            max_depth: DEFAULT_MAX_DEPTH,
            formatting: Formatting::Compact,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Serializer {
    settings: SerializerSettings,
}

impl Serializer {
    pub fn new(settings: SerializerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SerializerSettings {
        &self.settings
    }

    /// Render an envelope. Same envelope, same bytes.
    pub fn render<E: AuditEvent>(
        &self,
        envelope: &EventEnvelope<'_, E>,
    ) -> Result<Vec<u8>, SerializationError> {
        let max = self.settings.max_depth;
        let guard = DepthGuard::new(max);
        let mut value = to_value_limited(envelope, &guard).map_err(|e| match guard.exceeded() {
            Some(depth) => SerializationError::DepthExceeded { depth, max },
            None => SerializationError::unserializable("rendering audit envelope", e),
        })?;

        // The finished tree must agree with the guard
        check_depth(&value, max)?;

        if self.settings.null_handling == NullHandling::Ignore {
            strip_nulls(&mut value);
        }

        let text = match self.settings.formatting {
            Formatting::Compact => canonicalize_json(&value)?,
            Formatting::Indented => canonicalize_json_pretty(&value)?,
        };
        Ok(text.into_bytes())
    }
}

/// Containers count one level each; the envelope object itself is depth 1.
fn check_depth(root: &Value, max: usize) -> Result<(), SerializationError> {
    let mut stack: Vec<(&Value, usize)> = vec![(root, 1)];
    while let Some((value, depth)) = stack.pop() {
        let children: Box<dyn Iterator<Item = &Value>> = match value {
            Value::Object(map) => Box::new(map.values()),
            Value::Array(arr) => Box::new(arr.iter()),
            _ => continue,
        };
        if depth > max {
            return Err(SerializationError::DepthExceeded { depth, max });
        }
        for child in children {
            if child.is_object() || child.is_array() {
                stack.push((child, depth + 1));
            }
        }
    }
    Ok(())
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(arr) => arr.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::StructuredEvent;
    use crate::environment::EnvironmentSnapshot;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    fn snapshot() -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            actor: "alice".into(),
            client_ip_address: None,
            machine: "build-01".into(),
            process_id: 42,
            application: "gallery".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn nested(levels: usize) -> Value {
        let mut value = json!("leaf");
        for _ in 0..levels {
            value = json!({ "inner": value });
        }
        value
    }

    #[test]
    fn renders_canonical_compact_bytes() {
        let event = StructuredEvent::new("Package", "foo/1.0.0").with_action("Deleted");
        let envelope = EventEnvelope::wrap(&event, snapshot());
        let bytes = Serializer::default().render(&envelope).unwrap();

        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"Actor":"alice","Application":"gallery","GetClientIpAddress":null,"Machine":"build-01","Path":"foo/1.0.0","ProcessId":42,"Record":{"Action":"Deleted"},"ResourceType":"Package","SchemaVersion":1,"Timestamp":"2024-01-01T00:00:00Z"}"#
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        // HashMap iteration order varies between instances; output must not.
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..32 {
            a.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            b.insert(format!("k{i}"), i);
        }
        let first = StructuredEvent::new("T", "p").with_payload(serde_json::to_value(&a).unwrap());
        let second = StructuredEvent::new("T", "p").with_payload(serde_json::to_value(&b).unwrap());

        let serializer = Serializer::default();
        let one = serializer.render(&EventEnvelope::wrap(&first, snapshot())).unwrap();
        let two = serializer.render(&EventEnvelope::wrap(&first, snapshot())).unwrap();
        let three = serializer.render(&EventEnvelope::wrap(&second, snapshot())).unwrap();
        assert_eq!(one, two);
        assert_eq!(one, three);
    }

    #[test]
    fn payload_at_ceiling_renders() {
        // envelope(1) -> Record(2) -> eight nested objects = depth 10
        let event = StructuredEvent::new("T", "p").with_field("Data", nested(8));
        let envelope = EventEnvelope::wrap(&event, snapshot());
        assert!(Serializer::default().render(&envelope).is_ok());
    }

    #[test]
    fn payload_past_ceiling_is_rejected() {
        let event = StructuredEvent::new("T", "p").with_field("Data", nested(9));
        let envelope = EventEnvelope::wrap(&event, snapshot());
        let err = Serializer::default().render(&envelope).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::DepthExceeded { depth: 11, max: 10 }
        ));
    }

    #[test]
    fn arrays_count_towards_depth() {
        let event = StructuredEvent::new("T", "p").with_field("Data", json!([[[[]]]]));
        let envelope = EventEnvelope::wrap(&event, snapshot());
        let settings = SerializerSettings {
            max_depth: 5,
            ..SerializerSettings::default()
        };
        assert!(Serializer::new(settings).render(&envelope).is_err());
    }

    #[test]
    fn non_string_map_keys_are_unserializable() {
        #[derive(serde::Serialize)]
        struct Weird {
            map: HashMap<(u8, u8), u8>,
        }
        #[derive(serde::Serialize)]
        struct WeirdEvent {
            inner: Weird,
        }
        impl AuditEvent for WeirdEvent {
            fn resource_type(&self) -> &str {
                "T"
            }
            fn path(&self) -> &str {
                "p"
            }
        }

        let mut map = HashMap::new();
        map.insert((1, 2), 3);
        let event = WeirdEvent {
            inner: Weird { map },
        };
        let err = Serializer::default()
            .render(&EventEnvelope::wrap(&event, snapshot()))
            .unwrap_err();
        assert!(matches!(err, SerializationError::Unserializable { .. }));
    }

    #[test]
    fn ignore_nulls_drops_null_fields() {
        let event = StructuredEvent::new("T", "p");
        let settings = SerializerSettings {
            null_handling: NullHandling::Ignore,
            ..SerializerSettings::default()
        };
        let bytes = Serializer::new(settings)
            .render(&EventEnvelope::wrap(&event, snapshot()))
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("null"));
        assert!(text.contains(r#""Record":{}"#));
    }

    #[test]
    fn indented_output_parses_back_to_same_value() {
        let event = StructuredEvent::new("T", "p").with_action("Added");
        let envelope = EventEnvelope::wrap(&event, snapshot());
        let compact = Serializer::default().render(&envelope).unwrap();
        let indented = Serializer::new(SerializerSettings {
            formatting: Formatting::Indented,
            ..SerializerSettings::default()
        })
        .render(&envelope)
        .unwrap();

        let a: Value = serde_json::from_slice(&compact).unwrap();
        let b: Value = serde_json::from_slice(&indented).unwrap();
        assert_eq!(a, b);
        assert_ne!(compact, indented);
    }

    #[test]
    fn pathologically_deep_payload_is_refused_without_recursing() {
        let mut deep = json!(0);
        for _ in 0..100_000 {
            deep = Value::Array(vec![deep]);
        }
        let mut event = StructuredEvent::new("T", "p").with_field("Data", deep);

        let err = Serializer::default()
            .render(&EventEnvelope::wrap(&event, snapshot()))
            .unwrap_err();
        assert!(matches!(
            err,
            SerializationError::DepthExceeded { depth: 11, max: 10 }
        ));

        // Dropping a Value this deep recurses too; take it apart by hand
        let mut rest = event.payload.remove("Data");
        while let Some(Value::Array(mut items)) = rest {
            rest = items.pop();
        }
    }
}
