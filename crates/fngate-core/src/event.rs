//! Wire representation of platform events.
//!
//! Events are created by callers, validated before transmission and never
//! mutated afterwards. `data` is kept as a raw JSON value so that payloads
//! arriving from untyped sources can be reported on by validation instead
//! of being rejected by deserialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

/// A named event with an arbitrary JSON payload.
///
/// # Example
///
/// ```
/// use fngate_core::Event;
/// use serde_json::json;
///
/// let event = Event::new("user.created").with_data(json!({"userId": "u1"}));
/// assert_eq!(event.name, "user.created");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `user.created`.
    #[serde(default)]
    pub name: String,

    /// Event payload. Must be a JSON object (possibly empty).
    #[serde(default)]
    pub data: Value,

    /// Optional user the event refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<EventUser>,

    /// Timestamp in unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,

    /// Idempotency id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Payload schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<String>,
}

impl Event {
    /// Creates an event with an empty object payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Object(Map::new()),
            user: None,
            ts: None,
            id: None,
            v: None,
        }
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Serializes `payload` into the event data.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Validation`] with a `SERIALIZATION_ERROR` entry
    /// if the payload cannot be represented as JSON.
    pub fn with_payload<T: Serialize>(self, payload: &T) -> Result<Self, EventError> {
        let data = serde_json::to_value(payload).map_err(|e| EventError::Validation {
            report: crate::validation::ValidationResult::single(
                crate::validation::ValidationErrorDetail::new(
                    "event.data",
                    crate::validation::ValidationCode::SerializationError,
                    format!("payload is not serializable: {e}"),
                ),
            ),
        })?;
        Ok(self.with_data(data))
    }

    /// Attaches a user.
    #[must_use]
    pub fn with_user(mut self, user: EventUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Sets the idempotency id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the timestamp in unix milliseconds.
    #[must_use]
    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Sets the payload version.
    #[must_use]
    pub fn with_version(mut self, v: impl Into<String>) -> Self {
        self.v = Some(v.into());
        self
    }

    /// Returns a field of the payload, if the payload is an object.
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_object().and_then(|map| map.get(key))
    }
}

/// User attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUser {
    /// User identifier. Required and non-empty when a user is present.
    #[serde(default)]
    pub id: String,

    /// Optional email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Any additional user attributes.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl EventUser {
    /// Creates a user with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), email: None, attributes: Map::new() }
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Acknowledgement returned by the platform for a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Platform-assigned ids, one per event in request order.
    #[serde(default)]
    pub ids: Vec<String>,

    /// Status reported by the platform.
    #[serde(default)]
    pub status: u16,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn minimal_event_serializes_without_optionals() {
        let event = Event::new("user.created");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value, json!({"name": "user.created", "data": {}}));
    }

    #[test]
    fn missing_data_deserializes_as_null() {
        let event: Event = serde_json::from_value(json!({"name": "a.b"})).unwrap();
        assert!(event.data.is_null());
    }

    #[test]
    fn user_keeps_extra_attributes() {
        let event: Event = serde_json::from_value(json!({
            "name": "user.created",
            "data": {},
            "user": {"id": "u1", "email": "a@example.com", "plan": "pro"}
        }))
        .unwrap();

        let user = event.user.unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
        assert_eq!(user.attributes.get("plan"), Some(&json!("pro")));
    }

    #[test]
    fn data_field_reads_object_payload() {
        let event = Event::new("order.paid").with_data(json!({"orderId": 7}));
        assert_eq!(event.data_field("orderId"), Some(&json!(7)));
        assert_eq!(event.data_field("missing"), None);
    }
}
