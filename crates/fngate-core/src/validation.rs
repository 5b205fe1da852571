//! Outbound event validation with full error accumulation.
//!
//! Validation never stops at the first problem: every check runs and every
//! failure lands in a [`ValidationErrorReporter`], which is turned into a
//! single [`ValidationResult`] once the pass is complete. Checks operate on
//! the JSON form of an event so that untyped inputs are reported the same
//! way as typed ones.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock},
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// Default upper bound for a serialized event, 1 MiB.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Pattern for event names in basic mode.
pub const BASIC_EVENT_NAME_PATTERN: &str = r"^[a-zA-Z0-9._-]+$";

/// Pattern for event names in strict mode (kebab-case segments joined by dots).
pub const STRICT_EVENT_NAME_PATTERN: &str = r"^[a-z0-9]+(\.[a-z0-9]+)*$";

/// Pattern for function ids.
pub const FUNCTION_ID_PATTERN: &str = r"^[a-z0-9]+(-[a-z0-9]+)*$";

static BASIC_EVENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(BASIC_EVENT_NAME_PATTERN).expect("static pattern compiles"));
static STRICT_EVENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(STRICT_EVENT_NAME_PATTERN).expect("static pattern compiles"));
static FUNCTION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FUNCTION_ID_PATTERN).expect("static pattern compiles"));

/// Returns whether `name` is an acceptable event name for the given mode.
pub fn is_valid_event_name(name: &str, strict: bool) -> bool {
    if strict {
        STRICT_EVENT_NAME.is_match(name)
    } else {
        BASIC_EVENT_NAME.is_match(name)
    }
}

/// Returns whether `id` is a kebab-case function id.
pub fn is_valid_function_id(id: &str) -> bool {
    FUNCTION_ID.is_match(id)
}

/// Machine-readable validation failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// A required field is absent, null or empty.
    RequiredField,
    /// A field has the wrong JSON type.
    InvalidType,
    /// A string does not match the expected format.
    InvalidFormat,
    /// A value is of the right type but out of range.
    InvalidValue,
    /// The serialized event exceeds the size limit.
    SizeExceeded,
    /// The event could not be serialized.
    SerializationError,
    /// A registered schema rejected the event.
    SchemaViolation,
    /// A batch contained no events.
    BatchEmpty,
    /// A batch contained more events than allowed.
    BatchTooLarge,
}

impl ValidationCode {
    /// Wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequiredField => "REQUIRED_FIELD",
            Self::InvalidType => "INVALID_TYPE",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidValue => "INVALID_VALUE",
            Self::SizeExceeded => "SIZE_EXCEEDED",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::BatchEmpty => "BATCH_EMPTY",
            Self::BatchTooLarge => "BATCH_TOO_LARGE",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Dotted path to the offending field, e.g. `events[2].user.id`.
    pub path: String,
    /// Human-readable description.
    pub message: String,
    /// What was expected, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// What was found, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    /// Failure code.
    pub code: ValidationCode,
}

impl ValidationErrorDetail {
    /// Creates a detail without expected/actual annotations.
    pub fn new(path: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into(), expected: None, actual: None, code }
    }

    /// Annotates the expected value.
    #[must_use]
    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Annotates the actual value.
    #[must_use]
    pub fn actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }
}

impl fmt::Display for ValidationErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)?;
        if let Some(expected) = &self.expected {
            write!(f, " (expected {expected}")?;
            if let Some(actual) = &self.actual {
                write!(f, ", got {actual}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Outcome of one complete validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Whether the pass found no errors.
    pub is_valid: bool,
    /// Every error found, in discovery order.
    pub errors: Vec<ValidationErrorDetail>,
    /// One-line summary for logs and error messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ValidationResult {
    /// A passing result.
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new(), summary: None }
    }

    /// Builds a result from collected errors.
    pub fn from_errors(errors: Vec<ValidationErrorDetail>) -> Self {
        if errors.is_empty() {
            return Self::valid();
        }

        let first = &errors[0];
        let summary = if errors.len() == 1 {
            format!("{}: {}", first.path, first.message)
        } else {
            format!("{} errors, first {}: {}", errors.len(), first.path, first.message)
        };

        Self { is_valid: false, errors, summary: Some(summary) }
    }

    /// A failing result with exactly one error.
    pub fn single(detail: ValidationErrorDetail) -> Self {
        Self::from_errors(vec![detail])
    }

    /// Returns the errors reported at `path`.
    pub fn errors_at<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a ValidationErrorDetail> {
        self.errors.iter().filter(move |e| e.path == path)
    }

    /// Whether an error with `code` was reported at `path`.
    pub fn has_error(&self, path: &str, code: ValidationCode) -> bool {
        self.errors_at(path).any(|e| e.code == code)
    }

    /// Multi-line report listing every error, for internal logs.
    pub fn detailed_report(&self) -> String {
        if self.is_valid {
            return "validation passed".to_string();
        }

        let mut report = format!("validation failed with {} error(s):", self.errors.len());
        for (index, error) in self.errors.iter().enumerate() {
            report.push_str(&format!("\n  {}. {error}", index + 1));
        }
        report
    }
}

/// Accumulates validation errors across a whole pass.
#[derive(Debug, Default)]
pub struct ValidationErrorReporter {
    errors: Vec<ValidationErrorDetail>,
}

impl ValidationErrorReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error.
    pub fn report(&mut self, detail: ValidationErrorDetail) {
        self.errors.push(detail);
    }

    /// Whether any error has been recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of recorded errors.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Finishes the pass.
    pub fn finish(self) -> ValidationResult {
        ValidationResult::from_errors(self.errors)
    }
}

/// Knobs that affect event validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOptions {
    /// Enforce strict event naming.
    pub strict: bool,
    /// Maximum serialized size of one event, in bytes.
    pub max_payload_bytes: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self { strict: false, max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES }
    }
}

type SchemaPredicate = dyn Fn(&Event) -> Result<(), String> + Send + Sync;
type SchemaTransform = dyn Fn(Event) -> Event + Send + Sync;

/// Schema registered for one event name.
///
/// The predicate runs only on events that passed structural validation.
/// The optional transform is applied to each event just before it is sent.
#[derive(Clone)]
pub struct EventSchema {
    predicate: Arc<SchemaPredicate>,
    transform: Option<Arc<SchemaTransform>>,
}

impl EventSchema {
    /// Creates a schema from a predicate returning a rejection message.
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&Event) -> Result<(), String> + Send + Sync + 'static,
    {
        Self { predicate: Arc::new(predicate), transform: None }
    }

    /// Adds a transform applied before send.
    #[must_use]
    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: Fn(Event) -> Event + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for EventSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSchema").field("has_transform", &self.transform.is_some()).finish()
    }
}

/// Validates outbound events against structure, naming, size and schemas.
#[derive(Debug, Clone, Default)]
pub struct EventValidator {
    options: ValidationOptions,
    schemas: HashMap<String, EventSchema>,
}

impl EventValidator {
    /// Creates a validator with no registered schemas.
    pub fn new(options: ValidationOptions) -> Self {
        Self { options, schemas: HashMap::new() }
    }

    /// Registers a schema for an event name, replacing any previous one.
    pub fn register_schema(&mut self, event_name: impl Into<String>, schema: EventSchema) {
        self.schemas.insert(event_name.into(), schema);
    }

    /// Active options.
    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Validates a single event, reporting under the path `event`.
    pub fn validate(&self, event: &Event) -> ValidationResult {
        let mut reporter = ValidationErrorReporter::new();
        self.validate_into(event, "event", &mut reporter);
        reporter.finish()
    }

    /// Validates every event of a batch under paths `events[i]`.
    ///
    /// An empty batch is reported as `BATCH_EMPTY`.
    pub fn validate_batch(&self, events: &[Event]) -> ValidationResult {
        let mut reporter = ValidationErrorReporter::new();
        if events.is_empty() {
            reporter.report(ValidationErrorDetail::new(
                "events",
                ValidationCode::BatchEmpty,
                "at least one event is required",
            ));
        }
        for (index, event) in events.iter().enumerate() {
            self.validate_into(event, &format!("events[{index}]"), &mut reporter);
        }
        reporter.finish()
    }

    /// Validates an untyped JSON event.
    pub fn validate_raw(&self, value: &Value) -> ValidationResult {
        let mut reporter = ValidationErrorReporter::new();
        let before = reporter.error_count();
        self.check_structure(value, "event", &mut reporter);
        self.check_size(value, "event", &mut reporter);
        if reporter.error_count() == before {
            if let Ok(event) = serde_json::from_value::<Event>(value.clone()) {
                self.check_schema(&event, "event", &mut reporter);
            }
        }
        reporter.finish()
    }

    /// Validates `event` and appends any failures to `reporter`.
    pub fn validate_into(&self, event: &Event, path: &str, reporter: &mut ValidationErrorReporter) {
        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                reporter.report(ValidationErrorDetail::new(
                    path,
                    ValidationCode::SerializationError,
                    format!("event is not serializable: {e}"),
                ));
                return;
            },
        };

        let before = reporter.error_count();
        self.check_structure(&value, path, reporter);
        self.check_size(&value, path, reporter);
        if reporter.error_count() == before {
            self.check_schema(event, path, reporter);
        }
    }

    /// Applies the registered transform for the event's name, if any.
    pub fn apply_transform(&self, event: Event) -> Event {
        match self.schemas.get(&event.name).and_then(|schema| schema.transform.clone()) {
            Some(transform) => transform(event),
            None => event,
        }
    }

    fn check_structure(&self, value: &Value, path: &str, reporter: &mut ValidationErrorReporter) {
        let Some(object) = value.as_object() else {
            reporter.report(
                ValidationErrorDetail::new(path, ValidationCode::InvalidType, "event must be an object")
                    .expected("object")
                    .actual(json_type(value)),
            );
            return;
        };

        let name_path = format!("{path}.name");
        match object.get("name") {
            None | Some(Value::Null) => reporter.report(ValidationErrorDetail::new(
                name_path,
                ValidationCode::RequiredField,
                "event name is required",
            )),
            Some(Value::String(name)) if name.trim().is_empty() => {
                reporter.report(
                    ValidationErrorDetail::new(
                        name_path,
                        ValidationCode::RequiredField,
                        "event name must be a non-empty string",
                    )
                    .expected("non-empty string")
                    .actual("empty string"),
                );
            },
            Some(Value::String(name)) => {
                if !is_valid_event_name(name, self.options.strict) {
                    let pattern = if self.options.strict {
                        STRICT_EVENT_NAME_PATTERN
                    } else {
                        BASIC_EVENT_NAME_PATTERN
                    };
                    reporter.report(
                        ValidationErrorDetail::new(
                            name_path,
                            ValidationCode::InvalidFormat,
                            "event name has an invalid format",
                        )
                        .expected(pattern)
                        .actual(name.clone()),
                    );
                }
            },
            Some(other) => reporter.report(
                ValidationErrorDetail::new(name_path, ValidationCode::InvalidType, "event name must be a string")
                    .expected("string")
                    .actual(json_type(other)),
            ),
        }

        let data_path = format!("{path}.data");
        match object.get("data") {
            None | Some(Value::Null) => reporter.report(ValidationErrorDetail::new(
                data_path,
                ValidationCode::RequiredField,
                "event data is required (use an empty object for no data)",
            )),
            Some(Value::Object(_)) => {},
            Some(other) => reporter.report(
                ValidationErrorDetail::new(data_path, ValidationCode::InvalidType, "event data must be an object")
                    .expected("object")
                    .actual(json_type(other)),
            ),
        }

        match object.get("user") {
            None | Some(Value::Null) => {},
            Some(Value::Object(user)) => {
                let id_path = format!("{path}.user.id");
                match user.get("id") {
                    None | Some(Value::Null) => reporter.report(ValidationErrorDetail::new(
                        id_path,
                        ValidationCode::RequiredField,
                        "user id is required when a user is present",
                    )),
                    Some(Value::String(id)) if id.trim().is_empty() => {
                        reporter.report(ValidationErrorDetail::new(
                            id_path,
                            ValidationCode::RequiredField,
                            "user id must be a non-empty string",
                        ));
                    },
                    Some(Value::String(_)) => {},
                    Some(other) => reporter.report(
                        ValidationErrorDetail::new(id_path, ValidationCode::InvalidType, "user id must be a string")
                            .expected("string")
                            .actual(json_type(other)),
                    ),
                }
            },
            Some(other) => reporter.report(
                ValidationErrorDetail::new(
                    format!("{path}.user"),
                    ValidationCode::InvalidType,
                    "user must be an object",
                )
                .expected("object")
                .actual(json_type(other)),
            ),
        }

        match object.get("ts") {
            None | Some(Value::Null) => {},
            Some(Value::Number(number)) => match number.as_i64() {
                Some(ts) if ts >= 0 => {},
                _ => reporter.report(
                    ValidationErrorDetail::new(
                        format!("{path}.ts"),
                        ValidationCode::InvalidValue,
                        "timestamp must be a non-negative integer",
                    )
                    .expected(">= 0")
                    .actual(number.to_string()),
                ),
            },
            Some(other) => reporter.report(
                ValidationErrorDetail::new(
                    format!("{path}.ts"),
                    ValidationCode::InvalidType,
                    "timestamp must be a number",
                )
                .expected("integer")
                .actual(json_type(other)),
            ),
        }

        for field in ["id", "v"] {
            match object.get(field) {
                None | Some(Value::Null | Value::String(_)) => {},
                Some(other) => reporter.report(
                    ValidationErrorDetail::new(
                        format!("{path}.{field}"),
                        ValidationCode::InvalidType,
                        format!("`{field}` must be a string"),
                    )
                    .expected("string")
                    .actual(json_type(other)),
                ),
            }
        }
    }

    fn check_size(&self, value: &Value, path: &str, reporter: &mut ValidationErrorReporter) {
        match serde_json::to_vec(value) {
            Ok(bytes) if bytes.len() > self.options.max_payload_bytes => reporter.report(
                ValidationErrorDetail::new(
                    path,
                    ValidationCode::SizeExceeded,
                    "serialized event exceeds the size limit",
                )
                .expected(format!("<= {} bytes", self.options.max_payload_bytes))
                .actual(format!("{} bytes", bytes.len())),
            ),
            Ok(_) => {},
            Err(e) => reporter.report(ValidationErrorDetail::new(
                path,
                ValidationCode::SerializationError,
                format!("event is not serializable: {e}"),
            )),
        }
    }

    fn check_schema(&self, event: &Event, path: &str, reporter: &mut ValidationErrorReporter) {
        if let Some(schema) = self.schemas.get(&event.name) {
            if let Err(message) = (schema.predicate)(event) {
                reporter.report(ValidationErrorDetail::new(
                    format!("{path}.data"),
                    ValidationCode::SchemaViolation,
                    message,
                ));
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::EventUser;

    fn validator(strict: bool) -> EventValidator {
        EventValidator::new(ValidationOptions { strict, ..ValidationOptions::default() })
    }

    #[test]
    fn valid_event_passes() {
        let event = Event::new("user.created").with_data(json!({"userId": "u1"}));
        let result = validator(true).validate(&event);

        assert!(result.is_valid, "{}", result.detailed_report());
        assert!(result.summary.is_none());
    }

    #[test]
    fn empty_name_reports_required_field() {
        let result = validator(false).validate(&Event::new(""));

        assert!(!result.is_valid);
        assert!(result.has_error("event.name", ValidationCode::RequiredField));
    }

    #[test]
    fn all_errors_are_accumulated() {
        let raw = json!({
            "name": 42,
            "data": null,
            "user": {"id": ""},
            "ts": -5,
            "id": 7,
            "v": true
        });

        let result = validator(false).validate_raw(&raw);

        assert_eq!(result.errors.len(), 6, "{}", result.detailed_report());
        assert!(result.has_error("event.name", ValidationCode::InvalidType));
        assert!(result.has_error("event.data", ValidationCode::RequiredField));
        assert!(result.has_error("event.user.id", ValidationCode::RequiredField));
        assert!(result.has_error("event.ts", ValidationCode::InvalidValue));
        assert!(result.has_error("event.id", ValidationCode::InvalidType));
        assert!(result.has_error("event.v", ValidationCode::InvalidType));
    }

    #[test]
    fn strict_mode_rejects_uppercase_names() {
        let event = Event::new("User.Created");

        assert!(validator(false).validate(&event).is_valid);

        let strict = validator(true).validate(&event);
        assert!(strict.has_error("event.name", ValidationCode::InvalidFormat));
        assert_eq!(strict.errors[0].expected.as_deref(), Some(STRICT_EVENT_NAME_PATTERN));
    }

    #[test]
    fn basic_mode_rejects_spaces_and_slashes() {
        assert!(!is_valid_event_name("user created", false));
        assert!(!is_valid_event_name("app/user.created", false));
        assert!(is_valid_event_name("user_created-v2.ok", false));
    }

    #[test]
    fn data_must_be_an_object() {
        let event = Event::new("a.b").with_data(json!([1, 2, 3]));
        let result = validator(false).validate(&event);

        assert!(result.has_error("event.data", ValidationCode::InvalidType));
    }

    #[test]
    fn empty_data_object_is_allowed() {
        let event = Event::new("a.b").with_data(json!({}));
        assert!(validator(false).validate(&event).is_valid);
    }

    #[test]
    fn user_without_id_is_rejected() {
        let event = Event::new("a.b").with_user(EventUser::new(""));
        let result = validator(false).validate(&event);

        assert!(result.has_error("event.user.id", ValidationCode::RequiredField));
    }

    #[test]
    fn oversized_event_is_rejected() {
        let validator =
            EventValidator::new(ValidationOptions { strict: false, max_payload_bytes: 64 });
        let event = Event::new("big.event").with_data(json!({"blob": "x".repeat(100)}));

        let result = validator.validate(&event);
        let error = result.errors_at("event").next().unwrap();
        assert_eq!(error.code, ValidationCode::SizeExceeded);
        assert_eq!(error.expected.as_deref(), Some("<= 64 bytes"));
    }

    #[test]
    fn batch_paths_are_indexed() {
        let events = vec![Event::new("ok.event"), Event::new(""), Event::new("ok.too")];
        let result = validator(false).validate_batch(&events);

        assert_eq!(result.errors.len(), 1);
        assert!(result.has_error("events[1].name", ValidationCode::RequiredField));
    }

    #[test]
    fn empty_batch_is_rejected() {
        let result = validator(false).validate_batch(&[]);
        assert!(result.has_error("events", ValidationCode::BatchEmpty));
    }

    #[test]
    fn schema_predicate_and_transform() {
        let mut validator = validator(false);
        validator.register_schema(
            "order.paid",
            EventSchema::new(|event| match event.data_field("amount") {
                Some(Value::Number(_)) => Ok(()),
                _ => Err("amount must be a number".to_string()),
            })
            .with_transform(|event| event.with_version("2024-01-01")),
        );

        let bad = Event::new("order.paid").with_data(json!({"amount": "ten"}));
        let result = validator.validate(&bad);
        assert!(result.has_error("event.data", ValidationCode::SchemaViolation));

        let good = Event::new("order.paid").with_data(json!({"amount": 10}));
        assert!(validator.validate(&good).is_valid);
        assert_eq!(validator.apply_transform(good).v.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn detailed_report_lists_every_error() {
        let result = validator(false).validate_raw(&json!({"name": "", "data": "nope"}));
        let report = result.detailed_report();

        assert!(report.starts_with("validation failed with 2 error(s):"));
        assert!(report.contains("[REQUIRED_FIELD] event.name"));
        assert!(report.contains("[INVALID_TYPE] event.data"));
    }

    #[test]
    fn function_id_pattern() {
        assert!(is_valid_function_id("send-welcome"));
        assert!(is_valid_function_id("v2"));
        assert!(!is_valid_function_id("Send-Welcome"));
        assert!(!is_valid_function_id("send--welcome"));
        assert!(!is_valid_function_id("-send"));
        assert!(!is_valid_function_id(""));
    }
}
