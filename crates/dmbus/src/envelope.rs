use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, Result};

const PAYLOAD: &str = "payload";
const TIMESTAMP: &str = "timestamp";

// Keys are looked up in order, the first one holding a value of the expected
// type wins.
const RESOURCE_PATH_KEYS: &[&str] = &["resourcePath", "path", "uri"];
const ENDPOINT_KEYS: &[&str] = &["endpoint", "ep", "id"];
const CONTENT_TYPE_KEYS: &[&str] = &["ct", "content_type"];
const MAX_AGE_KEYS: &[&str] = &["max-age", "max_age"];

#[inline]
fn malformed(description: impl Into<alloc::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::MalformedEnvelope, description)
}

fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key)?.as_str())
        .map(String::from)
}

fn first_seconds(object: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

/// A single result record of a notification envelope.
///
/// Only the `payload` is mandatory. Optional fields which are missing,
/// `null`, or of an unexpected type take their default value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    resource_path: String,
    payload: String,
    timestamp: Option<Value>,
    endpoint: Option<String>,
    content_type: Option<String>,
    max_age: Option<u64>,
}

impl ResultRecord {
    /// Returns the path of the resource which produced the record.
    ///
    /// The path is empty when the device did not report it.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Returns the transport-encoded payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Returns the timestamp, whose unit depends on the device.
    #[must_use]
    pub const fn timestamp(&self) -> Option<&Value> {
        self.timestamp.as_ref()
    }

    /// Returns the name of the endpoint which produced the record.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns the content type of the payload, as reported by the device.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Returns how long the value stays valid, in seconds.
    ///
    /// Devices report it either as a number or as a numeric string.
    #[must_use]
    pub const fn max_age(&self) -> Option<u64> {
        self.max_age
    }
}

/// Parses a notification body into its sequence of [`ResultRecord`]s.
///
/// The body must be a `JSON` array of objects, each one with a string
/// `payload` field. Records are returned in the order the device reported
/// them.
///
/// # Errors
///
/// The body is not `UTF-8` text, is not valid `JSON`, is not an array, or
/// one of its elements is not an object with a string `payload`.
pub fn parse_envelope(raw: &[u8]) -> Result<Vec<ResultRecord>> {
    let text = core::str::from_utf8(raw)
        .map_err(|e| malformed(format!("Body is not UTF-8 text: {e}")))?;

    let value = serde_json::from_str::<Value>(text)
        .map_err(|e| malformed(format!("Body is not valid JSON: {e}")))?;

    let Value::Array(elements) = value else {
        return Err(malformed("Body is not a JSON array"));
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| parse_record(index, element))
        .collect()
}

fn parse_record(index: usize, element: Value) -> Result<ResultRecord> {
    let Value::Object(object) = element else {
        return Err(malformed(format!("Element {index} is not a JSON object")));
    };

    let payload = match object.get(PAYLOAD) {
        Some(Value::String(payload)) => payload.clone(),
        Some(_) => {
            return Err(malformed(format!(
                "Element {index} has a non-string `{PAYLOAD}`"
            )));
        }
        None => return Err(malformed(format!("Element {index} lacks `{PAYLOAD}`"))),
    };

    Ok(ResultRecord {
        resource_path: first_string(&object, RESOURCE_PATH_KEYS).unwrap_or_default(),
        payload,
        timestamp: object.get(TIMESTAMP).filter(|value| !value.is_null()).cloned(),
        endpoint: first_string(&object, ENDPOINT_KEYS),
        content_type: first_string(&object, CONTENT_TYPE_KEYS),
        max_age: first_seconds(&object, MAX_AGE_KEYS),
    })
}
