use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Serialize, Serializer};

use crate::error::{Error, ErrorKind, Result};
use crate::topic::{ResourceAddress, Topic, Verb};

// The bus expects booleans encoded as JSON strings.
fn string_bool<S: Serializer>(value: &bool, serializer: S) -> core::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "true" } else { "false" })
}

/// The body of a control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Whether the bus must answer synchronously.
    ///
    /// Reads are synchronous, subscriptions are not.
    Sync {
        /// Synchronous flag.
        #[serde(serialize_with = "string_bool")]
        sync: bool,
    },
    /// Removes a subscription.
    Unsubscribe {
        /// Unsubscribe flag.
        #[serde(serialize_with = "string_bool")]
        unsubscribe: bool,
    },
    /// Filters the endpoints returned by a discovery.
    Discovery {
        /// Endpoint type.
        #[serde(rename = "type")]
        endpoint_type: String,
        /// Whether stale endpoints must be included.
        #[serde(serialize_with = "string_bool")]
        stale: bool,
    },
}

/// A control request, made of a [`Topic`] and a [`RequestBody`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    topic: Topic,
    body: RequestBody,
}

impl ControlRequest {
    /// Creates a [`ControlRequest`] reading the value of a resource.
    #[must_use]
    pub fn read(address: &ResourceAddress) -> Self {
        Self {
            topic: Topic::request(Verb::Read, address),
            body: RequestBody::Sync { sync: true },
        }
    }

    /// Creates a [`ControlRequest`] subscribing to the notifications of a
    /// resource.
    #[must_use]
    pub fn subscribe(address: &ResourceAddress) -> Self {
        Self {
            topic: Topic::request(Verb::Subscribe, address),
            body: RequestBody::Sync { sync: false },
        }
    }

    /// Creates a [`ControlRequest`] removing the subscription to a resource.
    #[must_use]
    pub fn unsubscribe(address: &ResourceAddress) -> Self {
        Self {
            topic: Topic::request(Verb::Unsubscribe, address),
            body: RequestBody::Unsubscribe { unsubscribe: true },
        }
    }

    /// Creates a [`ControlRequest`] discovering all endpoints of the given
    /// type.
    #[must_use]
    pub fn discover(endpoint_type: impl Into<String>, stale: bool) -> Self {
        Self {
            topic: Topic::discovery(),
            body: RequestBody::Discovery {
                endpoint_type: endpoint_type.into(),
                stale,
            },
        }
    }

    /// Returns the request [`Topic`].
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Returns the [`RequestBody`].
    #[must_use]
    pub const fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Encodes the [`RequestBody`] as `JSON`.
    ///
    /// # Errors
    ///
    /// The body cannot be serialized.
    pub fn body_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.body).map_err(|e| {
            Error::new(
                ErrorKind::Request,
                format!("Impossible to encode the body for `{}`: {e}", self.topic),
            )
        })
    }
}
