use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use core::fmt;

use crate::error::{Error, ErrorKind, Result};

/// The wildcard topic which covers every message published under the
/// notification namespace.
pub const NOTIFICATION_WILDCARD: &str = "/domain/#";

const DOMAIN: &str = "domain";
const REQUEST: &str = "request";
const ENDPOINTS: &str = "endpoints";
const SUBSCRIPTIONS: &str = "subscriptions";
const NOTIFICATION: &str = "notification";
const RESPONSES: &[&str] = &["response", "async-response"];

// Characters which can never be part of a topic segment.
const RESERVED: &[char] = &['/', '+', '#'];

fn join_uri<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut uri = String::new();
    for segment in segments {
        uri.push('/');
        uri.push_str(segment);
    }
    uri
}

fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::new(ErrorKind::Topic, "empty topic segment"));
    }

    if segment.contains(RESERVED) {
        return Err(Error::new(
            ErrorKind::Topic,
            format!("topic segment `{segment}` contains a reserved character"),
        ));
    }

    Ok(())
}

/// The operation a control request performs on a device resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Reads the current value of a resource.
    Read,
    /// Subscribes to the notifications of a resource.
    Subscribe,
    /// Removes a subscription to a resource.
    Unsubscribe,
}

impl Verb {
    const fn collection(self) -> &'static str {
        match self {
            Self::Read => ENDPOINTS,
            Self::Subscribe | Self::Unsubscribe => SUBSCRIPTIONS,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => "Read",
            Self::Subscribe => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
        }
        .fmt(f)
    }
}

/// The address of a device resource.
///
/// The first segment names the device endpoint, the remaining ones form the
/// resource identifier, for example `object/instance/resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    segments: Vec<String>,
}

impl ResourceAddress {
    /// Creates a [`ResourceAddress`] from an endpoint name and the
    /// object, instance, and resource identifiers of a resource.
    ///
    /// # Errors
    ///
    /// An identifier is empty or contains `/`, `+`, or `#`.
    pub fn lwm2m(endpoint: &str, object: &str, instance: &str, resource: &str) -> Result<Self> {
        Self::from_segments([endpoint, object, instance, resource])
    }

    /// Creates a [`ResourceAddress`] from an endpoint name and a resource
    /// path such as `/dev/mfg`.
    ///
    /// # Errors
    ///
    /// The endpoint name is invalid, the path is empty, or one of the path
    /// segments is empty or contains `+` or `#`.
    pub fn path(endpoint: &str, path: &str) -> Result<Self> {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() {
            return Err(Error::new(ErrorKind::Topic, "empty resource path"));
        }
        Self::from_segments(core::iter::once(endpoint).chain(path.split('/')))
    }

    fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let segments = segments
            .into_iter()
            .map(|segment| check_segment(segment).map(|()| segment.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Returns the endpoint name.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.segments[0]
    }

    /// Returns the resource identifier as a path, for example `/3303/0/5700`.
    #[must_use]
    pub fn resource_uri(&self) -> String {
        join_uri(self.segments[1..].iter().map(String::as_str))
    }

    /// Returns all address segments, endpoint name included.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

/// The kind of traffic a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Asynchronous notifications pushed by a device.
    Notification,
    /// Responses to control requests.
    ControlResponse,
    /// Any other traffic.
    Other,
}

/// A bus topic.
///
/// A topic is a sequence of segments rooted either at `/domain`, for the
/// traffic published by the bus, or at `/request/domain`, for control
/// requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Topic {
    /// Creates the [`Topic`] of a control request for a device resource.
    #[must_use]
    pub fn request(verb: Verb, address: &ResourceAddress) -> Self {
        let topic = format!("/{REQUEST}/{DOMAIN}/{}", verb.collection());
        Self(topic + &join_uri(address.segments().iter().map(String::as_str)))
    }

    /// Creates the [`Topic`] of an endpoint discovery request.
    #[must_use]
    pub fn discovery() -> Self {
        Self(format!("/{REQUEST}/{DOMAIN}/{ENDPOINTS}"))
    }

    /// Wraps a topic received from the bus.
    #[must_use]
    pub fn parse(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Returns the [`Topic`] as a [`&str`].
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the topic segments which follow the root.
    ///
    /// A topic without a leading `/` has no segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.strip_prefix('/').into_iter().flat_map(|rest| rest.split('/'))
    }

    /// Checks whether the topic falls under [`NOTIFICATION_WILDCARD`].
    #[must_use]
    pub fn matches_notification_namespace(&self) -> bool {
        let mut segments = self.segments();
        segments.next() == Some(DOMAIN)
            && segments.next().is_some_and(|segment| !segment.is_empty())
    }

    /// Classifies the traffic carried by the topic.
    #[must_use]
    pub fn classify(&self) -> TopicKind {
        if !self.matches_notification_namespace() {
            return TopicKind::Other;
        }

        match self.segments().skip(1).last() {
            Some(NOTIFICATION) => TopicKind::Notification,
            Some(last) if RESPONSES.contains(&last) => TopicKind::ControlResponse,
            _ => TopicKind::Other,
        }
    }

    /// Returns the endpoint name of a notification topic shaped as
    /// `/domain/<endpoint>/<resource...>/notification`.
    #[must_use]
    pub fn endpoint_name(&self) -> Option<&str> {
        if self.classify() != TopicKind::Notification {
            return None;
        }
        self.segments().nth(1).filter(|endpoint| *endpoint != NOTIFICATION)
    }

    /// Returns the resource identifier of a notification topic shaped as
    /// `/domain/<endpoint>/<resource...>/notification`.
    #[must_use]
    pub fn resource_uri(&self) -> Option<String> {
        if self.endpoint_name().is_none() {
            return None;
        }

        let segments = self.segments().collect::<Vec<_>>();
        let resource = &segments[2..segments.len() - 1];
        if resource.is_empty() {
            return None;
        }

        Some(join_uri(resource.iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec::Vec;

    use crate::error::ErrorKind;

    use super::{NOTIFICATION_WILDCARD, ResourceAddress, Topic, TopicKind, Verb};

    #[test]
    fn request_topics() {
        let address = ResourceAddress::lwm2m("ble-eth-endpt", "888", "0", "5850").unwrap();
        assert_eq!(
            Topic::request(Verb::Read, &address).as_str(),
            "/request/domain/endpoints/ble-eth-endpt/888/0/5850"
        );

        let address = ResourceAddress::lwm2m("mbed-eth-endpoint", "303", "0", "5700").unwrap();
        assert_eq!(
            Topic::request(Verb::Subscribe, &address).as_str(),
            "/request/domain/subscriptions/mbed-eth-endpoint/303/0/5700"
        );
        assert_eq!(
            Topic::request(Verb::Unsubscribe, &address).as_str(),
            "/request/domain/subscriptions/mbed-eth-endpoint/303/0/5700"
        );

        let address = ResourceAddress::path("ble-eth-endpt", "/dev/mfg").unwrap();
        assert_eq!(
            Topic::request(Verb::Read, &address).to_string(),
            "/request/domain/endpoints/ble-eth-endpt/dev/mfg"
        );

        assert_eq!(Topic::discovery().as_str(), "/request/domain/endpoints");
    }

    #[test]
    fn invalid_addresses() {
        for address in [
            ResourceAddress::lwm2m("", "303", "0", "5700"),
            ResourceAddress::lwm2m("endpoint", "3/3", "0", "5700"),
            ResourceAddress::lwm2m("endpoint", "303", "+", "5700"),
            ResourceAddress::path("endpoint", "dev//mfg"),
            ResourceAddress::path("endpoint", "/"),
            ResourceAddress::path("end#point", "dev/mfg"),
        ] {
            assert_eq!(address.unwrap_err().kind(), ErrorKind::Topic);
        }
    }

    #[test]
    fn address_parts() {
        let address = ResourceAddress::path("ble-eth-endpt", "dev/mfg").unwrap();
        assert_eq!(address.endpoint(), "ble-eth-endpt");
        assert_eq!(address.resource_uri(), "/dev/mfg");
        assert_eq!(address.segments().len(), 3);
    }

    #[test]
    fn notification_namespace() {
        assert_eq!(NOTIFICATION_WILDCARD, "/domain/#");

        assert!(Topic::parse("/domain/ep/3303/0/5700/notification").matches_notification_namespace());
        assert!(Topic::parse("/domain/other/thing").matches_notification_namespace());
        assert!(!Topic::parse("/request/domain/endpoints").matches_notification_namespace());
        assert!(!Topic::parse("domain/ep/notification").matches_notification_namespace());
        assert!(!Topic::parse("/domains/ep/notification").matches_notification_namespace());
        assert!(!Topic::parse("/domain").matches_notification_namespace());
        assert!(!Topic::parse("/domain/").matches_notification_namespace());
        assert!(!Topic::parse("/domain//notification").matches_notification_namespace());
        assert!(!Topic::parse("").matches_notification_namespace());
    }

    #[test]
    fn classification() {
        assert_eq!(
            Topic::parse("/domain/ep/3303/0/5700/notification").classify(),
            TopicKind::Notification
        );
        assert_eq!(
            Topic::parse("/domain/ep/3303/0/5700/response").classify(),
            TopicKind::ControlResponse
        );
        assert_eq!(
            Topic::parse("/domain/async-response").classify(),
            TopicKind::ControlResponse
        );
        assert_eq!(Topic::parse("/domain/other/thing").classify(), TopicKind::Other);
        assert_eq!(Topic::parse("/domain").classify(), TopicKind::Other);
        assert_eq!(
            Topic::parse("/elsewhere/ep/notification").classify(),
            TopicKind::Other
        );
    }

    #[test]
    fn notification_topic_parts() {
        let topic = Topic::parse("/domain/mbed-eth-endpoint/303/0/5700/notification");
        assert_eq!(
            topic.segments().collect::<Vec<_>>(),
            ["domain", "mbed-eth-endpoint", "303", "0", "5700", "notification"]
        );
        assert_eq!(topic.endpoint_name(), Some("mbed-eth-endpoint"));
        assert_eq!(topic.resource_uri().as_deref(), Some("/303/0/5700"));

        let topic = Topic::parse("/domain/ep/notification");
        assert_eq!(topic.endpoint_name(), Some("ep"));
        assert_eq!(topic.resource_uri(), None);

        let topic = Topic::parse("/domain/notification");
        assert_eq!(topic.endpoint_name(), None);
        assert_eq!(topic.resource_uri(), None);

        assert_eq!(Topic::parse("/domain/other/thing").endpoint_name(), None);
    }
}
