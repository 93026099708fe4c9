use std::time::Duration;

use bytes::Bytes;

use rumqttc::v5::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions,
    mqttbytes::v5::{Packet, SubscribeReasonCode},
};

use tracing::{debug, warn};

use crate::config::{BrokerConfig, REQUEST_CHANNEL_CAPACITY};
use crate::error::{Error, ErrorKind, Result};

pub use rumqttc::v5::mqttbytes::QoS;

/// Return code of an operation attempted without a connection.
pub const NO_CONNECTION: i32 = 4;
/// Return code of a connection refused by the broker.
pub const CONNECTION_REFUSED: i32 = 5;
/// Return code of a connection lost because of an I/O error.
pub const CONNECTION_LOST: i32 = 7;
/// Return code of any other protocol failure.
pub const PROTOCOL_ERROR: i32 = 2;

// Maximum time spent flushing a disconnection to the broker.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// An event produced by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker acknowledged the connection.
    ConnAck,
    /// The broker answered a subscription.
    SubAck {
        /// Whether every requested topic filter has been granted.
        granted: bool,
    },
    /// The broker acknowledged a publication.
    PubAck,
    /// A message published on a subscribed topic.
    Message {
        /// Topic the message was published on.
        topic: String,
        /// Message body.
        body: Bytes,
    },
    /// The connection has been closed cleanly.
    Disconnected,
    /// The connection failed. The code is never zero and is the final
    /// status of the session.
    Failed {
        /// Return code.
        code: i32,
        /// Failure description.
        reason: String,
    },
    /// Any other traffic, which carries no information for the caller.
    Ignored,
}

/// A bus transport.
///
/// Requests are queued by [`connect`](Transport::connect),
/// [`subscribe`](Transport::subscribe), and [`publish`](Transport::publish),
/// while their outcome is reported by [`poll`](Transport::poll), which
/// waits for the next [`TransportEvent`].
pub trait Transport {
    /// Opens the connection to the broker.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Subscribes to a topic pattern.
    fn subscribe(&mut self, topic: &str, qos: QoS) -> impl Future<Output = Result<()>> + Send;

    /// Publishes a body on a topic.
    fn publish(
        &mut self,
        topic: &str,
        body: Vec<u8>,
        qos: QoS,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Closes the connection to the broker.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Waits for the next [`TransportEvent`].
    fn poll(&mut self) -> impl Future<Output = TransportEvent> + Send;
}

/// Maps a connection error to its return code.
#[must_use]
pub fn return_code(error: &ConnectionError) -> i32 {
    match error {
        ConnectionError::ConnectionRefused(_) => CONNECTION_REFUSED,
        ConnectionError::Io(_) => CONNECTION_LOST,
        _ => PROTOCOL_ERROR,
    }
}

/// A [`Transport`] over `MQTT v5`.
pub struct MqttTransport {
    config: BrokerConfig,
    session: Option<(AsyncClient, EventLoop)>,
    disconnected: bool,
}

impl MqttTransport {
    /// Creates a [`MqttTransport`] from a [`BrokerConfig`].
    ///
    /// No connection is opened until [`Transport::connect`] is called.
    #[must_use]
    pub const fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: None,
            disconnected: false,
        }
    }

    /// Returns the [`BrokerConfig`].
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub(crate) fn mqtt_options(&self) -> MqttOptions {
        let mut mqttoptions = MqttOptions::new(
            self.config.client_id(),
            self.config.host(),
            self.config.port(),
        );
        let _ = mqttoptions.set_keep_alive(self.config.keep_alive());
        mqttoptions
    }

    fn client(&self) -> Result<&AsyncClient> {
        self.session
            .as_ref()
            .map(|(client, _)| client)
            .ok_or_else(|| Error::new(ErrorKind::Transport, "The transport is not connected"))
    }
}

/// Returns whether a subscription acknowledgement grants every filter.
#[must_use]
pub fn subscription_granted(codes: &[SubscribeReasonCode]) -> bool {
    !codes.is_empty()
        && codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
}

#[inline]
fn parse_event(event: std::result::Result<Event, ConnectionError>) -> TransportEvent {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            return TransportEvent::Failed {
                code: return_code(&e),
                reason: e.to_string(),
            };
        }
    };

    let packet = match event {
        Event::Incoming(packet) => packet,
        Event::Outgoing(outgoing) => {
            debug!("Outgoing packet: {:?}", outgoing);
            return TransportEvent::Ignored;
        }
    };

    match packet {
        Packet::ConnAck(_) => TransportEvent::ConnAck,
        Packet::SubAck(suback) => {
            let granted = subscription_granted(&suback.return_codes);
            if !granted {
                warn!("Subscription refused: {:?}", suback.return_codes);
            }
            TransportEvent::SubAck { granted }
        }
        Packet::PubAck(_) => TransportEvent::PubAck,
        Packet::Disconnect(_) => TransportEvent::Disconnected,
        Packet::Publish(publish) => match String::from_utf8(publish.topic.to_vec()) {
            Ok(topic) => TransportEvent::Message {
                topic,
                body: publish.payload,
            },
            Err(e) => {
                warn!("Publish with a non UTF-8 topic, discard it: {e}");
                TransportEvent::Ignored
            }
        },
        packet => {
            debug!("Packet ignored: {:?}", packet);
            TransportEvent::Ignored
        }
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<()> {
        // The event loop opens the network connection on its first poll.
        let (client, eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        self.session = Some((client, eventloop));
        self.disconnected = false;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        self.client()?
            .subscribe(topic.to_owned(), qos)
            .await
            .map_err(Into::into)
    }

    async fn publish(&mut self, topic: &str, body: Vec<u8>, qos: QoS) -> Result<()> {
        self.client()?
            .publish(topic.to_owned(), qos, false, body)
            .await
            .map_err(Into::into)
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some((client, mut eventloop)) = self.session.take() else {
            return Ok(());
        };
        self.disconnected = true;

        client.disconnect().await?;

        // Drive the event loop until the broker closes the connection.
        let flush = async {
            while eventloop.poll().await.is_ok() {}
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
            warn!("The broker did not close the connection in time");
        }

        Ok(())
    }

    async fn poll(&mut self) -> TransportEvent {
        let Some((_, eventloop)) = self.session.as_mut() else {
            return if self.disconnected {
                TransportEvent::Disconnected
            } else {
                TransportEvent::Failed {
                    code: NO_CONNECTION,
                    reason: "The transport is not connected".into(),
                }
            };
        };

        parse_event(eventloop.poll().await)
    }
}
