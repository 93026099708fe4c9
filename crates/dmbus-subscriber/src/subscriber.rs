use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;

use dmbus::cipher::{CipherContext, DecodedEvent};
use dmbus::envelope::parse_envelope;
use dmbus::topic::{NOTIFICATION_WILDCARD, Topic, TopicKind};

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::transport::{NO_CONNECTION, PROTOCOL_ERROR, QoS, Transport, TransportEvent};

/// The lifecycle states of a [`Subscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// No connection has been requested, or the session ended cleanly.
    Disconnected,
    /// Waiting for the broker to acknowledge the connection.
    Connecting,
    /// Waiting for the broker to acknowledge the notification subscription.
    Subscribing,
    /// Decoding the notifications pushed by the broker.
    Listening,
    /// The session ended because of a transport failure.
    Faulted,
}

/// How a [`Subscriber`] session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberExit {
    /// The session ended cleanly.
    Disconnected,
    /// The session ended because of a transport failure.
    Faulted {
        /// Transport return code, never zero.
        code: i32,
    },
}

impl SubscriberExit {
    /// Returns the final status of the session, zero when it ended cleanly.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Disconnected => 0,
            Self::Faulted { code } => code,
        }
    }
}

/// An event emitted by a [`Subscriber`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// A decrypted notification.
    Notification(DecodedEvent),
    /// A response to a control request, forwarded untouched.
    ControlResponse {
        /// The topic the response was published on.
        topic: Topic,
        /// The response body.
        body: Bytes,
    },
}

/// The outcome of handling a single message.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Events, in envelope order.
    pub events: Vec<SubscriberEvent>,
    /// Errors of the records, or of the whole envelope, which could not be
    /// decoded.
    pub errors: Vec<Error>,
}

/// A secure notification subscriber.
///
/// A subscriber connects to a broker, subscribes to
/// [`NOTIFICATION_WILDCARD`], and decrypts the records of each notification
/// envelope with a single [`CipherContext`]. Messages are handled one at a
/// time, so events are emitted in arrival order.
pub struct Subscriber<T: Transport> {
    transport: T,
    context: Arc<CipherContext>,
    state: SubscriberState,
    cancellation_token: CancellationToken,
}

impl<T: Transport> Subscriber<T> {
    /// Creates a [`Subscriber`].
    #[must_use]
    pub fn new(transport: T, context: impl Into<Arc<CipherContext>>) -> Self {
        Self {
            transport,
            context: context.into(),
            state: SubscriberState::Disconnected,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Returns a token which closes the session cleanly once cancelled.
    ///
    /// Cancellation is observed between messages, never while a message is
    /// being decoded.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Returns the current [`SubscriberState`].
    #[must_use]
    pub const fn state(&self) -> SubscriberState {
        self.state
    }

    /// Routes a single message received on the given topic.
    ///
    /// Traffic outside the notification namespace produces neither events
    /// nor errors. Control responses are forwarded without decryption. A
    /// notification produces one event for each record decrypted
    /// successfully, while a record which cannot be decrypted never prevents
    /// the decoding of the following ones.
    pub fn handle_message(&self, topic: &str, body: Bytes) -> Dispatch {
        let topic = Topic::parse(topic);
        let mut dispatch = Dispatch::default();

        match topic.classify() {
            TopicKind::Other => {
                debug!("Message on `{topic}` ignored");
            }
            TopicKind::ControlResponse => {
                dispatch
                    .events
                    .push(SubscriberEvent::ControlResponse { topic, body });
            }
            TopicKind::Notification => {
                let records = match parse_envelope(&body) {
                    Ok(records) => records,
                    Err(e) => {
                        dispatch.errors.push(e.into());
                        return dispatch;
                    }
                };

                for record in records {
                    if record.payload().is_empty() {
                        debug!("Record of `{}` without payload", record.resource_path());
                        continue;
                    }

                    match DecodedEvent::decode(&record, &self.context) {
                        Ok(event) => dispatch.events.push(SubscriberEvent::Notification(event)),
                        Err(e) => dispatch.errors.push(e.into()),
                    }
                }
            }
        }

        dispatch
    }

    /// Runs the session until the transport disconnects or fails, the
    /// cancellation token is cancelled, or the receiver of `sender` is
    /// dropped.
    pub async fn run(&mut self, sender: Sender<SubscriberEvent>) -> SubscriberExit {
        self.state = SubscriberState::Connecting;
        if let Err(e) = self.transport.connect().await {
            error!("Impossible to connect to the broker: {e}");
            self.state = SubscriberState::Faulted;
            return SubscriberExit::Faulted {
                code: NO_CONNECTION,
            };
        }

        let cancellation_token = self.cancellation_token.clone();
        loop {
            let event = tokio::select! {
                // Use the cancellation token to stop the loop
                () = cancellation_token.cancelled() => None,
                // Wait for the next transport event
                event = self.transport.poll() => Some(event),
            };

            let Some(event) = event else {
                info!("Subscriber cancelled");
                return self.shutdown().await;
            };

            if let ControlFlow::Break(exit) = self.step(event, &sender).await {
                return exit;
            }
        }
    }

    /// Spawns the session on a new task, returning its handle together with
    /// the receiver of the emitted events.
    ///
    /// The channel holds at most `buffer` events, so a slow receiver
    /// suspends the session rather than dropping events.
    pub fn spawn(
        mut self,
        buffer: NonZeroUsize,
    ) -> (JoinHandle<SubscriberExit>, Receiver<SubscriberEvent>)
    where
        T: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(buffer.get());
        let handle = tokio::spawn(async move { self.run(sender).await });
        (handle, receiver)
    }

    async fn step(
        &mut self,
        event: TransportEvent,
        sender: &Sender<SubscriberEvent>,
    ) -> ControlFlow<SubscriberExit> {
        match event {
            TransportEvent::ConnAck if self.state == SubscriberState::Connecting => {
                info!("Connected, subscribing to `{NOTIFICATION_WILDCARD}`");
                if let Err(e) = self
                    .transport
                    .subscribe(NOTIFICATION_WILDCARD, QoS::AtMostOnce)
                    .await
                {
                    error!("Impossible to subscribe to `{NOTIFICATION_WILDCARD}`: {e}");
                    self.state = SubscriberState::Faulted;
                    return ControlFlow::Break(SubscriberExit::Faulted {
                        code: PROTOCOL_ERROR,
                    });
                }
                self.state = SubscriberState::Subscribing;
            }
            TransportEvent::SubAck { granted } if self.state == SubscriberState::Subscribing => {
                if !granted {
                    error!("The broker refused the subscription to `{NOTIFICATION_WILDCARD}`");
                    let _ = self.shutdown().await;
                    self.state = SubscriberState::Faulted;
                    return ControlFlow::Break(SubscriberExit::Faulted {
                        code: PROTOCOL_ERROR,
                    });
                }
                info!("Listening for notifications");
                self.state = SubscriberState::Listening;
            }
            TransportEvent::Message { topic, body }
                if matches!(
                    self.state,
                    SubscriberState::Subscribing | SubscriberState::Listening
                ) =>
            {
                let Dispatch { events, errors } = self.handle_message(&topic, body);

                for e in errors {
                    warn!("Message on `{topic}` not decoded: {e}");
                }

                for event in events {
                    if sender.send(event).await.is_err() {
                        info!("Event receiver dropped, closing the session");
                        return ControlFlow::Break(self.shutdown().await);
                    }
                }
            }
            TransportEvent::Disconnected => {
                info!("Disconnected from the broker");
                self.state = SubscriberState::Disconnected;
                return ControlFlow::Break(SubscriberExit::Disconnected);
            }
            TransportEvent::Failed { code, reason } => {
                error!("Transport failure with code {code}: {reason}");
                self.state = SubscriberState::Faulted;
                return ControlFlow::Break(SubscriberExit::Faulted { code });
            }
            event => {
                debug!("Event ignored in state {:?}: {:?}", self.state, event);
            }
        }

        ControlFlow::Continue(())
    }

    async fn shutdown(&mut self) -> SubscriberExit {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Impossible to disconnect cleanly: {e}");
        }
        self.state = SubscriberState::Disconnected;
        SubscriberExit::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use bytes::Bytes;

    use dmbus::cipher::DecodedEvent;
    use dmbus::topic::{NOTIFICATION_WILDCARD, Topic};

    use tokio::sync::mpsc;

    use crate::error::ErrorKind;
    use crate::tests::{
        Call, ScriptedTransport, gateway_context, message, notification, notification_body,
        record,
    };
    use crate::transport::{
        CONNECTION_LOST, CONNECTION_REFUSED, NO_CONNECTION, PROTOCOL_ERROR, TransportEvent,
    };

    use super::{Subscriber, SubscriberEvent, SubscriberExit, SubscriberState};

    const TEMPERATURE: &str = "/domain/gateway-01/3303/0/5700/notification";

    fn subscriber(transport: ScriptedTransport) -> Subscriber<ScriptedTransport> {
        Subscriber::new(transport, gateway_context())
    }

    fn notification_event(resource_path: &str, plaintext: &str) -> SubscriberEvent {
        SubscriberEvent::Notification(DecodedEvent::new(
            resource_path,
            plaintext.as_bytes().to_vec(),
        ))
    }

    #[test]
    fn ordered_records() {
        let subscriber = subscriber(ScriptedTransport::default());
        let body = notification_body(&[
            record("/3303/0/5700", "72"),
            record("/3303/0/5701", "98.6"),
            record("/3/0/0", "ARM Ltd."),
        ]);

        let dispatch = subscriber.handle_message(TEMPERATURE, body);

        assert!(dispatch.errors.is_empty());
        assert_eq!(
            dispatch.events,
            vec![
                notification_event("/3303/0/5700", "72"),
                notification_event("/3303/0/5701", "98.6"),
                notification_event("/3/0/0", "ARM Ltd."),
            ]
        );
    }

    #[test]
    fn partial_failure() {
        let subscriber = subscriber(ScriptedTransport::default());
        let body = notification_body(&[
            record("/3303/0/5700", "72"),
            ("/3303/0/5701".into(), "not base64!".into()),
            record("/3/0/0", "ARM Ltd."),
        ]);

        let dispatch = subscriber.handle_message(TEMPERATURE, body);

        assert_eq!(
            dispatch.events,
            vec![
                notification_event("/3303/0/5700", "72"),
                notification_event("/3/0/0", "ARM Ltd."),
            ]
        );
        assert_eq!(dispatch.errors.len(), 1);
        assert_eq!(dispatch.errors[0].kind(), ErrorKind::Encoding);
    }

    #[test]
    fn undecryptable_record() {
        let subscriber = subscriber(ScriptedTransport::default());
        // A full block encrypted with another key.
        let body = notification_body(&[(
            "/3303/0/5700".into(),
            "vf2/NfIMC28ivmqgAxTXMQ==".into(),
        )]);

        let dispatch = subscriber.handle_message(TEMPERATURE, body);

        assert!(dispatch.events.is_empty());
        assert_eq!(dispatch.errors[0].kind(), ErrorKind::Decryption);
    }

    #[test]
    fn foreign_traffic() {
        let subscriber = subscriber(ScriptedTransport::default());
        let body = notification_body(&[record("/3303/0/5700", "72")]);

        for topic in [
            "/other/gateway-01/3303/0/5700/notification",
            "/domain/gateway-01/3303/0/5700/registration",
            "domain/gateway-01/notification",
        ] {
            let dispatch = subscriber.handle_message(topic, body.clone());
            assert!(dispatch.events.is_empty(), "{topic}");
            assert!(dispatch.errors.is_empty(), "{topic}");
        }
    }

    #[test]
    fn malformed_envelope() {
        let subscriber = subscriber(ScriptedTransport::default());

        for body in [
            &b"not json"[..],
            &b"{\"payload\":\"x\"}"[..],
            &b"[{\"path\":\"/3/0/0\"}]"[..],
        ] {
            let dispatch = subscriber.handle_message(TEMPERATURE, Bytes::from_static(body));
            assert!(dispatch.events.is_empty());
            assert_eq!(dispatch.errors.len(), 1);
            assert_eq!(dispatch.errors[0].kind(), ErrorKind::MalformedEnvelope);
        }
    }

    #[test]
    fn control_response() {
        let subscriber = subscriber(ScriptedTransport::default());
        let body = Bytes::from_static(br#"[{"name":"gateway-01","type":"mbed-eth-device"}]"#);

        let dispatch = subscriber.handle_message("/domain/endpoints/response", body.clone());

        assert!(dispatch.errors.is_empty());
        assert_eq!(
            dispatch.events,
            vec![SubscriberEvent::ControlResponse {
                topic: Topic::parse("/domain/endpoints/response"),
                body,
            }]
        );
    }

    #[test]
    fn empty_payload() {
        let subscriber = subscriber(ScriptedTransport::default());
        let body = notification_body(&[
            ("/3303/0/5700".into(), String::new()),
            record("/3303/0/5701", "98.6"),
        ]);

        let dispatch = subscriber.handle_message(TEMPERATURE, body);

        assert!(dispatch.errors.is_empty());
        assert_eq!(dispatch.events, vec![notification_event("/3303/0/5701", "98.6")]);
    }

    #[tokio::test]
    async fn lifecycle() {
        let transport = ScriptedTransport::new([
            TransportEvent::ConnAck,
            TransportEvent::SubAck { granted: true },
            notification(TEMPERATURE, &[record("/3303/0/5700", "72")]),
            TransportEvent::Ignored,
            message("/domain/endpoints/response", b"[]"),
            notification(
                TEMPERATURE,
                &[record("/3303/0/5700", "73"), record("/3303/0/5700", "74")],
            ),
            TransportEvent::Disconnected,
        ]);
        let calls = transport.calls();
        let mut subscriber = subscriber(transport);
        let (sender, mut receiver) = mpsc::channel(8);

        let exit = subscriber.run(sender).await;

        assert_eq!(exit, SubscriberExit::Disconnected);
        assert_eq!(exit.code(), 0);
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            [
                Call::Connect,
                Call::Subscribe(NOTIFICATION_WILDCARD.into()),
            ]
        );

        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                notification_event("/3303/0/5700", "72"),
                SubscriberEvent::ControlResponse {
                    topic: Topic::parse("/domain/endpoints/response"),
                    body: Bytes::from_static(b"[]"),
                },
                notification_event("/3303/0/5700", "73"),
                notification_event("/3303/0/5700", "74"),
            ]
        );
    }

    #[tokio::test]
    async fn fatal_first_poll() {
        let transport = ScriptedTransport::new([TransportEvent::Failed {
            code: CONNECTION_REFUSED,
            reason: "connection refused".into(),
        }]);
        let mut subscriber = subscriber(transport);
        let (sender, mut receiver) = mpsc::channel(8);

        let exit = subscriber.run(sender).await;

        assert_eq!(exit, SubscriberExit::Faulted { code: CONNECTION_REFUSED });
        assert_eq!(exit.code(), CONNECTION_REFUSED);
        assert_eq!(subscriber.state(), SubscriberState::Faulted);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn connection_lost() {
        let transport = ScriptedTransport::new([
            TransportEvent::ConnAck,
            TransportEvent::SubAck { granted: true },
            notification(TEMPERATURE, &[record("/3303/0/5700", "72")]),
            TransportEvent::Failed {
                code: CONNECTION_LOST,
                reason: "connection reset by peer".into(),
            },
            notification(TEMPERATURE, &[record("/3303/0/5700", "73")]),
        ]);
        let (handle, mut receiver) = subscriber(transport).spawn(NonZeroUsize::new(4).unwrap());

        assert_eq!(
            receiver.recv().await,
            Some(notification_event("/3303/0/5700", "72"))
        );
        assert_eq!(
            handle.await.unwrap(),
            SubscriberExit::Faulted {
                code: CONNECTION_LOST
            }
        );
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn single_slot_buffer() {
        let transport = ScriptedTransport::new([
            TransportEvent::ConnAck,
            TransportEvent::SubAck { granted: true },
            notification(
                TEMPERATURE,
                &[record("/3303/0/5700", "72"), record("/3303/0/5700", "73")],
            ),
            notification(TEMPERATURE, &[record("/3303/0/5700", "74")]),
            TransportEvent::Disconnected,
        ]);
        let (handle, mut receiver) = subscriber(transport).spawn(NonZeroUsize::MIN);

        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                notification_event("/3303/0/5700", "72"),
                notification_event("/3303/0/5700", "73"),
                notification_event("/3303/0/5700", "74"),
            ]
        );
        assert_eq!(handle.await.unwrap(), SubscriberExit::Disconnected);
    }

    #[tokio::test]
    async fn refused_subscription() {
        let transport = ScriptedTransport::new([
            TransportEvent::ConnAck,
            TransportEvent::SubAck { granted: false },
            notification(TEMPERATURE, &[record("/3303/0/5700", "72")]),
        ]);
        let calls = transport.calls();
        let mut subscriber = subscriber(transport);
        let (sender, mut receiver) = mpsc::channel(8);

        let exit = subscriber.run(sender).await;

        assert_eq!(exit, SubscriberExit::Faulted { code: PROTOCOL_ERROR });
        assert_eq!(subscriber.state(), SubscriberState::Faulted);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            [
                Call::Connect,
                Call::Subscribe(NOTIFICATION_WILDCARD.into()),
                Call::Disconnect,
            ]
        );
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure() {
        let transport = ScriptedTransport::failing_connect();
        let calls = transport.calls();
        let mut subscriber = subscriber(transport);
        let (sender, _receiver) = mpsc::channel(1);

        let exit = subscriber.run(sender).await;

        assert_eq!(exit, SubscriberExit::Faulted { code: NO_CONNECTION });
        assert_eq!(subscriber.state(), SubscriberState::Faulted);
        assert_eq!(calls.lock().unwrap().as_slice(), [Call::Connect]);
    }

    #[tokio::test]
    async fn cancellation() {
        crate::tests::init_tracing();

        // The script runs out after the subscription, so the transport waits
        // forever for the next event.
        let transport = ScriptedTransport::new([
            TransportEvent::ConnAck,
            TransportEvent::SubAck { granted: true },
        ]);
        let calls = transport.calls();
        let subscriber = subscriber(transport);
        let cancellation_token = subscriber.cancellation_token();
        let (handle, mut receiver) = subscriber.spawn(NonZeroUsize::MIN);

        tokio::task::yield_now().await;
        cancellation_token.cancel();

        assert_eq!(handle.await.unwrap(), SubscriberExit::Disconnected);
        assert!(receiver.recv().await.is_none());
        assert_eq!(calls.lock().unwrap().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn dropped_receiver() {
        let transport = ScriptedTransport::new([
            TransportEvent::ConnAck,
            TransportEvent::SubAck { granted: true },
            notification(TEMPERATURE, &[record("/3303/0/5700", "72")]),
            notification(TEMPERATURE, &[record("/3303/0/5700", "73")]),
        ]);
        let calls = transport.calls();
        let mut subscriber = subscriber(transport);
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);

        let exit = subscriber.run(sender).await;

        assert_eq!(exit, SubscriberExit::Disconnected);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            [
                Call::Connect,
                Call::Subscribe(NOTIFICATION_WILDCARD.into()),
                Call::Disconnect,
            ]
        );
    }
}
