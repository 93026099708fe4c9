use std::time::Duration;

use dmbus::request::ControlRequest;

use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::transport::{MqttTransport, QoS, Transport, TransportEvent};

/// Maximum time to wait for each acknowledgement of the broker.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes a single [`ControlRequest`].
///
/// Connects, publishes the request body with at-least-once delivery once the
/// broker acknowledges the connection, waits for the publication to be
/// acknowledged, and finally disconnects. The response, if any, is delivered
/// on the notification namespace and received by a
/// [`Subscriber`](crate::subscriber::Subscriber).
///
/// # Errors
///
/// The request body cannot be serialized, or the transport fails before the
/// publication is acknowledged.
pub async fn publish_request<T: Transport>(
    transport: &mut T,
    request: &ControlRequest,
) -> Result<()> {
    let body = request.body_bytes()?;

    transport.connect().await?;
    let outcome = exchange(transport, request, body).await;

    if let Err(e) = transport.disconnect().await {
        warn!("Impossible to disconnect cleanly: {e}");
    }

    outcome
}

/// Publishes a single [`ControlRequest`] on the broker described by a
/// [`BrokerConfig`].
///
/// # Errors
///
/// See [`publish_request`].
pub async fn publish_request_to(config: BrokerConfig, request: &ControlRequest) -> Result<()> {
    publish_request(&mut MqttTransport::new(config), request).await
}

async fn exchange<T: Transport>(
    transport: &mut T,
    request: &ControlRequest,
    body: Vec<u8>,
) -> Result<()> {
    wait_for(transport, TransportEvent::ConnAck).await?;

    transport
        .publish(request.topic().as_str(), body, QoS::AtLeastOnce)
        .await?;
    wait_for(transport, TransportEvent::PubAck).await?;

    info!("Request published on `{}`", request.topic());
    Ok(())
}

async fn wait_for<T: Transport>(transport: &mut T, expected: TransportEvent) -> Result<()> {
    match tokio::time::timeout(REQUEST_TIMEOUT, next(transport, &expected)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::new(
            ErrorKind::Transport,
            format!("No {expected:?} received within {REQUEST_TIMEOUT:?}"),
        )),
    }
}

async fn next<T: Transport>(transport: &mut T, expected: &TransportEvent) -> Result<()> {
    loop {
        match transport.poll().await {
            event if event == *expected => return Ok(()),
            TransportEvent::Failed { code, reason } => {
                return Err(Error::new(
                    ErrorKind::Transport,
                    format!("Transport failure with code {code}: {reason}"),
                ));
            }
            TransportEvent::Disconnected => {
                return Err(Error::new(
                    ErrorKind::Transport,
                    "The broker closed the connection",
                ));
            }
            event => debug!("Waiting for {:?}, event ignored: {:?}", expected, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use dmbus::request::ControlRequest;
    use dmbus::topic::ResourceAddress;

    use crate::error::ErrorKind;
    use crate::tests::{Call, ScriptedTransport, message};
    use crate::transport::{CONNECTION_REFUSED, QoS, TransportEvent};

    use super::publish_request;

    fn publication(topic: &str, body: &[u8]) -> Call {
        Call::Publish {
            topic: topic.into(),
            body: body.into(),
            qos: QoS::AtLeastOnce,
        }
    }

    #[tokio::test]
    async fn discovery_request() {
        let mut transport = ScriptedTransport::new([
            TransportEvent::Ignored,
            TransportEvent::ConnAck,
            message("/domain/gateway-01/3303/0/5700/notification", b"[]"),
            TransportEvent::PubAck,
        ]);
        let calls = transport.calls();

        publish_request(&mut transport, &ControlRequest::discover("mbed-eth-device", false))
            .await
            .unwrap();

        assert_eq!(
            calls.lock().unwrap().as_slice(),
            [
                Call::Connect,
                publication(
                    "/request/domain/endpoints",
                    br#"{"type":"mbed-eth-device","stale":"false"}"#,
                ),
                Call::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn subscription_request() {
        let mut transport = ScriptedTransport::new([TransportEvent::ConnAck, TransportEvent::PubAck]);
        let calls = transport.calls();
        let address = ResourceAddress::lwm2m("gateway-01", "3303", "0", "5700").unwrap();

        publish_request(&mut transport, &ControlRequest::subscribe(&address))
            .await
            .unwrap();

        assert_eq!(
            calls.lock().unwrap()[1],
            publication(
                "/request/domain/subscriptions/gateway-01/3303/0/5700",
                br#"{"sync":"false"}"#,
            )
        );
    }

    #[tokio::test]
    async fn refused_connection() {
        let mut transport = ScriptedTransport::new([TransportEvent::Failed {
            code: CONNECTION_REFUSED,
            reason: "connection refused".into(),
        }]);
        let calls = transport.calls();

        let error = publish_request(&mut transport, &ControlRequest::discover("mbed", true))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Transport);
        assert_eq!(
            error.info(),
            "Transport failure with code 5: connection refused"
        );
        // Nothing has been published, but the session is closed anyway.
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            [Call::Connect, Call::Disconnect]
        );
    }

    #[tokio::test]
    async fn closed_connection() {
        let mut transport =
            ScriptedTransport::new([TransportEvent::ConnAck, TransportEvent::Disconnected]);

        let error = publish_request(&mut transport, &ControlRequest::discover("mbed", false))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Transport);
        assert_eq!(error.info(), "The broker closed the connection");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_acknowledgement() {
        let mut transport = ScriptedTransport::new([TransportEvent::ConnAck]);

        let error = publish_request(&mut transport, &ControlRequest::discover("mbed", false))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Transport);
        assert_eq!(error.info(), "No PubAck received within 10s");
    }

    #[tokio::test]
    async fn connect_failure() {
        let mut transport = ScriptedTransport::failing_connect();
        let calls = transport.calls();

        let error = publish_request(&mut transport, &ControlRequest::discover("mbed", false))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Transport);
        assert_eq!(calls.lock().unwrap().as_slice(), [Call::Connect]);
    }
}
