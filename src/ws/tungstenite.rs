//! Production [`Transport`] backed by `tokio-tungstenite`.
//!
//! Each call to [`Transport::open`] validates the endpoint, spawns a driver
//! task, and returns immediately. The driver performs the handshake, then
//! pumps inbound frames to the [`EventSink`] and outbound frames from the
//! [`HandleLink`] until either side closes.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use super::transport::{EventSink, HandleLink, Outbound, ReadyState, Transport, TransportHandle};
use crate::error::ClientError;

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    connect_timeout: Duration,
}

impl TungsteniteTransport {
    /// Creates a transport that abandons handshakes after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: &str, events: EventSink) -> Result<TransportHandle, ClientError> {
        let request = url
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))?;
        match request.uri().scheme_str() {
            Some("ws" | "wss") => {}
            other => {
                return Err(ClientError::InvalidUrl(format!(
                    "{url}: unsupported scheme {other:?}"
                )));
            }
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let (handle, link) = TransportHandle::new(events.role(), events.epoch());
        runtime.spawn(drive(request, link, events, self.connect_timeout));
        Ok(handle)
    }
}

async fn drive(request: Request, mut link: HandleLink, events: EventSink, connect_timeout: Duration) {
    let role = events.role();
    let stream = match tokio::time::timeout(connect_timeout, connect_async(request)).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            events.error(e.to_string());
            link.set_state(ReadyState::Closed);
            events.closed();
            return;
        }
        Err(_) => {
            events.error(format!("handshake timed out after {connect_timeout:?}"));
            link.set_state(ReadyState::Closed);
            events.closed();
            return;
        }
    };

    let (mut write, mut read) = stream.split();

    // close() may have been called while the handshake was in flight
    if link.ready_state() == ReadyState::Closing {
        let _ = write.close().await;
        link.set_state(ReadyState::Closed);
        events.closed();
        return;
    }

    link.set_state(ReadyState::Open);
    events.opened();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => events.frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => events.frame(text),
                        Err(_) => tracing::debug!(%role, "dropping non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        events.error(e.to_string());
                        break;
                    }
                }
            }
            out = link.next_outbound() => {
                match out {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::text(text)).await {
                            events.error(e.to_string());
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        }
    }

    link.set_state(ReadyState::Closed);
    events.closed();
}
