//! Native/Desktop WebSocket transport using tokio-tungstenite.

use std::pin::pin;

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{ChannelLink, Link, LinkEvents, Outgoing, Transport, TransportError};

/// Opens each link on a background tokio task.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, url: &Url, events: LinkEvents) -> Result<Box<dyn Link>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let (sender, receiver) = unbounded();
        runtime.spawn(drive_link(url.to_string(), receiver, events));
        Ok(Box::new(ChannelLink::new(sender)))
    }
}

/// Run one link from handshake to close.
async fn drive_link(url: String, mut outbound: UnboundedReceiver<Outgoing>, events: LinkEvents) {
    let connection = events.id();
    let mut handshake = pin!(connect_async(url.as_str()));
    let ws_stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok((ws_stream, _response)) => break ws_stream,
                Err(e) => {
                    crate::log_error!("WebSocket {} failed to connect: {}", connection, e);
                    events.error(e.to_string());
                    events.closed();
                    return;
                }
            },
            out = outbound.next() => match out {
                Some(Outgoing::Text(_)) => {
                    crate::log_warn!("WebSocket {} not open, dropping frame", connection);
                }
                Some(Outgoing::Close) | None => {
                    // Severed mid-handshake: drop the TCP stream without upgrading
                    crate::log_debug!("WebSocket {} severed before handshake completed", connection);
                    events.closed();
                    return;
                }
            },
        }
    };

    crate::log_debug!("WebSocket {} handshake complete", connection);
    events.opened();

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            out = outbound.next() => match out {
                Some(Outgoing::Text(text)) => {
                    crate::log_debug!("Sending on {}: {}", connection, text);
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        crate::log_error!("Send failed on {}: {}", connection, e);
                        events.error(e.to_string());
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    // Severed locally
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.frame(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(_))) => {
                    crate::log_info!("WebSocket {} received close frame", connection);
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    // Pong is handled automatically by tungstenite
                    crate::log_debug!("Received ping: {:?}", data);
                }
                Some(Ok(_)) => {
                    // Ignore binary, pong, etc.
                }
                Some(Err(e)) => {
                    crate::log_error!("WebSocket read error on {}: {}", connection, e);
                    events.error(e.to_string());
                    break;
                }
                None => break,
            },
        }
    }

    events.closed();
}
