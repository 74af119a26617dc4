//! Transport links for the chat socket.
//!
//! A [`Transport`] opens one duplex text-frame [`Link`] per connection and
//! reports everything that happens on it through [`LinkEvents`]. The
//! platform-specific implementation is included conditionally.

use std::fmt;
use std::sync::{Arc, Weak};

use eventhub_shared::ChannelIdentity;
use futures_channel::mpsc::UnboundedSender;
use thiserror::Error;
use url::Url;

/// Identifies one connection attempt of a manager. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Observable state of a chat socket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Absent,
    Connecting {
        channel: ChannelIdentity,
    },
    Open {
        channel: ChannelIdentity,
    },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting { .. })
    }

    pub fn channel(&self) -> Option<&ChannelIdentity> {
        match self {
            ConnectionState::Absent => None,
            ConnectionState::Connecting { channel } | ConnectionState::Open { channel } => {
                Some(channel)
            }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to open link: {0}")]
    Open(String),
    #[error("link is closed")]
    Closed,
    #[error("no async runtime available to drive the link")]
    NoRuntime,
}

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Frame(String),
    Error(String),
    /// Terminal. Reported exactly once per link.
    Closed,
}

/// Receiver of link events, tagged with the connection they belong to.
pub trait LinkEventSink: Send + Sync {
    fn link_event(&self, id: ConnectionId, event: LinkEvent);
}

/// Callback handle given to a transport when it opens a link.
///
/// Holds its sink weakly: once the owner is gone, events go nowhere.
#[derive(Clone)]
pub struct LinkEvents {
    id: ConnectionId,
    sink: Weak<dyn LinkEventSink>,
}

impl fmt::Debug for LinkEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEvents").field("id", &self.id).finish()
    }
}

impl LinkEvents {
    pub fn new(id: ConnectionId, sink: Weak<dyn LinkEventSink>) -> Self {
        Self { id, sink }
    }

    /// Bind directly to a sink the caller keeps alive.
    pub fn for_sink(id: ConnectionId, sink: &Arc<dyn LinkEventSink>) -> Self {
        Self::new(id, Arc::downgrade(sink))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn emit(&self, event: LinkEvent) {
        if let Some(sink) = self.sink.upgrade() {
            sink.link_event(self.id, event);
        }
    }

    pub fn opened(&self) {
        self.emit(LinkEvent::Opened);
    }

    pub fn frame(&self, text: impl Into<String>) {
        self.emit(LinkEvent::Frame(text.into()));
    }

    pub fn error(&self, detail: impl Into<String>) {
        self.emit(LinkEvent::Error(detail.into()));
    }

    pub fn closed(&self) {
        self.emit(LinkEvent::Closed);
    }
}

/// Outbound half of an open link.
pub trait Link: Send {
    /// Queue one text frame. Does not wait for delivery.
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Sever the link. Further callbacks for it may still arrive.
    fn close(&self);
}

/// Opens links. Must not block: progress is reported through `events`.
pub trait Transport: Send + Sync {
    fn open(&self, url: &Url, events: LinkEvents) -> Result<Box<dyn Link>, TransportError>;
}

/// Work handed from a [`ChannelLink`] to the task driving the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    Text(String),
    Close,
}

/// [`Link`] backed by an unbounded queue drained by a driver task.
#[derive(Debug)]
pub(crate) struct ChannelLink {
    sender: UnboundedSender<Outgoing>,
}

impl ChannelLink {
    pub(crate) fn new(sender: UnboundedSender<Outgoing>) -> Self {
        Self { sender }
    }
}

impl Link for ChannelLink {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.sender
            .unbounded_send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.sender.unbounded_send(Outgoing::Close);
        self.sender.close_channel();
    }
}

/// Detail text for a transport error event that may carry no message.
#[cfg(any(target_arch = "wasm32", test))]
pub(crate) fn error_detail(message: Option<&str>) -> String {
    match message.map(str::trim) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => "WebSocket error".to_string(),
    }
}

// Include platform-specific implementation
#[cfg(target_arch = "wasm32")]
mod connection_wasm;
#[cfg(target_arch = "wasm32")]
pub use connection_wasm::BrowserTransport;

#[cfg(not(target_arch = "wasm32"))]
mod connection_native;
#[cfg(not(target_arch = "wasm32"))]
pub use connection_native::TungsteniteTransport;
