//! Chat socket manager.
//!
//! A [`ChatSocket`] owns at most one live connection, keyed by channel
//! identity, and fans inbound envelopes out to listeners by kind. Instances
//! are independent; clones share one instance.

use std::fmt;
use std::sync::{Arc, Weak};

use eventhub_shared::{
    ChannelIdentity, ChannelType, Envelope, EnvelopeError, EventKind, OutboundEvent,
};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;

use super::connection::{
    ConnectionId, ConnectionState, Link, LinkEvent, LinkEventSink, LinkEvents, Transport,
};
use super::listeners::{ListenerId, ListenerRegistry};
use crate::config::ClientConfig;

/// Which lifecycle notice a hook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    Opened,
    Closed,
}

/// Who ended a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Severed by `disconnect` or by connecting to another channel.
    Local,
    /// The transport closed on its own (server close, network drop, failed handshake).
    Remote,
}

/// Connection lifecycle notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Opened {
        channel: ChannelIdentity,
    },
    Closed {
        channel: ChannelIdentity,
        reason: CloseReason,
    },
}

impl LifecycleEvent {
    pub fn kind(&self) -> LifecycleKind {
        match self {
            LifecycleEvent::Opened { .. } => LifecycleKind::Opened,
            LifecycleEvent::Closed { .. } => LifecycleKind::Closed,
        }
    }

    pub fn channel(&self) -> &ChannelIdentity {
        match self {
            LifecycleEvent::Opened { channel } | LifecycleEvent::Closed { channel, .. } => channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Open,
}

struct ActiveConnection {
    id: ConnectionId,
    channel: ChannelIdentity,
    phase: Phase,
    /// `None` until the transport hands the link back.
    link: Option<Box<dyn Link>>,
}

#[derive(Default)]
struct SocketState {
    next_id: u64,
    active: Option<ActiveConnection>,
}

struct Core {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<SocketState>,
    /// Held while inbound events are delivered and while a connection is
    /// detached, so a detached connection never reaches listeners afterwards.
    /// Reentrant: listeners may call back into the socket.
    delivery: ReentrantMutex<()>,
    listeners: Mutex<ListenerRegistry<EventKind, Envelope>>,
    lifecycle: Mutex<ListenerRegistry<LifecycleKind, LifecycleEvent>>,
}

impl Core {
    fn is_current(&self, id: ConnectionId) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| active.id == id)
    }

    /// Run envelope listeners. No lock is held while callbacks run.
    fn dispatch(&self, envelope: &Envelope) {
        let callbacks = self.listeners.lock().snapshot(&envelope.kind);
        for callback in callbacks {
            callback(envelope);
        }
    }

    fn notify(&self, event: LifecycleEvent) {
        let callbacks = self.lifecycle.lock().snapshot(&event.kind());
        for callback in callbacks {
            callback(&event);
        }
    }

    /// Close a connection this manager has already detached from its state.
    fn sever(&self, active: ActiveConnection) {
        if let Some(link) = &active.link {
            link.close();
        }
        crate::log_info!("Socket {} to {} closed locally", active.id, active.channel);
        self.notify(LifecycleEvent::Closed {
            channel: active.channel,
            reason: CloseReason::Local,
        });
    }

    /// The transport could not start a link at all.
    fn fail(&self, id: ConnectionId, detail: String) {
        let failed = {
            let mut state = self.state.lock();
            let is_current = state.active.as_ref().is_some_and(|active| active.id == id);
            if is_current {
                state.active.take()
            } else {
                None
            }
        };
        let Some(failed) = failed else {
            return;
        };
        crate::log_error!("Socket {} to {} failed to open: {}", id, failed.channel, detail);
        self.dispatch(&Envelope::connection_error(detail));
        self.notify(LifecycleEvent::Closed {
            channel: failed.channel,
            reason: CloseReason::Remote,
        });
    }

    fn on_opened(&self, id: ConnectionId) {
        let channel = {
            let mut state = self.state.lock();
            match state.active.as_mut() {
                Some(active) if active.id == id && active.phase == Phase::Connecting => {
                    active.phase = Phase::Open;
                    active.channel.clone()
                }
                _ => {
                    crate::log_debug!("Ignoring open from stale socket {}", id);
                    return;
                }
            }
        };
        crate::log_info!("Socket connected: {}", channel);
        self.notify(LifecycleEvent::Opened { channel });
    }

    fn on_frame(&self, id: ConnectionId, text: &str) {
        let _delivery = self.delivery.lock();
        if !self.is_current(id) {
            crate::log_debug!("Ignoring frame from stale socket {}", id);
            return;
        }
        match Envelope::parse(text) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(EnvelopeError::UnknownKind(kind)) => {
                crate::log_debug!("Ignoring event of unknown type `{}`", kind);
            }
            Err(e) => {
                crate::log_warn!("Dropping malformed frame on socket {}: {}", id, e);
            }
        }
    }

    fn on_error(&self, id: ConnectionId, detail: String) {
        let _delivery = self.delivery.lock();
        if !self.is_current(id) {
            crate::log_debug!("Ignoring error from stale socket {}: {}", id, detail);
            return;
        }
        crate::log_error!("Socket error on {}: {}", id, detail);
        self.dispatch(&Envelope::connection_error(detail));
    }

    fn on_closed(&self, id: ConnectionId) {
        let closed = {
            let mut state = self.state.lock();
            let is_current = state.active.as_ref().is_some_and(|active| active.id == id);
            if is_current {
                state.active.take()
            } else {
                None
            }
        };
        let Some(closed) = closed else {
            crate::log_debug!("Ignoring close from stale socket {}", id);
            return;
        };
        crate::log_info!("Socket closed: {}", closed.channel);
        self.notify(LifecycleEvent::Closed {
            channel: closed.channel,
            reason: CloseReason::Remote,
        });
    }
}

impl LinkEventSink for Core {
    fn link_event(&self, id: ConnectionId, event: LinkEvent) {
        match event {
            LinkEvent::Opened => self.on_opened(id),
            LinkEvent::Frame(text) => self.on_frame(id, &text),
            LinkEvent::Error(detail) => self.on_error(id, detail),
            LinkEvent::Closed => self.on_closed(id),
        }
    }
}

/// Manager for the real-time chat connection.
#[derive(Clone)]
pub struct ChatSocket {
    core: Arc<Core>,
}

/// Non-owning handle to a [`ChatSocket`].
#[derive(Clone)]
pub struct WeakChatSocket {
    core: Weak<Core>,
}

impl WeakChatSocket {
    pub fn upgrade(&self) -> Option<ChatSocket> {
        self.core.upgrade().map(|core| ChatSocket { core })
    }
}

impl fmt::Debug for ChatSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSocket")
            .field("ws_base", &self.core.config.ws_base.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl ChatSocket {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            core: Arc::new(Core {
                config,
                transport: Arc::new(transport),
                state: Mutex::new(SocketState::default()),
                delivery: ReentrantMutex::new(()),
                listeners: Mutex::new(ListenerRegistry::default()),
                lifecycle: Mutex::new(ListenerRegistry::default()),
            }),
        }
    }

    /// A socket using the tokio-tungstenite transport.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn for_platform(config: ClientConfig) -> Self {
        Self::new(config, super::connection::TungsteniteTransport)
    }

    /// A socket using the browser's WebSocket.
    #[cfg(target_arch = "wasm32")]
    pub fn for_platform(config: ClientConfig) -> Self {
        Self::new(config, super::connection::BrowserTransport)
    }

    pub fn downgrade(&self) -> WeakChatSocket {
        WeakChatSocket {
            core: Arc::downgrade(&self.core),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Connect to a channel, replacing any connection to another channel.
    ///
    /// A no-op when a connection for the same channel is already open or
    /// connecting. Failures are reported to `error` listeners, never returned.
    pub fn connect(&self, channel_id: &str, auth_token: &str, channel_type: ChannelType) {
        if channel_id.is_empty() {
            crate::log_warn!("Ignoring connect with an empty channel id");
            return;
        }
        let channel = ChannelIdentity::new(channel_id, channel_type);

        let url = match self.core.config.chat_url(&channel, auth_token) {
            Ok(url) => url,
            Err(e) => {
                crate::log_error!("Cannot build socket URL for {}: {}", channel, e);
                self.core.dispatch(&Envelope::connection_error(e.to_string()));
                return;
            }
        };

        let (id, severed) = {
            let _delivery = self.core.delivery.lock();
            let mut state = self.core.state.lock();
            if state
                .active
                .as_ref()
                .is_some_and(|active| active.channel == channel)
            {
                crate::log_debug!("Socket already connected to {}", channel);
                return;
            }
            let severed = state.active.take();
            state.next_id += 1;
            let id = ConnectionId(state.next_id);
            state.active = Some(ActiveConnection {
                id,
                channel: channel.clone(),
                phase: Phase::Connecting,
                link: None,
            });
            (id, severed)
        };

        // The old link goes down before the new one is requested
        if let Some(old) = severed {
            self.core.sever(old);
        }

        crate::log_info!("Connecting socket {} to {}", id, channel);
        let sink: Weak<dyn LinkEventSink> = Arc::downgrade(&self.core) as Weak<dyn LinkEventSink>;
        match self.core.transport.open(&url, LinkEvents::new(id, sink)) {
            Ok(link) => {
                let superseded = {
                    let mut state = self.core.state.lock();
                    match state.active.as_mut() {
                        Some(active) if active.id == id => {
                            active.link = Some(link);
                            None
                        }
                        _ => Some(link),
                    }
                };
                if let Some(link) = superseded {
                    crate::log_debug!("Socket {} superseded while opening", id);
                    link.close();
                }
            }
            Err(e) => self.core.fail(id, e.to_string()),
        }
    }

    /// Close the active connection, if any.
    ///
    /// Waits for an in-flight delivery on another thread to finish; once this
    /// returns, no listener runs for the severed connection.
    pub fn disconnect(&self) {
        let severed = {
            let _delivery = self.core.delivery.lock();
            self.core.state.lock().active.take()
        };
        match severed {
            Some(active) => self.core.sever(active),
            None => crate::log_debug!("Disconnect with no active socket"),
        }
    }

    /// Serialize `event` and send it as one text frame.
    ///
    /// Dropped with a warning when no connection is open.
    pub fn send<T: Serialize + ?Sized>(&self, event: &T) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                crate::log_error!("Serialize failed: {}", e);
                return;
            }
        };

        let state = self.core.state.lock();
        let open = state
            .active
            .as_ref()
            .filter(|active| active.phase == Phase::Open);
        let Some((id, link)) = open.and_then(|active| Some((active.id, active.link.as_ref()?)))
        else {
            crate::log_warn!("Socket is not connected, dropping frame");
            return;
        };
        if let Err(e) = link.send_text(text) {
            crate::log_error!("Send failed on socket {}: {}", id, e);
        }
    }

    pub fn send_message(&self, message: impl Into<Value>) {
        self.send(&OutboundEvent::message(message));
    }

    pub fn send_typing(&self) {
        self.send(&OutboundEvent::Typing);
    }

    pub fn send_image(&self, image: impl Into<Value>) {
        self.send(&OutboundEvent::image(image));
    }

    pub fn mark_read(&self, message_id: impl Into<String>) {
        self.send(&OutboundEvent::read(message_id));
    }

    /// Register a listener for one event kind. Survives reconnects.
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> ListenerId {
        self.core.listeners.lock().add(kind, Arc::new(callback))
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.core.listeners.lock().remove(&kind, id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.core.listeners.lock().len(&kind)
    }

    /// Register a hook for open or close notices.
    pub fn on_lifecycle(
        &self,
        kind: LifecycleKind,
        callback: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.core.lifecycle.lock().add(kind, Arc::new(callback))
    }

    pub fn off_lifecycle(&self, kind: LifecycleKind, id: ListenerId) -> bool {
        self.core.lifecycle.lock().remove(&kind, id)
    }

    pub fn state(&self) -> ConnectionState {
        match self.core.state.lock().active.as_ref() {
            None => ConnectionState::Absent,
            Some(active) => match active.phase {
                Phase::Connecting => ConnectionState::Connecting {
                    channel: active.channel.clone(),
                },
                Phase::Open => ConnectionState::Open {
                    channel: active.channel.clone(),
                },
            },
        }
    }

    pub fn current_channel(&self) -> Option<ChannelIdentity> {
        self.core
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.channel.clone())
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }
}
