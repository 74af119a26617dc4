//! WebSocket client for real-time chat channels.
//!
//! This module provides:
//! - [`ChatSocket`]: one live connection per instance, keyed by channel
//! - Kind-based listener dispatch of inbound envelopes
//! - [`Reconnector`]: optional bounded retry after server-side closes
//! - [`NotificationSocket`]: a user's notification stream, self-reconnecting
//!
//! # Architecture
//!
//! ```text
//!   ┌─────────────┐   lifecycle hooks   ┌─────────────┐
//!   │ Reconnector │ ◀────────────────── │  ChatSocket │
//!   └─────────────┘ ──── connect() ───▶ └─────────────┘
//!                                          │      ▲
//!                                 open()   │      │ LinkEvents
//!                                          ▼      │
//!                                      ┌─────────────┐
//!                                      │  Transport  │
//!                                      │ (tungstenite│
//!                                      │  / browser) │
//!                                      └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let socket = ChatSocket::for_platform(ClientConfig::from_env()?);
//! socket.on(EventKind::Message, |env| println!("{}", env.payload));
//! socket.connect("chat-1", &token, ChannelType::Personal);
//! socket.send_message("hello");
//! ```

mod connection;
mod listeners;
mod manager;
mod notifications;
mod reconnect;
#[cfg(test)]
mod testing;

pub use connection::{
    ConnectionId, ConnectionState, Link, LinkEvent, LinkEventSink, LinkEvents, Transport,
    TransportError,
};
#[cfg(target_arch = "wasm32")]
pub use connection::BrowserTransport;
#[cfg(not(target_arch = "wasm32"))]
pub use connection::TungsteniteTransport;

pub use listeners::{Callback, ListenerId};
pub use manager::{ChatSocket, CloseReason, LifecycleEvent, LifecycleKind, WeakChatSocket};
pub use notifications::NotificationSocket;
pub use reconnect::{ReconnectPolicy, Reconnector, StaticToken, TokenSource};
