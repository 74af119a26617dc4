//! EventHub chat client
//!
//! Client-side connection manager for real-time chat channels, usable from
//! native (tokio) and browser (WASM) targets.

pub mod api_client;
pub mod config;
pub mod logging;
pub mod ws;

pub use api_client::{ApiClient, ApiResponse};
pub use config::{ClientConfig, ConfigError};
pub use eventhub_shared::{
    ApiError, ChannelIdentity, ChannelType, Envelope, EnvelopeError, EventKind, OutboundEvent,
};
pub use ws::{
    ChatSocket, CloseReason, ConnectionState, LifecycleEvent, LifecycleKind, ListenerId,
    NotificationSocket, ReconnectPolicy, Reconnector, StaticToken, TokenSource,
};
