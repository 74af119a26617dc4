//! Per-user notification stream.
//!
//! Frames are not routed by kind: every JSON frame goes to every listener.
//! Unlike [`ChatSocket`](super::ChatSocket), this socket keeps itself
//! subscribed. After the server drops it, it retries on the
//! [`ReconnectPolicy`] schedule with a fresh token per attempt until the
//! budget runs out or `disconnect` is called.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use eventhub_shared::ApiError;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionId, Link, LinkEvent, LinkEventSink, LinkEvents, Transport};
use super::listeners::{ListenerId, ListenerRegistry};
use super::reconnect::{spawn_retry, wait_or_cancel, ReconnectPolicy, TokenSource};
use crate::config::ClientConfig;

struct Subscription {
    id: ConnectionId,
    user_id: String,
    open: bool,
    link: Option<Box<dyn Link>>,
}

struct StreamState {
    next_id: u64,
    active: Option<Subscription>,
    /// User to keep subscribed. Cleared by `disconnect`.
    target: Option<String>,
    attempts: u32,
    /// Cancels retries scheduled for the current target.
    retry: CancellationToken,
}

impl StreamState {
    fn reset_retries(&mut self) {
        self.retry.cancel();
        self.retry = CancellationToken::new();
        self.attempts = 0;
    }
}

struct Inner {
    me: Weak<Inner>,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    policy: ReconnectPolicy,
    state: Mutex<StreamState>,
    listeners: Mutex<ListenerRegistry<(), Value>>,
}

impl Inner {
    fn is_current(&self, id: ConnectionId) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| active.id == id)
    }

    /// Open a link for `user_id`. `fresh` marks a caller request, which
    /// restarts the retry budget.
    fn subscribe(&self, user_id: &str, token: &str, fresh: bool) {
        let url = match self.config.notifications_url(user_id, token) {
            Ok(url) => url,
            Err(e) => {
                crate::log_error!("Cannot build notification URL for {}: {}", user_id, e);
                return;
            }
        };

        let (id, severed) = {
            let mut state = self.state.lock();
            if state
                .active
                .as_ref()
                .is_some_and(|active| active.user_id == user_id)
            {
                crate::log_debug!("Notification stream already connected for user {}", user_id);
                return;
            }
            if fresh {
                state.reset_retries();
            }
            state.target = Some(user_id.to_string());
            let severed = state.active.take();
            state.next_id += 1;
            let id = ConnectionId(state.next_id);
            state.active = Some(Subscription {
                id,
                user_id: user_id.to_string(),
                open: false,
                link: None,
            });
            (id, severed)
        };

        if let Some(old) = severed {
            if let Some(link) = &old.link {
                link.close();
            }
            crate::log_info!("Notification stream for user {} closed locally", old.user_id);
        }

        crate::log_info!("Creating notification stream {} for user {}", id, user_id);
        let sink: Weak<dyn LinkEventSink> = self.me.clone();
        match self.transport.open(&url, LinkEvents::new(id, sink)) {
            Ok(link) => {
                let superseded = {
                    let mut state = self.state.lock();
                    match state.active.as_mut() {
                        Some(active) if active.id == id => {
                            active.link = Some(link);
                            None
                        }
                        _ => Some(link),
                    }
                };
                if let Some(link) = superseded {
                    link.close();
                }
            }
            Err(e) => {
                crate::log_error!("Error connecting notification stream: {}", e);
                self.on_closed(id);
            }
        }
    }

    fn on_opened(&self, id: ConnectionId) {
        let user_id = {
            let mut state = self.state.lock();
            let user_id = match state.active.as_mut() {
                Some(active) if active.id == id => {
                    active.open = true;
                    active.user_id.clone()
                }
                _ => return,
            };
            state.attempts = 0;
            user_id
        };
        crate::log_info!("Notification stream connected for user {}", user_id);
    }

    fn on_frame(&self, id: ConnectionId, text: &str) {
        if !self.is_current(id) {
            crate::log_debug!("Ignoring notification from stale stream {}", id);
            return;
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                crate::log_error!("Error parsing notification: {}", e);
                return;
            }
        };
        let callbacks = self.listeners.lock().snapshot(&());
        for callback in callbacks {
            callback(&value);
        }
    }

    /// Errors end the link; the close that follows drives the retry.
    fn on_error(&self, id: ConnectionId, detail: &str) {
        let state = self.state.lock();
        let Some(active) = state.active.as_ref().filter(|active| active.id == id) else {
            return;
        };
        crate::log_error!("Notification stream error: {}", detail);
        if let Some(link) = &active.link {
            link.close();
        }
    }

    fn on_closed(&self, id: ConnectionId) {
        let retry = {
            let mut state = self.state.lock();
            let is_current = state.active.as_ref().is_some_and(|active| active.id == id);
            let closed = if is_current { state.active.take() } else { None };
            let Some(closed) = closed else {
                return;
            };
            crate::log_info!("Notification stream disconnected for user {}", closed.user_id);

            if state.target.as_deref() != Some(closed.user_id.as_str())
                || state.retry.is_cancelled()
            {
                None
            } else if state.attempts >= self.policy.max_attempts {
                crate::log_warn!("Max reconnection attempts reached. No further reconnection.");
                None
            } else {
                state.attempts += 1;
                Some((closed.user_id, state.attempts, state.retry.clone()))
            }
        };

        if let Some((user_id, attempt, cancel)) = retry {
            let delay = self.policy.delay_for_attempt(attempt);
            crate::log_info!("Reconnecting... Attempt {} after {:?}", attempt, delay);
            spawn_retry(resubscribe(self.me.clone(), user_id, delay, cancel));
        }
    }
}

impl LinkEventSink for Inner {
    fn link_event(&self, id: ConnectionId, event: LinkEvent) {
        match event {
            LinkEvent::Opened => self.on_opened(id),
            LinkEvent::Frame(text) => self.on_frame(id, &text),
            LinkEvent::Error(detail) => self.on_error(id, &detail),
            LinkEvent::Closed => self.on_closed(id),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.retry.cancel();
        if let Some(link) = state.active.take().and_then(|active| active.link) {
            link.close();
        }
    }
}

async fn resubscribe(
    inner: Weak<Inner>,
    user_id: String,
    delay: Duration,
    cancel: CancellationToken,
) {
    if !wait_or_cancel(delay, &cancel).await {
        crate::log_debug!("Notification reconnect for user {} cancelled", user_id);
        return;
    }
    let Some(tokens) = inner.upgrade().map(|inner| Arc::clone(&inner.tokens)) else {
        return;
    };
    let token = match tokens.token().await {
        Ok(token) => token,
        Err(e) => {
            crate::log_error!("Error fetching socket token: {}", e);
            return;
        }
    };
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if cancel.is_cancelled() {
        return;
    }
    inner.subscribe(&user_id, &token, false);
}

/// Notification stream for one user at a time. Clones share one stream.
#[derive(Clone)]
pub struct NotificationSocket {
    inner: Arc<Inner>,
}

impl fmt::Debug for NotificationSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSocket")
            .field("user", &self.current_user())
            .field("open", &self.is_open())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl NotificationSocket {
    pub fn new(
        config: ClientConfig,
        transport: impl Transport + 'static,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self::with_policy(config, transport, tokens, ReconnectPolicy::default())
    }

    pub fn with_policy(
        config: ClientConfig,
        transport: impl Transport + 'static,
        tokens: Arc<dyn TokenSource>,
        policy: ReconnectPolicy,
    ) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        Self {
            inner: Arc::new_cyclic(|me| Inner {
                me: me.clone(),
                config,
                transport,
                tokens,
                policy,
                state: Mutex::new(StreamState {
                    next_id: 0,
                    active: None,
                    target: None,
                    attempts: 0,
                    retry: CancellationToken::new(),
                }),
                listeners: Mutex::new(ListenerRegistry::default()),
            }),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn for_platform(config: ClientConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self::new(config, super::connection::TungsteniteTransport, tokens)
    }

    #[cfg(target_arch = "wasm32")]
    pub fn for_platform(config: ClientConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self::new(config, super::connection::BrowserTransport, tokens)
    }

    /// Subscribe to `user_id`'s notifications with a token in hand.
    ///
    /// A no-op while a stream for the same user is open or connecting.
    pub fn connect(&self, user_id: &str, token: &str) {
        if user_id.is_empty() {
            crate::log_warn!("Ignoring notification connect with an empty user id");
            return;
        }
        self.inner.subscribe(user_id, token, true);
    }

    /// Fetch a token from the token source, then [`connect`](Self::connect).
    pub async fn subscribe(&self, user_id: &str) -> Result<(), ApiError> {
        let token = self.inner.tokens.token().await?;
        self.connect(user_id, &token);
        Ok(())
    }

    /// Close the stream and abandon pending retries. Listeners stay registered.
    pub fn disconnect(&self) {
        let severed = {
            let mut state = self.inner.state.lock();
            state.reset_retries();
            state.target = None;
            state.active.take()
        };
        match severed {
            Some(active) => {
                if let Some(link) = &active.link {
                    link.close();
                }
                crate::log_info!("Notification stream for user {} closed", active.user_id);
            }
            None => crate::log_debug!("Notification disconnect with no active stream"),
        }
    }

    /// Register a listener for every parsed frame.
    pub fn on(&self, callback: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.inner.listeners.lock().add((), Arc::new(callback))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().remove(&(), id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len(&())
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| active.open)
    }

    pub fn current_user(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.user_id.clone())
    }

    /// Retries made since the stream last opened.
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }
}
