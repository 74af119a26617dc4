//! Bounded reconnection for a [`ChatSocket`].
//!
//! The socket itself never retries. A [`Reconnector`] watches its lifecycle
//! and, after the server drops a channel that had been open, re-issues
//! `connect` with a fresh token on an exponential backoff schedule until the
//! attempt budget runs out, the link opens again, or it is cancelled.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventhub_shared::{ApiError, ChannelIdentity};
use futures_util::future::{select, Either};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::listeners::ListenerId;
use super::manager::{ChatSocket, CloseReason, LifecycleEvent, LifecycleKind, WeakChatSocket};
use crate::api_client::ApiClient;

/// Supplies the auth token for each connection attempt.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, ApiError>;
}

/// A token known up front.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, ApiError> {
        Ok(self.0.clone())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl TokenSource for ApiClient {
    async fn token(&self) -> Result<String, ApiError> {
        self.ws_token().await
    }
}

/// Configuration for reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnect attempts (0 = never reconnect)
    pub max_attempts: u32,
    /// Base delay, multiplied once per attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if delay.is_finite() && delay < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(delay)
        } else {
            self.max_delay
        }
    }
}

#[derive(Debug, Default)]
struct RetryTracker {
    /// Channel to restore: the last one seen open and not closed locally.
    target: Option<ChannelIdentity>,
    attempts: u32,
}

/// Re-connects a socket after remote closes. Cancelled on drop.
pub struct Reconnector {
    socket: WeakChatSocket,
    hooks: [(LifecycleKind, ListenerId); 2],
    cancel: CancellationToken,
    tracker: Arc<Mutex<RetryTracker>>,
}

impl std::fmt::Debug for Reconnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconnector")
            .field("tracker", &*self.tracker.lock())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Reconnector {
    pub fn attach(
        socket: &ChatSocket,
        policy: ReconnectPolicy,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tracker = Arc::new(Mutex::new(RetryTracker::default()));

        let on_open = {
            let tracker = Arc::clone(&tracker);
            socket.on_lifecycle(LifecycleKind::Opened, move |event| {
                let mut tracker = tracker.lock();
                tracker.target = Some(event.channel().clone());
                tracker.attempts = 0;
            })
        };

        let on_close = {
            let tracker = Arc::clone(&tracker);
            let cancel = cancel.clone();
            let weak = socket.downgrade();
            socket.on_lifecycle(LifecycleKind::Closed, move |event| {
                let LifecycleEvent::Closed { channel, reason } = event else {
                    return;
                };
                let attempt = {
                    let mut tracker = tracker.lock();
                    if *reason == CloseReason::Local {
                        tracker.target = None;
                        tracker.attempts = 0;
                        return;
                    }
                    if tracker.target.as_ref() != Some(channel) || cancel.is_cancelled() {
                        return;
                    }
                    if tracker.attempts >= policy.max_attempts {
                        crate::log_warn!(
                            "Max reconnection attempts ({}) reached for {}. No further reconnection.",
                            policy.max_attempts,
                            channel
                        );
                        return;
                    }
                    tracker.attempts += 1;
                    tracker.attempts
                };

                let delay = policy.delay_for_attempt(attempt);
                crate::log_info!(
                    "Reconnecting to {}... attempt {} after {:?}",
                    channel,
                    attempt,
                    delay
                );
                spawn_retry(retry_after(
                    delay,
                    cancel.clone(),
                    weak.clone(),
                    Arc::clone(&tracker),
                    channel.clone(),
                    Arc::clone(&tokens),
                ));
            })
        };

        Self {
            socket: socket.downgrade(),
            hooks: [
                (LifecycleKind::Opened, on_open),
                (LifecycleKind::Closed, on_close),
            ],
            cancel,
            tracker,
        }
    }

    /// Attempts made since the channel last opened.
    pub fn attempts(&self) -> u32 {
        self.tracker.lock().attempts
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop retrying: pending attempts are abandoned and the hooks removed.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(socket) = self.socket.upgrade() {
            for (kind, id) in self.hooks {
                socket.off_lifecycle(kind, id);
            }
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn retry_after(
    delay: Duration,
    cancel: CancellationToken,
    socket: WeakChatSocket,
    tracker: Arc<Mutex<RetryTracker>>,
    channel: ChannelIdentity,
    tokens: Arc<dyn TokenSource>,
) {
    if !wait_or_cancel(delay, &cancel).await {
        crate::log_debug!("Reconnect to {} cancelled", channel);
        return;
    }

    let token = match tokens.token().await {
        Ok(token) => token,
        Err(e) => {
            crate::log_error!("Error fetching socket token for {}: {}", channel, e);
            return;
        }
    };

    if cancel.is_cancelled() || tracker.lock().target.as_ref() != Some(&channel) {
        return;
    }
    let Some(socket) = socket.upgrade() else {
        return;
    };
    if let Some(current) = socket.current_channel() {
        crate::log_debug!("Skipping reconnect to {}: socket is on {}", channel, current);
        return;
    }
    socket.connect(&channel.channel_id, &token, channel.channel_type);
}

/// Sleep for `delay`. Returns `false` if `cancel` fired first.
pub(super) async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    let wait = pin!(sleep(delay));
    let cancelled = pin!(cancel.cancelled());
    matches!(select(cancelled, wait).await, Either::Right(_))
}

#[cfg(not(target_arch = "wasm32"))]
pub(super) fn spawn_retry(task: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
        }
        Err(_) => crate::log_error!("No tokio runtime, cannot schedule reconnect"),
    }
}

#[cfg(target_arch = "wasm32")]
pub(super) fn spawn_retry(task: impl Future<Output = ()> + 'static) {
    wasm_bindgen_futures::spawn_local(task);
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep(delay: Duration) {
    gloo_timers::future::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::ws::testing::ScriptedTransport;
    use eventhub_shared::ChannelType;

    fn setup(policy: ReconnectPolicy) -> (ChatSocket, ScriptedTransport, Reconnector) {
        let transport = ScriptedTransport::default();
        let socket = ChatSocket::new(ClientConfig::default(), transport.clone());
        let reconnector =
            Reconnector::attach(&socket, policy, Arc::new(StaticToken("fresh".to_string())));
        (socket, transport, reconnector)
    }

    fn open_chat_1(socket: &ChatSocket, transport: &ScriptedTransport) {
        socket.connect("chat-1", "tok", ChannelType::Personal);
        transport.link(0).open();
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    struct NoToken;

    #[async_trait]
    impl TokenSource for NoToken {
        async fn token(&self) -> Result<String, ApiError> {
            Err(ApiError::Http {
                status: 401,
                body: "expired".to_string(),
            })
        }
    }

    #[test]
    fn default_schedule_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (1..=5).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            [2, 4, 8, 10, 10].map(Duration::from_secs).to_vec()
        );
        assert_eq!(policy.delay_for_attempt(u32::MAX), policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_remote_close_with_fresh_token() {
        let (socket, transport, _reconnector) = setup(ReconnectPolicy::default());
        open_chat_1(&socket, &transport);

        transport.link(0).close_remote();
        assert_eq!(transport.link_count(), 1);

        advance(2_100).await;
        assert_eq!(transport.link_count(), 2);
        assert_eq!(transport.link(1).url.query(), Some("token=fresh"));
        assert_eq!(socket.current_channel(), Some(ChannelIdentity::personal("chat-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn local_disconnect_is_not_retried() {
        let (socket, transport, _reconnector) = setup(ReconnectPolicy::default());
        open_chat_1(&socket, &transport);

        socket.disconnect();
        advance(60_000).await;

        assert_eq!(transport.link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_budget() {
        let (socket, transport, reconnector) = setup(ReconnectPolicy::default());
        open_chat_1(&socket, &transport);

        for (i, secs) in [2u64, 4, 8, 10, 10].into_iter().enumerate() {
            transport.link(i).close_remote();
            advance(secs * 1000 + 100).await;
            assert_eq!(transport.link_count(), i + 2);
        }
        assert_eq!(reconnector.attempts(), 5);

        transport.link(5).close_remote();
        advance(120_000).await;
        assert_eq!(transport.link_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_budget() {
        let (socket, transport, reconnector) = setup(ReconnectPolicy::default());
        open_chat_1(&socket, &transport);

        transport.link(0).close_remote();
        advance(2_100).await;
        assert_eq!(reconnector.attempts(), 1);

        transport.link(1).open();
        assert_eq!(reconnector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_abandons_pending_retry() {
        let (socket, transport, reconnector) = setup(ReconnectPolicy::default());
        open_chat_1(&socket, &transport);

        transport.link(0).close_remote();
        reconnector.cancel();
        advance(60_000).await;

        assert!(reconnector.is_cancelled());
        assert_eq!(transport.link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_reconnector_schedules_nothing() {
        let (socket, transport, reconnector) = setup(ReconnectPolicy::default());
        open_chat_1(&socket, &transport);
        drop(reconnector);

        transport.link(0).close_remote();
        advance(60_000).await;

        assert_eq!(transport.link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_retry_yields_to_newer_channel() {
        let (socket, transport, _reconnector) = setup(ReconnectPolicy::default());
        open_chat_1(&socket, &transport);

        transport.link(0).close_remote();
        socket.connect("chat-2", "tok", ChannelType::Personal);
        advance(10_000).await;

        assert_eq!(transport.link_count(), 2);
        assert_eq!(socket.current_channel(), Some(ChannelIdentity::personal("chat-2")));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_never_retries() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        };
        let (socket, transport, _reconnector) = setup(policy);
        open_chat_1(&socket, &transport);

        transport.link(0).close_remote();
        advance(60_000).await;

        assert_eq!(transport.link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_failure_abandons_attempt() {
        let transport = ScriptedTransport::default();
        let socket = ChatSocket::new(ClientConfig::default(), transport.clone());
        let _reconnector =
            Reconnector::attach(&socket, ReconnectPolicy::default(), Arc::new(NoToken));
        open_chat_1(&socket, &transport);

        transport.link(0).close_remote();
        advance(60_000).await;

        assert_eq!(transport.link_count(), 1);
        assert_eq!(socket.current_channel(), None);
    }
}
