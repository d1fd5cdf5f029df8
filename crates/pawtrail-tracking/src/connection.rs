//! Connection manager for a booking's tracking feed.
//!
//! Provides one logical, reconnecting subscription on top of an unreliable
//! [`Transport`]:
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──opened──▶ Open ◀─┐ frame
//!                        ▲   │                │  └──┘
//!                        │   └──error/close───┤
//!                        │                    ▼
//!                        └──────delay──── Retrying ──budget spent──▶ Failed
//!
//!   any ──disconnect──▶ Closed
//! ```
//!
//! Each `connect` starts a new generation and one driver task owns the
//! transport and the retry sleep for that generation. `disconnect` bumps the
//! generation and aborts the driver, so a frame that lands after teardown
//! is never delivered. The generation is checked under the session lock and
//! the handler then runs after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use pawtrail_core::config::{ApiConfig, TrackingConfig};
use pawtrail_core::TrackingUpdate;

use crate::backoff::ReconnectPolicy;
use crate::task::TaskGuard;
use crate::token::TokenProvider;
use crate::transport::Transport;

pub type UpdateHandler = Arc<dyn Fn(TrackingUpdate) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(TrackingError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Receiving updates.
    Open,
    /// Backoff timer pending.
    Retrying,
    /// Reconnection budget exhausted. Terminal until the next `connect`.
    Failed,
    /// Explicitly disconnected. Ready for `connect`.
    Closed,
}

/// Conditions reported through the error callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    /// No bearer token was available. Needs re-authentication, never retried.
    #[error("no authentication token")]
    MissingToken,
    /// An inbound frame was not a valid tracking update. The feed stays open.
    #[error("failed to parse tracking update: {0}")]
    Decode(String),
    /// Every reconnection attempt failed. The caller must `connect` again.
    #[error("max reconnection attempts reached ({attempts})")]
    ReconnectExhausted { attempts: u32 },
}

impl TrackingError {
    /// Whether the session ended with this error.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

struct Session {
    generation: u64,
    booking_id: Option<String>,
    state: ConnectionState,
    attempts: u32,
    on_update: Option<UpdateHandler>,
    on_error: Option<ErrorHandler>,
    driver: Option<TaskGuard>,
}

impl Session {
    /// Drop everything owned by the current generation.
    fn teardown(&mut self) {
        self.generation += 1;
        self.booking_id = None;
        self.attempts = 0;
        self.on_update = None;
        self.on_error = None;
        self.driver = None;
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    policy: ReconnectPolicy,
    feed_base: String,
    connect_timeout: Duration,
    session: Mutex<Session>,
}

/// Reconnecting subscription to one booking's tracking feed.
///
/// Callbacks run on the manager's driver task. A callback starts only if its
/// frame passed the generation check before [`disconnect`] took the session
/// lock. On a current-thread runtime nothing runs after `disconnect`
/// returns. On a multi-thread runtime a callback that already passed the
/// check may still be entering its handler while `disconnect` returns;
/// handlers that need a hard cut-off should check their own state.
///
/// [`disconnect`]: ConnectionManager::disconnect
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        feed_base: impl Into<String>,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                tokens,
                policy,
                feed_base: feed_base.into(),
                connect_timeout,
                session: Mutex::new(Session {
                    generation: 0,
                    booking_id: None,
                    state: ConnectionState::Idle,
                    attempts: 0,
                    on_update: None,
                    on_error: None,
                    driver: None,
                }),
            }),
        }
    }

    pub fn from_config(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        api: &ApiConfig,
        tracking: &TrackingConfig,
    ) -> Self {
        Self::new(
            transport,
            tokens,
            api.ws_url.clone(),
            ReconnectPolicy::from_config(tracking),
            tracking.connect_timeout(),
        )
    }

    /// Subscribe to `booking_id`'s feed. Fire-and-forget: outcomes arrive
    /// through the callbacks.
    ///
    /// Any previous session is torn down first. Without a token the error
    /// callback is invoked once, before this returns, and nothing is opened.
    /// Must be called within a tokio runtime.
    pub fn connect<U, E>(&self, booking_id: &str, on_update: U, on_error: E)
    where
        U: Fn(TrackingUpdate) + Send + Sync + 'static,
        E: Fn(TrackingError) + Send + Sync + 'static,
    {
        let mut session = self.inner.lock();
        session.teardown();
        session.state = ConnectionState::Idle;

        let Some(token) = self.inner.tokens.access_token() else {
            drop(session);
            tracing::warn!(booking_id, "no authentication token, tracking feed not opened");
            on_error(TrackingError::MissingToken);
            return;
        };

        let generation = session.generation;
        session.booking_id = Some(booking_id.to_string());
        session.on_update = Some(Arc::new(on_update));
        session.on_error = Some(Arc::new(on_error));
        session.state = ConnectionState::Connecting;
        session.driver = Some(TaskGuard::spawn(drive(
            Arc::clone(&self.inner),
            generation,
            booking_id.to_string(),
            token,
        )));

        tracing::info!(booking_id, generation, "tracking feed subscription started");
    }

    /// Tear down the session: cancel any pending retry, close the transport,
    /// and forget both callbacks. Safe to call in any state, any number of
    /// times.
    pub fn disconnect(&self) {
        let mut session = self.inner.lock();
        if session.state == ConnectionState::Idle && session.driver.is_none() {
            return;
        }
        let booking_id = session.booking_id.take();
        session.teardown();
        session.state = ConnectionState::Closed;
        tracing::info!(booking_id = booking_id.as_deref(), "tracking feed disconnected");
    }

    /// Best-effort view of whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().state == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Reconnection attempts since the last successfully decoded frame.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn booking_id(&self) -> Option<String> {
        self.inner.lock().booking_id.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

enum Retry {
    After(Duration),
    Stop,
}

async fn drive(inner: Arc<Inner>, generation: u64, booking_id: String, mut token: String) {
    loop {
        let url = feed_url(&inner.feed_base, &booking_id, &token);

        match tokio::time::timeout(inner.connect_timeout, inner.transport.open(&url)).await {
            Ok(Ok(mut frames)) => {
                if !inner.set_state(generation, ConnectionState::Open) {
                    return;
                }
                tracing::info!(booking_id = %booking_id, "tracking feed open");

                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(payload) => {
                            if !inner.deliver(generation, &payload) {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(booking_id = %booking_id, error = %e, "tracking feed error");
                            break;
                        }
                    }
                }
                tracing::debug!(booking_id = %booking_id, "tracking feed closed");
            }
            Ok(Err(e)) => {
                tracing::warn!(booking_id = %booking_id, error = %e, "tracking feed handshake failed");
            }
            Err(_) => {
                tracing::warn!(
                    booking_id = %booking_id,
                    timeout_ms = inner.connect_timeout.as_millis() as u64,
                    "tracking feed handshake timed out"
                );
            }
        }

        let delay = match inner.schedule_retry(generation) {
            Retry::After(delay) => delay,
            Retry::Stop => return,
        };
        tokio::time::sleep(delay).await;

        token = match inner.tokens.access_token() {
            Some(token) => token,
            None => {
                inner.end_without_token(generation);
                return;
            }
        };
        if !inner.set_state(generation, ConnectionState::Connecting) {
            return;
        }
    }
}

fn feed_url(base: &str, booking_id: &str, token: &str) -> String {
    format!(
        "{}/ws/tracking/{}?token={}",
        base.trim_end_matches('/'),
        urlencoding::encode(booking_id),
        urlencoding::encode(token)
    )
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        // A handler panic must not wedge teardown.
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        let mut session = self.lock();
        if session.generation != generation {
            return false;
        }
        session.state = state;
        true
    }

    /// Decode and hand one frame to the subscriber. Returns `false` once the
    /// generation has been superseded.
    fn deliver(&self, generation: u64, frame: &[u8]) -> bool {
        let decoded = TrackingUpdate::decode(frame);

        let mut session = self.lock();
        if session.generation != generation {
            return false;
        }
        match decoded {
            Ok(update) => {
                session.attempts = 0;
                let handler = session.on_update.clone();
                drop(session);
                if let Some(handler) = handler {
                    handler(update);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable tracking frame");
                let handler = session.on_error.clone();
                drop(session);
                if let Some(handler) = handler {
                    handler(TrackingError::Decode(e.to_string()));
                }
            }
        }
        true
    }

    fn schedule_retry(&self, generation: u64) -> Retry {
        let mut session = self.lock();
        if session.generation != generation {
            return Retry::Stop;
        }

        if self.policy.exhausted(session.attempts) {
            let attempts = session.attempts;
            let booking_id = session.booking_id.take();
            let handler = session.on_error.take();
            session.on_update = None;
            session.state = ConnectionState::Failed;
            // The caller is the driver itself; let it return on its own.
            if let Some(driver) = session.driver.take() {
                driver.detach();
            }
            drop(session);

            tracing::error!(
                booking_id = booking_id.as_deref(),
                attempts,
                "tracking feed gave up reconnecting"
            );
            if let Some(handler) = handler {
                handler(TrackingError::ReconnectExhausted { attempts });
            }
            return Retry::Stop;
        }

        session.attempts += 1;
        let delay = self.policy.delay_for(session.attempts);
        session.state = ConnectionState::Retrying;
        tracing::info!(
            booking_id = session.booking_id.as_deref(),
            attempt = session.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling tracking feed reconnect"
        );
        Retry::After(delay)
    }

    fn end_without_token(&self, generation: u64) {
        let mut session = self.lock();
        if session.generation != generation {
            return;
        }
        let booking_id = session.booking_id.take();
        let handler = session.on_error.take();
        session.on_update = None;
        session.attempts = 0;
        session.state = ConnectionState::Idle;
        if let Some(driver) = session.driver.take() {
            driver.detach();
        }
        drop(session);

        tracing::warn!(booking_id = booking_id.as_deref(), "token gone before reconnect, tracking stopped");
        if let Some(handler) = handler {
            handler(TrackingError::MissingToken);
        }
    }
}
