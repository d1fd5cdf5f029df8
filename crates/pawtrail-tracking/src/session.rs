//! Active delivery: the feed subscription and local sampling, merged into
//! one observable view.
//!
//! The view shows the freshest known position, whether it came from the
//! feed or from the device, plus enough status to render a "live",
//! "reconnecting" or "tracking unavailable" hint.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pawtrail_core::{PositionFix, TrackingUpdate};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::connection::{ConnectionManager, TrackingError};
use crate::sampler::{LocationSampler, SamplerHealth};
use crate::task::TaskGuard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Live,
    /// The feed ended with an error and will not come back on its own.
    Unavailable(String),
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingView {
    pub booking_id: Option<String>,
    pub position: Option<TrackingUpdate>,
    pub status: FeedStatus,
    /// Local positioning keeps failing.
    pub degraded: bool,
}

impl Default for TrackingView {
    fn default() -> Self {
        Self {
            booking_id: None,
            position: None,
            status: FeedStatus::Stopped,
            degraded: false,
        }
    }
}

struct Active {
    booking_id: String,
    started_at: Instant,
    _merge: TaskGuard,
}

pub struct DeliverySession {
    connection: ConnectionManager,
    sampler: Arc<LocationSampler>,
    view: Arc<watch::Sender<TrackingView>>,
    active: Mutex<Option<Active>>,
}

impl DeliverySession {
    pub fn new(connection: ConnectionManager, sampler: Arc<LocationSampler>) -> Self {
        Self {
            connection,
            sampler,
            view: Arc::new(watch::channel(TrackingView::default()).0),
            active: Mutex::new(None),
        }
    }

    /// Subscribe to `booking_id`'s feed and start local sampling. Replaces
    /// any delivery already in progress. Must be called within a tokio
    /// runtime.
    pub fn start(&self, booking_id: &str) {
        let mut active = self.lock();
        *active = None;
        self.view.send_replace(TrackingView {
            booking_id: Some(booking_id.to_string()),
            position: None,
            status: FeedStatus::Connecting,
            degraded: false,
        });

        let fixes = self.sampler.subscribe_fixes();
        let health = self.sampler.subscribe_health();
        self.sampler.start();

        let on_update = {
            let view = Arc::clone(&self.view);
            move |update: TrackingUpdate| {
                view.send_modify(|v| {
                    v.position = Some(update);
                    v.status = FeedStatus::Live;
                });
            }
        };
        let on_error = {
            let view = Arc::clone(&self.view);
            move |error: TrackingError| {
                if error.is_terminal() {
                    view.send_modify(|v| v.status = FeedStatus::Unavailable(error.to_string()));
                }
            }
        };
        self.connection.connect(booking_id, on_update, on_error);

        *active = Some(Active {
            booking_id: booking_id.to_string(),
            started_at: Instant::now(),
            _merge: TaskGuard::spawn(merge_local(
                Arc::clone(&self.view),
                booking_id.to_string(),
                fixes,
                health,
            )),
        });
        tracing::info!(booking_id, "delivery tracking started");
    }

    /// End the delivery. Safe to call when nothing is active.
    pub fn stop(&self) {
        let mut active = self.lock();
        let Some(previous) = active.take() else {
            return;
        };
        self.connection.disconnect();
        self.sampler.stop();
        self.view.send_modify(|v| v.status = FeedStatus::Stopped);
        tracing::info!(
            booking_id = %previous.booking_id,
            elapsed = %format_elapsed(previous.started_at.elapsed()),
            "delivery tracking stopped"
        );
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> TrackingView {
        self.view.borrow().clone()
    }

    /// Time since `start`, zero when no delivery is active.
    pub fn elapsed(&self) -> Duration {
        self.lock()
            .as_ref()
            .map_or(Duration::ZERO, |active| active.started_at.elapsed())
    }

    /// [`elapsed`](Self::elapsed) as `m:ss`.
    pub fn elapsed_label(&self) -> String {
        format_elapsed(self.elapsed())
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn sampler(&self) -> &LocationSampler {
        &self.sampler
    }

    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DeliverySession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Minutes are not wrapped into hours.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Fold local fixes and sampler health into the view. Local fixes reuse the
/// runner id the feed last reported.
async fn merge_local(
    view: Arc<watch::Sender<TrackingView>>,
    booking_id: String,
    mut fixes: watch::Receiver<Option<PositionFix>>,
    mut health: watch::Receiver<SamplerHealth>,
) {
    loop {
        tokio::select! {
            changed = fixes.changed() => {
                if changed.is_err() {
                    return;
                }
                let fix = fixes.borrow_and_update().clone();
                if let Some(fix) = fix {
                    view.send_modify(|v| {
                        let runner_id = v
                            .position
                            .as_ref()
                            .map(|p| p.runner_id.clone())
                            .unwrap_or_default();
                        v.position = Some(TrackingUpdate::from_fix(&booking_id, &runner_id, &fix));
                    });
                }
            }
            changed = health.changed() => {
                if changed.is_err() {
                    return;
                }
                let degraded = *health.borrow_and_update() == SamplerHealth::Degraded;
                view.send_if_modified(|v| {
                    if v.degraded == degraded {
                        return false;
                    }
                    v.degraded = degraded;
                    true
                });
            }
        }
    }
}
