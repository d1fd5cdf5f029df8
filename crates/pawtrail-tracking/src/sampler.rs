//! Location sampler/publisher.
//!
//! While running, three things happen independently:
//!
//! - one high-accuracy fix is taken right away and uploaded,
//! - a continuous watch keeps the local display fix fresh (never uploads),
//! - every `upload_interval` a fresh fix is taken and uploaded.
//!
//! The watch gives smooth local feedback and the timer gives the backend a
//! predictable cadence. Positioning and upload failures are logged and
//! absorbed; telemetry gaps never reach the delivery workflow.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use pawtrail_core::config::SamplerConfig;
use pawtrail_core::{Coordinates, PositionFix};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::api::LocationSink;
use crate::geolocation::{FixStream, GeolocationSource, PositionError, PositionOptions};
use crate::task::TaskGuard;

/// Whether positioning is currently producing fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerHealth {
    Healthy,
    /// `degraded_after_failures` consecutive positioning requests failed.
    Degraded,
}

struct SamplingSession {
    generation: u64,
    watch: Option<TaskGuard>,
    uploads: Option<TaskGuard>,
    last_known: Option<Coordinates>,
    consecutive_failures: u32,
    uploads_in_flight: u32,
}

impl SamplingSession {
    fn release(&mut self) {
        self.watch = None;
        self.uploads = None;
        self.last_known = None;
        self.uploads_in_flight = 0;
    }
}

struct Inner {
    source: Arc<dyn GeolocationSource>,
    sink: Arc<dyn LocationSink>,
    config: SamplerConfig,
    session: Mutex<SamplingSession>,
    fix_tx: watch::Sender<Option<PositionFix>>,
    health_tx: watch::Sender<SamplerHealth>,
    uploading_tx: watch::Sender<bool>,
}

/// Samples the device position and publishes it locally and to the backend.
pub struct LocationSampler {
    inner: Arc<Inner>,
}

impl LocationSampler {
    pub fn new(
        source: Arc<dyn GeolocationSource>,
        sink: Arc<dyn LocationSink>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                sink,
                config,
                session: Mutex::new(SamplingSession {
                    generation: 0,
                    watch: None,
                    uploads: None,
                    last_known: None,
                    consecutive_failures: 0,
                    uploads_in_flight: 0,
                }),
                fix_tx: watch::channel(None).0,
                health_tx: watch::channel(SamplerHealth::Healthy).0,
                uploading_tx: watch::channel(false).0,
            }),
        }
    }

    /// Begin sampling. Restarts from scratch if already running. Never fails:
    /// without a working positioning source the sampler just stays quiet.
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut session = self.inner.lock();
        session.release();
        session.generation += 1;
        session.consecutive_failures = 0;
        let generation = session.generation;
        self.inner.fix_tx.send_replace(None);
        self.inner.health_tx.send_replace(SamplerHealth::Healthy);
        self.inner.uploading_tx.send_replace(false);

        match self.inner.source.watch_position(self.inner.watch_options()) {
            Ok(fixes) => {
                session.watch = Some(TaskGuard::spawn(watch_loop(
                    Arc::clone(&self.inner),
                    generation,
                    fixes,
                )));
            }
            Err(e) => tracing::debug!(error = %e, "continuous position watch unavailable"),
        }
        session.uploads = Some(TaskGuard::spawn(upload_loop(Arc::clone(&self.inner), generation)));

        tracing::info!(
            generation,
            interval_secs = self.inner.upload_interval().as_secs(),
            "location sampling started"
        );
    }

    /// Cancel the watch and the upload timer. In-flight requests are dropped.
    /// Safe to call when not running.
    pub fn stop(&self) {
        let mut session = self.inner.lock();
        if session.watch.is_none() && session.uploads.is_none() {
            return;
        }
        session.release();
        session.generation += 1;
        self.inner.uploading_tx.send_replace(false);
        tracing::info!("location sampling stopped");
    }

    pub fn is_running(&self) -> bool {
        let session = self.inner.lock();
        session.uploads.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Most recent coordinate seen by this sampling session.
    pub fn last_known(&self) -> Option<Coordinates> {
        self.inner.lock().last_known
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Latest local fix, for display. Every `start` first publishes `None`,
    /// so a receiver taken before `start` sees that reset before any fix.
    pub fn subscribe_fixes(&self) -> watch::Receiver<Option<PositionFix>> {
        self.inner.fix_tx.subscribe()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<SamplerHealth> {
        self.inner.health_tx.subscribe()
    }

    /// `true` while at least one upload is in flight.
    pub fn subscribe_uploading(&self) -> watch::Receiver<bool> {
        self.inner.uploading_tx.subscribe()
    }
}

impl Drop for LocationSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn watch_loop(inner: Arc<Inner>, generation: u64, mut fixes: FixStream) {
    while let Some(item) = fixes.next().await {
        let current = match item {
            Ok(fix) if inner.is_stale(&fix) => {
                tracing::debug!(timestamp = %fix.timestamp, "ignoring stale watch fix");
                true
            }
            Ok(fix) => inner.record_fix(generation, &fix),
            Err(e) => inner.record_failure(generation, &e),
        };
        if !current {
            return;
        }
    }
    tracing::debug!("position watch ended");
}

/// Owns the interval and every in-flight sample. Aborting this task drops
/// the `JoinSet`, which aborts the samples with it.
async fn upload_loop(inner: Arc<Inner>, generation: u64) {
    let mut samples = JoinSet::new();
    samples.spawn(sample_and_upload(Arc::clone(&inner), generation));

    let period = inner.upload_interval();
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    // After a suspend, resume with one tick instead of a burst of catch-up uploads.
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                samples.spawn(sample_and_upload(Arc::clone(&inner), generation));
            }
            Some(joined) = samples.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::warn!("location sample task panicked");
                    }
                }
            }
        }
    }
}

async fn sample_and_upload(inner: Arc<Inner>, generation: u64) {
    let coords = match inner.fresh_fix().await {
        Ok(fix) => {
            if !inner.record_fix(generation, &fix) {
                return;
            }
            fix.coordinates()
        }
        Err(e) => {
            if !inner.record_failure(generation, &e) || !inner.config.upload_last_known_on_fix_failure {
                return;
            }
            match inner.last_known(generation) {
                Some(coords) => coords,
                None => return,
            }
        }
    };

    if coords.is_unset() {
        tracing::debug!("no position yet, skipping upload");
        return;
    }
    if !coords.in_range() {
        tracing::warn!(lat = coords.latitude, lng = coords.longitude, "fix out of range, skipping upload");
        return;
    }
    if !inner.begin_upload(generation) {
        return;
    }

    let result = inner.sink.upload_location(coords).await;
    inner.end_upload(generation);

    match result {
        Ok(()) => tracing::debug!(lat = coords.latitude, lng = coords.longitude, "location uploaded"),
        Err(e) => tracing::warn!(error = %e, "location upload failed"),
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SamplingSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn upload_interval(&self) -> Duration {
        self.config.upload_interval().max(Duration::from_millis(1))
    }

    fn watch_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.config.high_accuracy,
            timeout: None,
            maximum_age: self.config.watch_maximum_age(),
        }
    }

    async fn fresh_fix(&self) -> Result<PositionFix, PositionError> {
        let timeout = self.config.fix_timeout();
        let options = PositionOptions {
            high_accuracy: self.config.high_accuracy,
            timeout: Some(timeout),
            maximum_age: Duration::ZERO,
        };
        match tokio::time::timeout(timeout, self.source.current_position(options)).await {
            Ok(result) => result,
            Err(_) => Err(PositionError::Timeout),
        }
    }

    fn is_stale(&self, fix: &PositionFix) -> bool {
        let age = chrono::Utc::now().signed_duration_since(fix.timestamp);
        age.to_std().is_ok_and(|age| age > self.config.watch_maximum_age())
    }

    /// Returns `false` once `generation` has been superseded.
    fn record_fix(&self, generation: u64, fix: &PositionFix) -> bool {
        let mut session = self.lock();
        if session.generation != generation {
            return false;
        }
        session.last_known = Some(fix.coordinates());
        session.consecutive_failures = 0;
        self.fix_tx.send_replace(Some(fix.clone()));
        self.health_tx.send_if_modified(|health| {
            if *health == SamplerHealth::Degraded {
                tracing::info!("positioning recovered");
                *health = SamplerHealth::Healthy;
                true
            } else {
                false
            }
        });
        true
    }

    fn record_failure(&self, generation: u64, error: &PositionError) -> bool {
        let mut session = self.lock();
        if session.generation != generation {
            return false;
        }
        session.consecutive_failures += 1;
        let failures = session.consecutive_failures;
        tracing::debug!(error = %error, consecutive = failures, "positioning failed");

        let threshold = self.config.degraded_after_failures;
        if threshold > 0 && failures >= threshold {
            self.health_tx.send_if_modified(|health| {
                if *health == SamplerHealth::Healthy {
                    tracing::warn!(consecutive = failures, "positioning degraded");
                    *health = SamplerHealth::Degraded;
                    true
                } else {
                    false
                }
            });
        }
        true
    }

    fn last_known(&self, generation: u64) -> Option<Coordinates> {
        let session = self.lock();
        if session.generation != generation {
            return None;
        }
        session.last_known
    }

    fn begin_upload(&self, generation: u64) -> bool {
        let mut session = self.lock();
        if session.generation != generation {
            return false;
        }
        session.uploads_in_flight += 1;
        self.uploading_tx.send_if_modified(|busy| !std::mem::replace(busy, true));
        true
    }

    fn end_upload(&self, generation: u64) {
        let mut session = self.lock();
        if session.generation != generation {
            return;
        }
        session.uploads_in_flight = session.uploads_in_flight.saturating_sub(1);
        if session.uploads_in_flight == 0 {
            self.uploading_tx.send_replace(false);
        }
    }
}
