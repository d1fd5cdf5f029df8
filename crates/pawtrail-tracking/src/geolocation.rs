//! Device positioning.
//!
//! [`GeolocationSource`] is the capability the sampler and the presence
//! toggle read from. A watch is a stream; dropping it cancels the watch.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use pawtrail_core::config::{GeolocationConfig, SourceKind};
use pawtrail_core::PositionFix;

/// Continuous position updates. Dropping the stream ends the watch.
pub type FixStream = BoxStream<'static, Result<PositionFix, PositionError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    /// Give up on a one-shot request after this long.
    pub timeout: Option<Duration>,
    /// Accept a cached fix no older than this.
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// Fresh, high-accuracy one-shot request.
    pub fn fresh(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout: Some(timeout),
            maximum_age: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    Unavailable,
    #[error("timed out waiting for a fix")]
    Timeout,
}

#[async_trait]
pub trait GeolocationSource: Send + Sync + 'static {
    /// One-shot fix.
    async fn current_position(&self, options: PositionOptions) -> Result<PositionFix, PositionError>;

    /// Start a continuous watch.
    fn watch_position(&self, options: PositionOptions) -> Result<FixStream, PositionError>;
}

// ── Fixed ─────────────────────────────────────────────────────────────────────

/// Always reports the same coordinate.
#[derive(Debug, Clone)]
pub struct FixedSource {
    latitude: f64,
    longitude: f64,
}

impl FixedSource {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    fn fix(&self) -> PositionFix {
        PositionFix {
            accuracy_m: 5.0,
            speed_mps: Some(0.0),
            ..PositionFix::at(self.latitude, self.longitude)
        }
    }
}

#[async_trait]
impl GeolocationSource for FixedSource {
    async fn current_position(&self, _options: PositionOptions) -> Result<PositionFix, PositionError> {
        Ok(self.fix())
    }

    fn watch_position(&self, _options: PositionOptions) -> Result<FixStream, PositionError> {
        // A stationary device reports once and then stays quiet.
        Ok(stream::once(std::future::ready(Ok(self.fix())))
            .chain(stream::pending())
            .boxed())
    }
}

// ── Replay ────────────────────────────────────────────────────────────────────

/// Replays a recorded track, one fix per request or watch step, wrapping at
/// the end. Timestamps are replaced with the time of emission.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    fixes: Arc<Vec<PositionFix>>,
    cursor: Arc<AtomicUsize>,
    step: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read track {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("failed to parse track {0}: {1}")]
    Parse(std::path::PathBuf, serde_json::Error),
    #[error("track {0} has no fixes")]
    Empty(std::path::PathBuf),
}

impl ReplaySource {
    pub fn new(fixes: Vec<PositionFix>, step: Duration) -> Option<Self> {
        if fixes.is_empty() {
            return None;
        }
        Some(Self {
            fixes: Arc::new(fixes),
            cursor: Arc::new(AtomicUsize::new(0)),
            step: step.max(Duration::from_millis(1)),
        })
    }

    /// Load a JSON array of fixes.
    pub fn load(path: &Path, step: Duration) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReplayError::Read(path.to_path_buf(), e))?;
        let fixes: Vec<PositionFix> =
            serde_json::from_str(&text).map_err(|e| ReplayError::Parse(path.to_path_buf(), e))?;
        tracing::info!(path = %path.display(), fixes = fixes.len(), "loaded replay track");
        Self::new(fixes, step).ok_or_else(|| ReplayError::Empty(path.to_path_buf()))
    }

    fn next_fix(&self) -> PositionFix {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.fixes.len();
        PositionFix {
            timestamp: Utc::now(),
            ..self.fixes[index].clone()
        }
    }
}

#[async_trait]
impl GeolocationSource for ReplaySource {
    async fn current_position(&self, _options: PositionOptions) -> Result<PositionFix, PositionError> {
        Ok(self.next_fix())
    }

    fn watch_position(&self, _options: PositionOptions) -> Result<FixStream, PositionError> {
        let source = self.clone();
        Ok(stream::unfold((source, None), |(source, ticker)| async move {
            let mut ticker: tokio::time::Interval =
                ticker.unwrap_or_else(|| tokio::time::interval(source.step));
            ticker.tick().await;
            let fix = source.next_fix();
            Some((Ok(fix), (source, Some(ticker))))
        })
        .boxed())
    }
}

// ── Unavailable ───────────────────────────────────────────────────────────────

/// A device without positioning hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSource;

#[async_trait]
impl GeolocationSource for UnavailableSource {
    async fn current_position(&self, _options: PositionOptions) -> Result<PositionFix, PositionError> {
        Err(PositionError::Unavailable)
    }

    fn watch_position(&self, _options: PositionOptions) -> Result<FixStream, PositionError> {
        Err(PositionError::Unavailable)
    }
}

/// Build the source selected in configuration.
pub fn from_config(config: &GeolocationConfig) -> Result<Arc<dyn GeolocationSource>, ReplayError> {
    let source: Arc<dyn GeolocationSource> = match config.source {
        SourceKind::Fixed => Arc::new(FixedSource::new(config.latitude, config.longitude)),
        SourceKind::Replay => Arc::new(ReplaySource::load(
            &config.replay_path,
            Duration::from_millis(config.replay_step_ms),
        )?),
        SourceKind::Unavailable => Arc::new(UnavailableSource),
    };
    Ok(source)
}
