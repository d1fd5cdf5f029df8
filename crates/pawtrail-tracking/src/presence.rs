//! Online/offline toggle for the runner.
//!
//! Going online needs a fresh fix to announce where the runner is; only
//! after the backend accepts it does periodic sampling begin. Going offline
//! stops sampling first so no upload races the offline call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pawtrail_core::Coordinates;

use crate::api::{ApiError, PresenceApi};
use crate::geolocation::{GeolocationSource, PositionError, PositionOptions};
use crate::sampler::LocationSampler;

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("could not determine position: {0}")]
    Position(#[from] PositionError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct RunnerPresence {
    source: Arc<dyn GeolocationSource>,
    api: Arc<dyn PresenceApi>,
    sampler: Arc<LocationSampler>,
    fix_timeout: Duration,
    online: AtomicBool,
}

impl RunnerPresence {
    pub fn new(
        source: Arc<dyn GeolocationSource>,
        api: Arc<dyn PresenceApi>,
        sampler: Arc<LocationSampler>,
        fix_timeout: Duration,
    ) -> Self {
        Self {
            source,
            api,
            sampler,
            fix_timeout,
            online: AtomicBool::new(false),
        }
    }

    /// Take a fresh fix, announce it, then start periodic sampling.
    /// Returns the announced coordinate.
    pub async fn go_online(&self) -> Result<Coordinates, PresenceError> {
        let options = PositionOptions::fresh(self.fix_timeout);
        let fix = tokio::time::timeout(self.fix_timeout, self.source.current_position(options))
            .await
            .map_err(|_| PositionError::Timeout)??;

        let coords = fix.coordinates();
        if coords.is_unset() || !coords.in_range() {
            return Err(PositionError::Unavailable.into());
        }

        self.api.go_online(coords).await?;
        self.online.store(true, Ordering::SeqCst);
        self.sampler.start();

        tracing::info!(lat = coords.latitude, lng = coords.longitude, "runner online");
        Ok(coords)
    }

    /// Stop sampling and announce the runner offline. The runner counts as
    /// offline locally even when the announcement fails.
    pub async fn go_offline(&self) -> Result<(), PresenceError> {
        self.sampler.stop();
        self.online.store(false, Ordering::SeqCst);
        self.api.go_offline().await?;
        tracing::info!("runner offline");
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn sampler(&self) -> &LocationSampler {
        &self.sampler
    }
}
