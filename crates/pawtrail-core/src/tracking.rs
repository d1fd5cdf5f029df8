//! Position samples exchanged between the device, the backend, and the
//! tracking feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair, as uploaded to `POST /location`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// `(0, 0)` marks a runner that has never been sampled. It is never
    /// uploaded.
    pub fn is_unset(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One fix reported by a geolocation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in metres.
    #[serde(default)]
    pub accuracy_m: f64,
    /// Ground speed in m/s, when the source reports one.
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_degrees: Option<f64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: 0.0,
            speed_mps: None,
            heading_degrees: None,
            timestamp: Utc::now(),
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// A position sample for one booking.
///
/// Produced locally from a [`PositionFix`] or decoded from a tracking-feed
/// frame. Decoded values always satisfy the range invariants checked by
/// [`TrackingUpdate::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub booking_id: String,
    pub runner_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub heading_degrees: f64,
    pub timestamp: DateTime<Utc>,
}

impl TrackingUpdate {
    /// Decode one JSON frame from the tracking feed. Payloads that are not
    /// valid UTF-8 are rejected, not repaired.
    pub fn decode(frame: impl AsRef<[u8]>) -> Result<Self, DecodeError> {
        let update: TrackingUpdate = serde_json::from_slice(frame.as_ref())?;
        update.validate()?;
        Ok(update)
    }

    /// Build a local update from a device fix. Out-of-range speed and heading
    /// are normalised rather than rejected.
    pub fn from_fix(booking_id: &str, runner_id: &str, fix: &PositionFix) -> Self {
        let speed_kmh = fix.speed_mps.unwrap_or(0.0) * 3.6;
        let heading = fix.heading_degrees.unwrap_or(0.0);

        Self {
            booking_id: booking_id.to_string(),
            runner_id: runner_id.to_string(),
            latitude: fix.latitude.clamp(-90.0, 90.0),
            longitude: fix.longitude.clamp(-180.0, 180.0),
            speed_kmh: if speed_kmh.is_finite() { speed_kmh.max(0.0) } else { 0.0 },
            heading_degrees: normalize_heading(heading),
            timestamp: fix.timestamp,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(DecodeError::Latitude(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(DecodeError::Longitude(self.longitude));
        }
        if !(self.speed_kmh >= 0.0) {
            return Err(DecodeError::Speed(self.speed_kmh));
        }
        if !(0.0..360.0).contains(&self.heading_degrees) {
            return Err(DecodeError::Heading(self.heading_degrees));
        }
        Ok(())
    }
}

fn normalize_heading(heading: f64) -> f64 {
    if !heading.is_finite() {
        return 0.0;
    }
    let wrapped = heading.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed tracking update: {0}")]
    Json(#[from] serde_json::Error),
    #[error("latitude {0} outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} outside [-180, 180]")]
    Longitude(f64),
    #[error("negative speed {0} km/h")]
    Speed(f64),
    #[error("heading {0} outside [0, 360)")]
    Heading(f64),
}
