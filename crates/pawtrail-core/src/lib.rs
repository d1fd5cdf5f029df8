//! pawtrail-core — shared tracking types and configuration.
//! All other Pawtrail crates depend on this one.

pub mod config;
pub mod tracking;

pub use tracking::{Coordinates, DecodeError, PositionFix, TrackingUpdate};
