//! pawtrail-tracking — the runner's real-time tracking client.
//!
//! Two independent components do the work:
//!
//! - [`ConnectionManager`] keeps one reconnecting subscription to a
//!   booking's tracking feed and hands decoded updates to a callback.
//! - [`LocationSampler`] reads the device position, keeps a local display
//!   fix fresh, and uploads a sample to the backend on a fixed cadence.
//!
//! [`DeliverySession`] and [`RunnerPresence`] compose them for an active
//! delivery and for the online/offline toggle respectively.

pub mod api;
pub mod backoff;
pub mod connection;
pub mod geolocation;
pub mod presence;
pub mod sampler;
pub mod session;
pub mod token;
pub mod transport;

mod task;

pub use api::{ApiError, LocationSink, PresenceApi, RunnerApi};
pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionManager, ConnectionState, TrackingError};
pub use geolocation::{GeolocationSource, PositionError, PositionOptions};
pub use presence::{PresenceError, RunnerPresence};
pub use sampler::{LocationSampler, SamplerHealth};
pub use session::{DeliverySession, FeedStatus, TrackingView};
pub use token::{EnvToken, StaticToken, TokenProvider};
pub use transport::{FrameStream, Transport, TransportError, WsTransport};
