//! # geolocator
//!
//! One asynchronous API for device location, whatever platform service sits
//! underneath.
//!
//! A [`Geolocator`] is built around an injected [`LocationService`], the thin
//! adapter over a platform's native location API. On top of it the
//! geolocator provides:
//!
//! - One-shot `get_position` requests with timeout and cancellation
//! - Continuous listening with a cached last fix and change notifications
//! - The platform's last known position
//! - Forward and reverse geocoding through a pluggable [`Geocoder`]
//! - Great-circle distance helpers
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use geolocator::{Geolocator, MockLocationService};
//!
//! # async fn run() -> geolocator::Result<()> {
//! let geolocator = Geolocator::new(Arc::new(MockLocationService::new()));
//! let position = geolocator
//!     .get_position(Some(Duration::from_secs(10)), None, false)
//!     .await?;
//! println!("{position}");
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod distance;
pub mod error;
pub mod geocode;
pub mod geolocator;
pub mod mock;
pub mod position;
pub mod service;
pub mod single_update;

pub use cancel::CancelToken;
pub use distance::{DistanceUnits, calculate_distance, kilometers_to_miles, miles_to_kilometers};
pub use error::{GeolocationError, Result};
pub use geocode::{Address, Geocoder, MockGeocoder};
pub use geolocator::{Geolocator, PositionEvent};
pub use mock::MockLocationService;
pub use position::{ActivityType, ListenerSettings, Position};
pub use service::{
    AuthorizationStatus, LocationDelegate, LocationService, RawFix, ServiceFailure, SessionId,
};
