//! Position fixes and listening configuration.
//!
//! A `Position` keeps an explicit `has_*` flag next to every optional reading,
//! because 0 is a perfectly valid latitude, altitude or speed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A geodetic fix snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// When the fix was taken
    pub timestamp: DateTime<Utc>,
    /// Whether `latitude`/`longitude` hold a real reading
    pub has_latitude_longitude: bool,
    /// Latitude in degrees (-90..90)
    pub latitude: f64,
    /// Longitude in degrees (-180..180)
    pub longitude: f64,
    pub has_altitude: bool,
    /// Altitude in meters
    pub altitude: f64,
    /// Vertical accuracy in meters
    pub altitude_accuracy: f64,
    pub has_accuracy: bool,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    pub has_heading: bool,
    /// Heading in degrees relative to true north (0..360)
    pub heading: f64,
    pub has_speed: bool,
    /// Speed in meters per second
    pub speed: f64,
}

impl Position {
    /// Creates a position holding only a coordinate pair, stamped with the current time
    pub fn from_coordinates(latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            has_latitude_longitude: true,
            latitude,
            longitude,
            ..Default::default()
        }
    }

    /// The coordinate pair, if this position actually carries one
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.has_latitude_longitude
            .then_some((self.latitude, self.longitude))
    }

    pub fn altitude(&self) -> Option<f64> {
        self.has_altitude.then_some(self.altitude)
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.has_accuracy.then_some(self.accuracy)
    }

    pub fn heading(&self) -> Option<f64> {
        self.has_heading.then_some(self.heading)
    }

    pub fn speed(&self) -> Option<f64> {
        self.has_speed.then_some(self.speed)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time: {}", self.timestamp.format("%Y-%m-%dT%H:%M:%S%z"))?;
        match self.coordinates() {
            Some((lat, lon)) => write!(f, "\nLat: {lat:.6}\nLong: {lon:.6}")?,
            None => write!(f, "\nLat/Long: unknown")?,
        }
        if let Some(altitude) = self.altitude() {
            write!(
                f,
                "\nAltitude: {altitude:.1} m (±{:.1} m)",
                self.altitude_accuracy
            )?;
        }
        if let Some(accuracy) = self.accuracy() {
            write!(f, "\nAccuracy: {accuracy:.1} m")?;
        }
        if let Some(heading) = self.heading() {
            write!(f, "\nHeading: {heading:.1}°")?;
        }
        if let Some(speed) = self.speed() {
            write!(f, "\nSpeed: {speed:.2} m/s")?;
        }
        Ok(())
    }
}

/// Hint to the platform about what the user is doing while listening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    #[default]
    Other,
    AutomotiveNavigation,
    Fitness,
    OtherNavigation,
}

/// Configuration for a continuous listening session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Keep delivering updates while the app is in the background
    pub allow_background_updates: bool,
    /// Let the platform pause updates when the device is not moving
    pub pause_location_updates_automatically: bool,
    pub activity_type: ActivityType,
    /// Use the coarse, low-power significant-change service
    pub listen_for_significant_changes: bool,
    /// Ask the platform to batch updates until a distance/time threshold
    pub defer_location_updates: bool,
    pub deferral_distance_meters: Option<f64>,
    #[serde(with = "optional_seconds")]
    pub deferral_time: Option<Duration>,
    pub show_background_location_indicator: bool,
    /// Listening requires "always" rather than "when in use" authorization
    pub require_location_always_permission: bool,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            allow_background_updates: false,
            pause_location_updates_automatically: true,
            activity_type: ActivityType::Other,
            listen_for_significant_changes: false,
            defer_location_updates: false,
            deferral_distance_meters: None,
            deferral_time: None,
            show_background_location_indicator: true,
            require_location_always_permission: false,
        }
    }
}

/// Serializes an optional `Duration` as fractional seconds
mod optional_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let seconds = Option::<f64>::deserialize(deserializer)?;
        seconds
            .map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
