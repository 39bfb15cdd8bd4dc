//! The contract between the geolocator and a platform location service.
//!
//! A platform adapter wraps the OS location API. It is driven through
//! [`LocationService`] and reports back through a [`LocationDelegate`], the
//! same shape as the native callback/delegate APIs it wraps. The adapter never
//! resolves requests itself; that is the geolocator's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::position::{ListenerSettings, Position};

/// A raw reading as the platform reports it.
///
/// Negative accuracy, speed or course values mean "not reported".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default = "not_reported")]
    pub horizontal_accuracy: f64,
    #[serde(default = "not_reported")]
    pub vertical_accuracy: f64,
    #[serde(default = "not_reported")]
    pub speed: f64,
    #[serde(default = "not_reported")]
    pub course: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn not_reported() -> f64 {
    -1.0
}

impl RawFix {
    /// A fix with a coordinate and horizontal accuracy only
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            horizontal_accuracy,
            vertical_accuracy: -1.0,
            speed: -1.0,
            course: -1.0,
            timestamp: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64, vertical_accuracy: f64) -> Self {
        self.altitude = altitude;
        self.vertical_accuracy = vertical_accuracy;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_course(mut self, course: f64) -> Self {
        self.course = course;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn reports_coordinates(&self) -> bool {
        self.horizontal_accuracy >= 0.0
    }

    pub fn reports_altitude(&self) -> bool {
        self.vertical_accuracy >= 0.0
    }

    pub fn reports_speed(&self) -> bool {
        self.speed >= 0.0
    }

    pub fn reports_course(&self) -> bool {
        self.course >= 0.0
    }

    /// Overwrites the fields of `base` this fix actually reports.
    ///
    /// Fields the fix leaves out keep whatever `base` held, so a stream of
    /// partial fixes keeps the last known altitude, speed and heading.
    pub fn merge_into(&self, base: Position, include_heading: bool) -> Position {
        let mut position = base;

        if self.reports_coordinates() {
            position.has_accuracy = true;
            position.accuracy = self.horizontal_accuracy;
            position.has_latitude_longitude = true;
            position.latitude = self.latitude;
            position.longitude = self.longitude;
        }

        if self.reports_altitude() {
            position.has_altitude = true;
            position.altitude = self.altitude;
            position.altitude_accuracy = self.vertical_accuracy;
        }

        if self.reports_speed() {
            position.has_speed = true;
            position.speed = self.speed;
        }

        if include_heading && self.reports_course() {
            position.has_heading = true;
            position.heading = self.course;
        }

        position.timestamp = self.timestamp.unwrap_or_else(Utc::now);
        position
    }

    /// Converts the fix on its own, without a previous position to merge with
    pub fn to_position(&self, include_heading: bool) -> Position {
        self.merge_into(Position::default(), include_heading)
    }
}

/// Authorization state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedWhenInUse,
    AuthorizedAlways,
}

impl AuthorizationStatus {
    /// Denied and restricted are terminal until the user changes settings
    pub fn is_revoked(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

/// Failure classes a platform reports through [`LocationDelegate::on_failed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceFailure {
    /// Assisted positioning needed the network and could not reach it
    Network,
    /// The platform could not get a fix right now but keeps trying
    LocationUnknown,
    Other(String),
}

/// Callbacks a platform adapter delivers.
///
/// Implementations must be cheap and must not block: they run on whatever
/// context the platform calls back on.
pub trait LocationDelegate: Send + Sync {
    /// New fixes, oldest first
    fn on_locations_updated(&self, fixes: &[RawFix]);

    fn on_failed(&self, failure: ServiceFailure);

    fn on_authorization_changed(&self, status: AuthorizationStatus);

    fn on_deferred_updates_finished(&self) {}
}

/// Identifies a single-update session opened with
/// [`LocationService::start_single_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Operations a platform location service must provide.
pub trait LocationService: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Whether the device has location hardware at all
    fn is_available(&self) -> bool {
        true
    }

    /// Whether location services are switched on
    fn is_enabled(&self) -> bool;

    fn supports_heading(&self) -> bool {
        true
    }

    fn supports_deferred_updates(&self) -> bool {
        false
    }

    /// The most recently cached fix, without starting any acquisition
    fn last_known_fix(&self) -> Option<RawFix>;

    /// Registers the delegate for continuous updates and authorization changes
    fn set_delegate(&self, delegate: Weak<dyn LocationDelegate>);

    fn set_desired_accuracy(&self, meters: f64);

    /// `None` delivers every fix regardless of distance moved
    fn set_distance_filter(&self, meters: Option<f64>);

    fn set_minimum_interval(&self, _interval: Duration) {}

    /// Background, pausing and activity hints for a listening session
    fn apply_listener_settings(&self, _settings: &ListenerSettings) {}

    fn start_updating_location(&self);

    fn stop_updating_location(&self);

    fn start_monitoring_significant_changes(&self);

    fn stop_monitoring_significant_changes(&self);

    fn allow_deferred_updates_until(&self, _distance: Option<f64>, _timeout: Option<Duration>) {}

    fn disallow_deferred_updates(&self) {}

    /// Opens a short-lived session that reports to `delegate` until stopped
    fn start_single_update(
        &self,
        desired_accuracy: f64,
        delegate: Arc<dyn LocationDelegate>,
    ) -> SessionId;

    fn stop_single_update(&self, session: SessionId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unreported_fields() {
        let previous = RawFix::new(41.0, -87.0, 5.0)
            .with_altitude(180.0, 3.0)
            .with_speed(12.5)
            .to_position(false);

        let merged = RawFix::new(41.1, -87.1, 8.0).merge_into(previous, false);

        assert_eq!(merged.coordinates(), Some((41.1, -87.1)));
        assert_eq!(merged.accuracy(), Some(8.0));
        assert_eq!(merged.altitude(), Some(180.0));
        assert_eq!(merged.altitude_accuracy, 3.0);
        assert_eq!(merged.speed(), Some(12.5));
    }

    #[test]
    fn test_heading_requires_request_and_report() {
        let fix = RawFix::new(1.0, 2.0, 10.0).with_course(90.0);
        assert_eq!(fix.to_position(false).heading(), None);
        assert_eq!(fix.to_position(true).heading(), Some(90.0));

        let no_course = RawFix::new(1.0, 2.0, 10.0);
        assert_eq!(no_course.to_position(true).heading(), None);
    }

    #[test]
    fn test_fix_without_coordinates() {
        let fix = RawFix::new(1.0, 2.0, -1.0).with_speed(3.0);
        let position = fix.to_position(false);

        assert_eq!(position.coordinates(), None);
        assert_eq!(position.accuracy(), None);
        assert_eq!(position.speed(), Some(3.0));
    }

    #[test]
    fn test_fix_without_coordinates_keeps_previous_accuracy() {
        let previous = RawFix::new(1.0, 2.0, 15.0).to_position(false);
        let merged = RawFix::new(0.0, 0.0, -1.0)
            .with_altitude(50.0, 2.0)
            .merge_into(previous, false);

        assert_eq!(merged.coordinates(), Some((1.0, 2.0)));
        assert_eq!(merged.accuracy(), Some(15.0));
        assert_eq!(merged.altitude(), Some(50.0));
    }

    #[test]
    fn test_timestamp_taken_from_fix() {
        let when = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let position = RawFix::new(1.0, 2.0, 3.0)
            .with_timestamp(when)
            .to_position(false);
        assert_eq!(position.timestamp, when);
    }

    #[test]
    fn test_raw_fix_yaml_defaults() {
        let fix: RawFix = serde_yaml::from_str("latitude: 1.5\nlongitude: 2.5\n").unwrap();
        assert!(!fix.reports_coordinates());
        assert!(!fix.reports_speed());
        assert_eq!(fix.timestamp, None);
    }

    #[test]
    fn test_revoked_statuses() {
        assert!(AuthorizationStatus::Denied.is_revoked());
        assert!(AuthorizationStatus::Restricted.is_revoked());
        assert!(!AuthorizationStatus::NotDetermined.is_revoked());
        assert!(!AuthorizationStatus::AuthorizedWhenInUse.is_revoked());
    }
}
