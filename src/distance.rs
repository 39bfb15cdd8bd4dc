//! Great-circle distance and unit conversion helpers.
//!
//! Distances use the spherical law of cosines, which is accurate enough for
//! the "how far away is it" questions an app asks of a position fix.

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Statute miles per degree of arc (60 nautical miles × 1.1515).
const MILES_PER_DEGREE: f64 = 60.0 * 1.1515;
const KILOMETERS_PER_MILE: f64 = 1.609344;
const MILES_PER_KILOMETER: f64 = 0.62137119;

/// Units a distance can be reported in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnits {
    #[default]
    Miles,
    Kilometers,
}

/// Calculates the distance between two coordinates.
///
/// Returns 0 for identical points, and for any input where the floating point
/// math degenerates (NaN, infinity or a negative result).
pub fn calculate_distance(
    latitude_start: f64,
    longitude_start: f64,
    latitude_end: f64,
    longitude_end: f64,
    units: DistanceUnits,
) -> f64 {
    if latitude_start == latitude_end && longitude_start == longitude_end {
        return 0.0;
    }

    let rlat1 = latitude_start.to_radians();
    let rlat2 = latitude_end.to_radians();
    let rtheta = (longitude_start - longitude_end).to_radians();

    let cosine = rlat1.sin() * rlat2.sin() + rlat1.cos() * rlat2.cos() * rtheta.cos();
    let miles = cosine.acos().to_degrees() * MILES_PER_DEGREE;

    if !miles.is_finite() || miles < 0.0 {
        return 0.0;
    }

    match units {
        DistanceUnits::Miles => miles,
        DistanceUnits::Kilometers => miles_to_kilometers(miles),
    }
}

pub fn miles_to_kilometers(miles: f64) -> f64 {
    miles * KILOMETERS_PER_MILE
}

pub fn kilometers_to_miles(kilometers: f64) -> f64 {
    kilometers * MILES_PER_KILOMETER
}

impl Position {
    /// Distance from this position to another one.
    ///
    /// `None` unless both positions carry a latitude/longitude.
    pub fn distance_to(&self, other: &Position, units: DistanceUnits) -> Option<f64> {
        let (latitude_start, longitude_start) = self.coordinates()?;
        let (latitude_end, longitude_end) = other.coordinates()?;
        Some(calculate_distance(
            latitude_start,
            longitude_start,
            latitude_end,
            longitude_end,
            units,
        ))
    }
}
