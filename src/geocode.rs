//! Forward and reverse geocoding.
//!
//! This module defines the `Address` record returned by reverse geocoding and
//! the `Geocoder` trait that the geolocator delegates to. Real providers live
//! outside this crate; the bundled `MockGeocoder` knows a handful of cities
//! and otherwise describes the coordinate by hemisphere, which is enough for
//! tests and offline use.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A geocoding result with its address components
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    pub latitude: f64,
    pub longitude: f64,
    /// Name of the place or landmark (e.g., "Willis Tower")
    pub feature_name: Option<String>,
    /// Street name
    pub thoroughfare: Option<String>,
    /// House number
    pub sub_thoroughfare: Option<String>,
    pub postal_code: Option<String>,
    /// City or town
    pub locality: Option<String>,
    /// Neighborhood or district within the locality
    pub sub_locality: Option<String>,
    /// State, province, or administrative area
    pub admin_area: Option<String>,
    /// County or similar subdivision of the admin area
    pub sub_admin_area: Option<String>,
    /// ISO country code (e.g., "US")
    pub country_code: Option<String>,
    pub country_name: Option<String>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let street = match (&self.sub_thoroughfare, &self.thoroughfare) {
            (Some(number), Some(street)) => Some(format!("{number} {street}")),
            (None, Some(street)) => Some(street.clone()),
            _ => None,
        };

        let parts: Vec<String> = [
            self.feature_name.clone(),
            street,
            self.locality.clone(),
            self.admin_area.clone(),
            self.postal_code.clone(),
            self.country_name.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Interface for geocoding services
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Convert a free-text address to candidate coordinates
    async fn geocode(&self, address: &str, map_key: Option<&str>) -> Result<Vec<(f64, f64)>>;

    /// Convert latitude and longitude to candidate addresses
    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
        map_key: Option<&str>,
    ) -> Result<Vec<Address>>;
}

struct KnownCity {
    name: &'static str,
    latitude: f64,
    longitude: f64,
    admin_area: &'static str,
    country_code: &'static str,
    country_name: &'static str,
    postal_code: &'static str,
}

const KNOWN_CITIES: &[KnownCity] = &[
    KnownCity {
        name: "Chicago",
        latitude: 41.8781,
        longitude: -87.6298,
        admin_area: "Illinois",
        country_code: "US",
        country_name: "United States",
        postal_code: "60601",
    },
    KnownCity {
        name: "New York",
        latitude: 40.7128,
        longitude: -74.0060,
        admin_area: "New York",
        country_code: "US",
        country_name: "United States",
        postal_code: "10007",
    },
    KnownCity {
        name: "San Francisco",
        latitude: 37.7749,
        longitude: -122.4194,
        admin_area: "California",
        country_code: "US",
        country_name: "United States",
        postal_code: "94103",
    },
    KnownCity {
        name: "London",
        latitude: 51.5074,
        longitude: -0.1278,
        admin_area: "England",
        country_code: "GB",
        country_name: "United Kingdom",
        postal_code: "WC2N 5DU",
    },
];

/// Roughly how far from a city center (in degrees) still counts as that city
const CITY_RADIUS_DEGREES: f64 = 0.5;

impl KnownCity {
    fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (latitude - self.latitude).abs() < CITY_RADIUS_DEGREES
            && (longitude - self.longitude).abs() < CITY_RADIUS_DEGREES
    }

    fn to_address(&self, latitude: f64, longitude: f64) -> Address {
        Address {
            latitude,
            longitude,
            locality: Some(self.name.to_string()),
            admin_area: Some(self.admin_area.to_string()),
            postal_code: Some(self.postal_code.to_string()),
            country_code: Some(self.country_code.to_string()),
            country_name: Some(self.country_name.to_string()),
            ..Default::default()
        }
    }
}

/// Mock geocoding service for testing and offline use
pub struct MockGeocoder;

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, address: &str, _map_key: Option<&str>) -> Result<Vec<(f64, f64)>> {
        let needle = address.trim().to_lowercase();
        if needle.is_empty() {
            bail!("Cannot geocode an empty address");
        }

        Ok(KNOWN_CITIES
            .iter()
            .filter(|city| needle.contains(&city.name.to_lowercase()))
            .map(|city| (city.latitude, city.longitude))
            .collect())
    }

    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
        _map_key: Option<&str>,
    ) -> Result<Vec<Address>> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            bail!("Coordinate out of range: {latitude}, {longitude}");
        }

        if let Some(city) = KNOWN_CITIES
            .iter()
            .find(|city| city.contains(latitude, longitude))
        {
            return Ok(vec![city.to_address(latitude, longitude)]);
        }

        // For any other coordinates, describe the quadrant
        let ns = if latitude >= 0.0 { "North" } else { "South" };
        let ew = if longitude >= 0.0 { "East" } else { "West" };

        Ok(vec![Address {
            latitude,
            longitude,
            feature_name: Some(format!("{ns} {ew} at {latitude:.4}, {longitude:.4}")),
            ..Default::default()
        }])
    }
}

/// Factory function to create a geocoding service
pub fn create_geocoding_service() -> Arc<dyn Geocoder> {
    // Only the mock ships with the crate; real providers implement `Geocoder`
    Arc::new(MockGeocoder)
}
