use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::mock::MockLocationService;
use crate::position::ListenerSettings;
use crate::service::{AuthorizationStatus, LocationService, RawFix};

/// Which platform location service backs the geolocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// In-process simulated service driven by `simulation`
    #[default]
    Mock,
}

/// Tunables for the geolocator itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocatorConfig {
    /// Accuracy in meters a one-shot fix must reach
    pub desired_accuracy: f64,
    /// Timeout for one-shot requests; `None` waits forever
    pub default_timeout_secs: Option<f64>,
    /// On timeout, return the best fix seen instead of failing
    pub accept_best_on_timeout: bool,
}

impl Default for GeolocatorConfig {
    fn default() -> Self {
        Self {
            desired_accuracy: 100.0,
            default_timeout_secs: Some(30.0),
            accept_best_on_timeout: false,
        }
    }
}

impl GeolocatorConfig {
    pub fn default_timeout(&self) -> Result<Option<Duration>> {
        self.default_timeout_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("Invalid default_timeout_secs: {secs}"))
            })
            .transpose()
    }
}

/// How the mock platform behaves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between simulated fixes
    pub interval_ms: u64,
    pub authorization: AuthorizationStatus,
    /// Fix reported by "last known position"
    pub last_known: Option<RawFix>,
    /// Fixes replayed in a loop while updates are running
    pub track: Vec<RawFix>,
    /// Random noise in meters added to each replayed fix
    pub jitter_meters: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            authorization: AuthorizationStatus::AuthorizedWhenInUse,
            last_known: Some(RawFix::new(41.8781, -87.6298, 65.0)),
            track: vec![
                RawFix::new(41.8781, -87.6298, 250.0),
                RawFix::new(41.8786, -87.6291, 40.0)
                    .with_altitude(181.0, 10.0)
                    .with_speed(1.4)
                    .with_course(45.0),
                RawFix::new(41.8792, -87.6283, 12.0)
                    .with_altitude(182.5, 6.0)
                    .with_speed(1.5)
                    .with_course(47.0),
                RawFix::new(41.8799, -87.6276, 8.0).with_speed(1.3),
            ],
            jitter_meters: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub platform: PlatformKind,
    pub geolocator: GeolocatorConfig,
    /// Settings used by `listen`
    pub listener: ListenerSettings,
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: PlatformKind::Mock,
            geolocator: GeolocatorConfig::default(),
            listener: ListenerSettings::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("geolocator.yaml"))
    }

    /// Builds the platform location service selected by `platform`
    pub fn create_location_service(&self) -> Arc<dyn LocationService> {
        match self.platform {
            PlatformKind::Mock => Arc::new(MockLocationService::from_simulation(&self.simulation)),
        }
    }
}
