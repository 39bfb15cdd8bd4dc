//! Error kinds surfaced by the geolocator.

use thiserror::Error;

/// Errors returned by [`crate::geolocator::Geolocator`] operations.
///
/// Argument and state errors are returned before the platform service is
/// touched. Service errors arrive through the same channel as positions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeolocationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Location access is not authorized")]
    Unauthorized,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Timed out waiting for a position")]
    Timeout,

    #[error("Position request was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, GeolocationError>;
