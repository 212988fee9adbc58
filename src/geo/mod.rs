//! Pure geodesic helpers: distance, bearing, ETA and the
//! coordinate validation every network-facing entry point runs first.

use ::geo::Point;

use crate::geo::error::GeoError;

pub const MEAN_EARTH_RADIUS: f64 = 6371008.8;

/// Metres travelled per second at 1 km/h.
const KMH_TO_MPS: f64 = 1000.0 / 3600.0;

#[doc(hidden)]
pub mod error;
pub mod format;


#[doc(inline)]
pub use format::{format_distance, format_duration};

/// Ensures a latitude/longitude pair is finite and within WGS84 bounds.
///
/// Every operation that could reach the network validates through here
/// first, so malformed fixes are rejected before any I/O happens.
pub fn validate_coordinate(lat: f64, lng: f64) -> Result<(), GeoError> {
    if !lat.is_finite() || !(-90f64..=90f64).contains(&lat) {
        return Err(GeoError::InvalidCoordinate(format!(
            "Latitude must be finite and between -90 and 90. Given: {}",
            lat
        )));
    }

    if !lng.is_finite() || !(-180f64..=180f64).contains(&lng) {
        return Err(GeoError::InvalidCoordinate(format!(
            "Longitude must be finite and between -180 and 180. Given: {}",
            lng
        )));
    }

    Ok(())
}

/// Great-circle distance between two points, in meters.
///
/// Points follow the crate convention of `x = lng`, `y = lat`.
pub fn haversine_distance(lhs: &Point<f64>, rhs: &Point<f64>) -> f64 {
    let phi1 = lhs.y().to_radians();
    let phi2 = rhs.y().to_radians();
    let delta_phi = (rhs.y() - lhs.y()).to_radians();
    let delta_lambda = (rhs.x() - lhs.x()).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();
    MEAN_EARTH_RADIUS * c
}

/// Initial bearing from `from` towards `to`, in degrees within `[0, 360)`.
pub fn bearing(from: &Point<f64>, to: &Point<f64>) -> f64 {
    let phi1 = from.y().to_radians();
    let phi2 = to.y().to_radians();
    let delta_lambda = (to.x() - from.x()).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Travel time for `distance_meters` at `speed_kmh`, in seconds.
/// Non-positive speeds yield an infinite ETA.
pub fn eta_seconds(distance_meters: f64, speed_kmh: f64) -> f64 {
    if speed_kmh <= 0.0 {
        return f64::INFINITY;
    }

    distance_meters / (speed_kmh * KMH_TO_MPS)
}
