use std::future::Future;

use ::geo::{coord, Point};
use serde::{Deserialize, Serialize};

/// Travel profile forwarded to the routing API. Delivery tracking only
/// exercises `Driving`; the others are forward-compatible and may be
/// treated as no-ops by an upstream that does not support them.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Profile {
    #[default]
    Driving,
    Walking,
    Cycling,
}

/// A bare coordinate on a route polyline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
}

impl From<Point<f64>> for RoutePoint {
    fn from(point: Point<f64>) -> Self {
        RoutePoint {
            lat: point.y(),
            lng: point.x(),
        }
    }
}

impl From<RoutePoint> for Point<f64> {
    fn from(point: RoutePoint) -> Self {
        Point(coord! { x: point.lng, y: point.lat })
    }
}

/// A road-following (or fallback straight-line) route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    /// Ordered polyline from start to end.
    pub coordinates: Vec<RoutePoint>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Seam over the external road-routing service.
///
/// Both operations are total: any upstream failure (timeout, non-2xx,
/// malformed body, invalid input) surfaces as `None`, never as an error
/// or panic. Callers decide how to degrade.
pub trait RouteSource: Send + Sync + 'static {
    /// Computes a road-following route between two points.
    fn route(
        &self,
        start: Point<f64>,
        end: Point<f64>,
        profile: Profile,
    ) -> impl Future<Output = Option<RouteResult>> + Send;

    /// Snaps a point to the nearest road, searching within
    /// `max_distance_meters`. The returned point is advisory; callers
    /// re-check the bound locally rather than trusting the upstream.
    fn snap(
        &self,
        point: Point<f64>,
        max_distance_meters: f64,
    ) -> impl Future<Output = Option<Point<f64>>> + Send;
}
