use std::time::Duration;

use ::geo::{coord, Point};
use log::{debug, warn};
use serde::Deserialize;

use crate::geo::validate_coordinate;
use crate::routing::definition::{Profile, RoutePoint, RouteResult, RouteSource};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP adapter for an OSRM-compatible routing service.
///
/// `route` maps onto the `/route/v1` service, `snap` onto `/nearest/v1`.
/// The adapter is stateless beyond its connection pool and can be shared
/// freely behind an `Arc`.
#[derive(Debug, Clone)]
pub struct OsrmClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
pub(crate) struct DirectionsResponse {
    pub(crate) code: String,
    #[serde(default)]
    pub(crate) routes: Vec<DirectionsRoute>,
}

#[derive(Deserialize)]
pub(crate) struct DirectionsRoute {
    pub(crate) distance: f64,
    pub(crate) duration: f64,
    pub(crate) geometry: RouteGeometry,
}

#[derive(Deserialize)]
pub(crate) struct RouteGeometry {
    /// GeoJSON ordering: `[lng, lat]`.
    pub(crate) coordinates: Vec<[f64; 2]>,
}

#[derive(Deserialize)]
pub(crate) struct NearestResponse {
    pub(crate) code: String,
    #[serde(default)]
    pub(crate) waypoints: Vec<NearestWaypoint>,
}

#[derive(Deserialize)]
pub(crate) struct NearestWaypoint {
    /// `[lng, lat]` of the snapped position.
    pub(crate) location: [f64; 2],
    /// Metres between the query point and the snapped position.
    pub(crate) distance: f64,
}

impl OsrmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// The timeout applies per request, so a pooled client can be shared
    /// between adapters with different deadlines.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        OsrmClient {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn route_url(&self, start: &Point<f64>, end: &Point<f64>, profile: Profile) -> String {
        format!(
            "{}/route/v1/{}/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url,
            profile,
            start.x(),
            start.y(),
            end.x(),
            end.y()
        )
    }

    fn nearest_url(&self, point: &Point<f64>, profile: Profile) -> String {
        format!(
            "{}/nearest/v1/{}/{},{}?number=1",
            self.base_url,
            profile,
            point.x(),
            point.y()
        )
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Option<T> {
        let response = match self.http.get(url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("routing request failed: url={} err={}", url, err);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "routing request returned {}: url={}",
                response.status(),
                url
            );
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(err) => {
                warn!("malformed routing response: url={} err={}", url, err);
                None
            }
        }
    }
}

impl RouteSource for OsrmClient {
    async fn route(
        &self,
        start: Point<f64>,
        end: Point<f64>,
        profile: Profile,
    ) -> Option<RouteResult> {
        if let Err(err) = validate_coordinate(start.y(), start.x())
            .and_then(|_| validate_coordinate(end.y(), end.x()))
        {
            debug!("rejecting route request before dispatch: {}", err);
            return None;
        }

        let url = self.route_url(&start, &end, profile);
        let body = self.get_json::<DirectionsResponse>(&url).await?;

        if body.code != "Ok" {
            warn!("routing service refused request: code={}", body.code);
            return None;
        }

        let route = body.routes.into_iter().next()?;
        Some(RouteResult {
            coordinates: route
                .geometry
                .coordinates
                .into_iter()
                .map(|[lng, lat]| RoutePoint { lat, lng })
                .collect(),
            distance_meters: route.distance,
            duration_seconds: route.duration,
        })
    }

    async fn snap(&self, point: Point<f64>, max_distance_meters: f64) -> Option<Point<f64>> {
        if let Err(err) = validate_coordinate(point.y(), point.x()) {
            debug!("rejecting snap request before dispatch: {}", err);
            return None;
        }

        let url = self.nearest_url(&point, Profile::Driving);
        let body = self.get_json::<NearestResponse>(&url).await?;

        if body.code != "Ok" {
            debug!("nearest service refused request: code={}", body.code);
            return None;
        }

        body.waypoints
            .into_iter()
            .find(|waypoint| waypoint.distance <= max_distance_meters)
            .map(|waypoint| Point(coord! { x: waypoint.location[0], y: waypoint.location[1] }))
    }
}
