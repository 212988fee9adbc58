//! Per-session GPS stabilization: road-snapping, recency-weighted
//! smoothing and a stationary noise gate over a bounded fix history.
//!
//! [`LocationStabilizer::stabilize`] is deliberately infallible. A
//! delivery that loses its routing upstream still has to report *some*
//! position, so every internal failure degrades to the best fix
//! available rather than surfacing an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ::geo::{coord, Point};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo::{bearing, haversine_distance};
use crate::routing::RouteSource;

pub mod history;


#[doc(inline)]
pub use history::{FixHistory, FIX_HISTORY_CAPACITY};

/// A raw GPS sample as reported by the delivery client's device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Device-reported accuracy in meters, when available.
    pub accuracy: Option<f64>,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        RawFix {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    pub fn point(&self) -> Point<f64> {
        Point(coord! { x: self.longitude, y: self.latitude })
    }
}

/// A fix after snapping, smoothing and noise filtering. This is what the
/// tracking layer broadcasts to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizedFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub snapped_to_road: bool,
    /// Provenance for debugging and audit subscribers.
    pub original: Option<RawFix>,
}

impl StabilizedFix {
    pub fn point(&self) -> Point<f64> {
        Point(coord! { x: self.longitude, y: self.latitude })
    }
}

/// Estimated heading of the agent, derived from recent history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    /// Degrees within `[0, 360)`.
    pub bearing_degrees: f64,
    pub speed_mps: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct StabilizerConfig {
    pub snap_to_road: bool,
    /// History entries considered by the moving average, in addition to
    /// the incoming fix.
    pub moving_average_window: usize,
    /// Movement below this distance is treated as stationary jitter.
    pub noise_threshold_meters: f64,
    /// Snap results further than this from the raw fix are discarded.
    pub max_snap_distance_meters: f64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        StabilizerConfig {
            snap_to_road: true,
            moving_average_window: 5,
            noise_threshold_meters: 10.0,
            max_snap_distance_meters: 100.0,
        }
    }
}

/// Owns one session's fix history. Sessions are isolated instances; the
/// composition root constructs one stabilizer per tracked order and
/// never shares it across sessions.
#[derive(Debug)]
pub struct LocationStabilizer<S: RouteSource> {
    source: Arc<S>,
    config: StabilizerConfig,
    history: FixHistory,
}

impl<S: RouteSource> LocationStabilizer<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self::with_config(source, StabilizerConfig::default())
    }

    pub fn with_config(source: Arc<S>, config: StabilizerConfig) -> Self {
        LocationStabilizer {
            source,
            config,
            history: FixHistory::new(),
        }
    }

    /// Turns a raw fix into a stabilized one. Never fails: snap errors,
    /// timeouts and malformed upstream data all degrade to the raw
    /// coordinates.
    pub async fn stabilize(&mut self, raw: RawFix) -> StabilizedFix {
        let (position, snapped) = if self.config.snap_to_road {
            self.snap(&raw).await
        } else {
            (raw.point(), false)
        };

        let smoothed = self.smooth(position);
        let position = self.noise_gate(smoothed);

        let fix = StabilizedFix {
            latitude: position.y(),
            longitude: position.x(),
            accuracy: raw.accuracy,
            timestamp: Utc::now(),
            snapped_to_road: snapped,
            original: Some(raw),
        };

        self.history.push(fix.clone());
        fix
    }

    /// Bearing and speed between the oldest and newest of the last three
    /// history entries. `None` until two fixes have been recorded.
    pub fn movement_direction(&self) -> Option<Movement> {
        if self.history.len() < 2 {
            return None;
        }

        let window: Vec<&StabilizedFix> = self.history.tail(3).collect();
        let (oldest, newest) = (window.first()?, window.last()?);

        let distance = haversine_distance(&oldest.point(), &newest.point());
        let elapsed = (newest.timestamp - oldest.timestamp)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;

        let speed_mps = if elapsed > 0.0 { distance / elapsed } else { 0.0 };

        Some(Movement {
            bearing_degrees: bearing(&oldest.point(), &newest.point()),
            speed_mps,
        })
    }

    /// Discards the session history, e.g. when a delivery is reassigned.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn last(&self) -> Option<&StabilizedFix> {
        self.history.last()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Road-snaps a raw fix, re-checking the distance bound locally
    /// rather than trusting the upstream's answer.
    async fn snap(&self, raw: &RawFix) -> (Point<f64>, bool) {
        let bound = self.config.max_snap_distance_meters;

        match self.source.snap(raw.point(), bound).await {
            Some(snapped) if haversine_distance(&snapped, &raw.point()) <= bound => (snapped, true),
            Some(snapped) => {
                debug!(
                    "discarding snap {:?}m from raw fix, beyond the {}m bound",
                    haversine_distance(&snapped, &raw.point()),
                    bound
                );
                (raw.point(), false)
            }
            None => (raw.point(), false),
        }
    }

    /// Weighted moving average over the recent history plus the incoming
    /// point. Weights rise linearly with recency, so the incoming point
    /// dominates without the average lagging unboundedly.
    fn smooth(&self, current: Point<f64>) -> Point<f64> {
        if self.history.is_empty() {
            return current;
        }

        let mut weight = 0.0;
        let mut total = 0.0;
        let mut lat = 0.0;
        let mut lng = 0.0;

        for fix in self.history.tail(self.config.moving_average_window) {
            weight += 1.0;
            total += weight;
            lat += fix.latitude * weight;
            lng += fix.longitude * weight;
        }

        weight += 1.0;
        total += weight;
        lat += current.y() * weight;
        lng += current.x() * weight;

        Point(coord! { x: lng / total, y: lat / total })
    }

    /// Sub-threshold movement is jitter: reuse the previous coordinates
    /// exactly so a stationary agent reports a stationary position.
    fn noise_gate(&self, smoothed: Point<f64>) -> Point<f64> {
        match self.history.last() {
            Some(last) if haversine_distance(&smoothed, &last.point())
                < self.config.noise_threshold_meters =>
            {
                last.point()
            }
            _ => smoothed,
        }
    }
}
