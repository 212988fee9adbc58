use std::sync::Arc;
use std::time::Duration;

use ::geo::Point;
use log::debug;
use tokio::time::Instant;

use crate::geo::haversine_distance;
use crate::optimize::TravelContext;
use crate::routing::RouteResult;

/// Grid precision for cache keys: four decimal places, roughly an 11m
/// cell at the equator.
const KEY_PRECISION: usize = 4;

/// Derives the cache key for a `(start, end, context)` request by
/// rounding both endpoints onto the key grid.
pub(crate) fn route_key(start: &Point<f64>, end: &Point<f64>, context: TravelContext) -> String {
    format!(
        "{:.prec$},{:.prec$}:{:.prec$},{:.prec$}:{}",
        start.y(),
        start.x(),
        end.y(),
        end.x(),
        context,
        prec = KEY_PRECISION
    )
}

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub route: Arc<RouteResult>,
    pub written: Instant,
    pub start: Point<f64>,
    pub end: Point<f64>,
}

/// Process-wide route cache. An entry is served only while it is both
/// fresh (age below the TTL) and undisplaced (neither endpoint has moved
/// beyond the distance threshold since it was written); an entry failing
/// either check is evicted on sight.
#[derive(Debug)]
pub(crate) struct RouteCache {
    entries: scc::HashMap<String, CacheEntry>,
    ttl: Duration,
    displacement_threshold_meters: f64,
}

impl RouteCache {
    pub fn new(ttl: Duration, displacement_threshold_meters: f64) -> Self {
        RouteCache {
            entries: scc::HashMap::new(),
            ttl,
            displacement_threshold_meters,
        }
    }

    pub fn get(
        &self,
        key: &str,
        start: &Point<f64>,
        end: &Point<f64>,
    ) -> Option<Arc<RouteResult>> {
        let mut stale = None;

        let route = self
            .entries
            .read(key, |_, entry| {
                if entry.written.elapsed() >= self.ttl {
                    stale = Some(entry.written);
                    return None;
                }

                let displaced = haversine_distance(&entry.start, start)
                    > self.displacement_threshold_meters
                    || haversine_distance(&entry.end, end) > self.displacement_threshold_meters;

                if displaced {
                    stale = Some(entry.written);
                    return None;
                }

                Some(entry.route.clone())
            })
            .flatten();

        if let Some(written) = stale {
            debug!("evicting stale route cache entry for {}", key);
            self.evict_if_unchanged(key, written);
        }

        route
    }

    /// Drops `key` only while it still holds the entry observed at
    /// `written`; an entry rewritten in the meantime survives.
    pub(crate) fn evict_if_unchanged(&self, key: &str, written: Instant) {
        self.entries.remove_if(key, |entry| entry.written == written);
    }

    /// Writes an entry, then opportunistically sweeps out everything
    /// whose age already exceeds the TTL.
    pub fn insert(&self, key: String, entry: CacheEntry) {
        self.entries.remove(&key);
        let _ = self.entries.insert(key, entry);
        self.sweep();
    }

    fn sweep(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.written.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
